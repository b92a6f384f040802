//! Per-lease request tracing and the metrics sink fed by readers and the cache.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Instant,
};

use tracing::Span;

use super::object_info::ObjectType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheEvent {
    Hit,
    Miss,
    Evicted,
    Expired,
    ReturnedDirty,
}

/// Receives reader and cache counters. Implementations must be cheap; they are
/// called while a lease is being released.
pub trait MetricsSink: Send + Sync {
    fn record_requests(&self, method: &str, object_type: ObjectType, count: u64);

    fn cache_event(&self, _event: CacheEvent) {}
}

#[derive(Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_requests(&self, _method: &str, _object_type: ObjectType, _count: u64) {}
}

/// Counts everything in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    requests: Mutex<HashMap<(String, ObjectType), u64>>,
    events: Mutex<HashMap<CacheEvent, u64>>,
}

impl InMemoryMetrics {
    pub fn requests(&self, method: &str, object_type: ObjectType) -> u64 {
        let requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        requests
            .get(&(method.to_string(), object_type))
            .copied()
            .unwrap_or(0)
    }

    pub fn events(&self, event: CacheEvent) -> u64 {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.get(&event).copied().unwrap_or(0)
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record_requests(&self, method: &str, object_type: ObjectType, count: u64) {
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        *requests
            .entry((method.to_string(), object_type))
            .or_default() += count;
    }

    fn cache_event(&self, event: CacheEvent) {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        *events.entry(event).or_default() += 1;
    }
}

/// Trace of one queue lease: a span named after the method plus a count of
/// replies per object type, flushed to the sink when the lease ends.
pub(crate) struct RequestTrace {
    method: &'static str,
    span: Span,
    started: Instant,
    requests: HashMap<ObjectType, u64>,
    metrics: Arc<dyn MetricsSink>,
}

impl RequestTrace {
    pub(crate) fn start(method: &'static str, metrics: Arc<dyn MetricsSink>) -> Self {
        // Span names are static metadata, so each method needs its own callsite.
        let span = match method {
            "catfile.Info" => tracing::debug_span!("catfile.Info"),
            "catfile.Object" => tracing::debug_span!("catfile.Object"),
            _ => tracing::debug_span!("catfile.ObjectQueue"),
        };
        Self {
            method,
            span,
            started: Instant::now(),
            requests: HashMap::new(),
            metrics,
        }
    }

    pub(crate) fn span(&self) -> &Span {
        &self.span
    }

    pub(crate) fn record(&mut self, object_type: ObjectType) {
        *self.requests.entry(object_type).or_default() += 1;
    }

    pub(crate) fn finish(self) {
        let total: u64 = self.requests.values().sum();
        self.span.in_scope(|| {
            tracing::debug!(
                requests = total,
                elapsed_ms = self.started.elapsed().as_millis() as u64,
                "object queue released"
            );
        });
        for (object_type, count) in &self.requests {
            self.metrics
                .record_requests(self.method, *object_type, *count);
        }
    }
}
