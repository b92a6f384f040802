//! Pooled, pipelined object reads through `git cat-file --batch-command`.
//!
//! A [`ReaderCache`] hands out [`ReaderLease`]s, each wrapping one
//! [`CatfileReader`] process. One-shot lookups go through
//! [`ObjectReader::info`] and [`ObjectReader::object`]; pipelined callers
//! lease the [`ObjectQueue`] and pair every `request_*` with a `read_*`
//! after a `flush`.

pub mod blob;
pub mod cache;
pub mod commit;
pub mod object;
pub mod object_info;
pub mod object_reader;
mod request_queue;
pub mod trace;

pub use blob::{Blob, get_blob};
pub use cache::{ReaderCache, ReaderLease};
pub use commit::{Commit, Signature, get_commit, list_commits_by_ref_name, parse_raw_commit};
pub use object::Object;
pub use object_info::{ObjectInfo, ObjectType, parse_object_info};
pub use object_reader::{CatfileReader, ObjectQueue, ObjectReader, read_object_bytes};
pub use trace::{CacheEvent, InMemoryMetrics, MetricsSink, NoopMetrics};
