//! Blob contents, optionally cut off after a byte limit.

use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use super::{
    object_info::{ObjectInfo, ObjectType},
    object_reader::ObjectReader,
};
use crate::internal::{errors::GitError, reference::Revision};

/// A blob header plus the part of its payload that was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub info: ObjectInfo,
    pub data: Vec<u8>,
}

impl Blob {
    /// Whether `data` stops short of the full blob.
    pub fn is_truncated(&self) -> bool {
        (self.data.len() as u64) < self.info.size
    }
}

/// Reads the blob at `revision`, keeping at most `limit` bytes, or all of
/// them when `limit` is `None`.
///
/// Objects that are not blobs are reported as [`GitError::NotFound`]. Bytes
/// past the limit are never read, so the reader comes back dirty and its
/// process is not reused.
pub async fn get_blob(
    ctx: &CancellationToken,
    reader: &dyn ObjectReader,
    revision: &Revision,
    limit: Option<u64>,
) -> Result<Blob, GitError> {
    let mut object = reader.object(ctx, revision).await?;
    if object.object_type() != ObjectType::Blob {
        tracing::debug!(%revision, object_type = %object.object_type(), "not a blob");
        return Err(GitError::NotFound(revision.to_string()));
    }
    let info = object.info().clone();

    let data = match limit {
        Some(limit) if limit < info.size => {
            let mut data = Vec::with_capacity(usize::try_from(limit).unwrap_or(0).min(1 << 20));
            (&mut object)
                .take(limit)
                .read_to_end(&mut data)
                .await
                .map_err(GitError::from_child_io)?;
            data
        }
        _ => object.read_to_vec().await?,
    };
    Ok(Blob { info, data })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        internal::{
            catfile::{CatfileReader, NoopMetrics},
            hash::HashKind,
        },
        utils::test::ScriptedExecutor,
    };

    async fn scripted_reader() -> CatfileReader {
        let executor = ScriptedExecutor::new(HashKind::Sha1)
            .with_object("blob-a", ObjectType::Blob, b"alpha".to_vec())
            .with_object("tree-c", ObjectType::Tree, b"entries".to_vec());
        CatfileReader::new(&CancellationToken::new(), &executor, Arc::new(NoopMetrics))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_whole_blob_keeps_reader_clean() {
        let ctx = CancellationToken::new();
        let reader = scripted_reader().await;
        for limit in [None, Some(5), Some(100)] {
            let blob = get_blob(&ctx, &reader, &"blob-a".into(), limit).await.unwrap();
            assert_eq!(blob.data, b"alpha");
            assert!(!blob.is_truncated());
            assert!(!reader.is_dirty());
        }
    }

    #[tokio::test]
    async fn test_limited_blob_leaves_remainder_unread() {
        let ctx = CancellationToken::new();
        let reader = scripted_reader().await;
        let blob = get_blob(&ctx, &reader, &"blob-a".into(), Some(3)).await.unwrap();
        assert_eq!(blob.data, b"alp");
        assert_eq!(blob.info.size, 5);
        assert!(blob.is_truncated());
        assert!(reader.is_dirty());
    }

    #[tokio::test]
    async fn test_zero_limit_returns_header_only() {
        let ctx = CancellationToken::new();
        let reader = scripted_reader().await;
        let blob = get_blob(&ctx, &reader, &"blob-a".into(), Some(0)).await.unwrap();
        assert!(blob.data.is_empty());
        assert_eq!(blob.info.size, 5);
    }

    #[tokio::test]
    async fn test_non_blob_is_not_found() {
        let ctx = CancellationToken::new();
        let reader = scripted_reader().await;
        let err = get_blob(&ctx, &reader, &"tree-c".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::NotFound(rev) if rev == "tree-c"));

        let reader = scripted_reader().await;
        let err = get_blob(&ctx, &reader, &"nope".into(), None).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!reader.is_dirty());
    }
}
