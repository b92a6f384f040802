//! End-to-end object reads against real git repositories.
//!
//! Every test returns early when the installed git is too old for
//! `cat-file -Z --batch-command`.

use std::{sync::Arc, time::Duration};

use catpool::{
    internal::{
        catfile::{
            CacheEvent, CatfileReader, InMemoryMetrics, ObjectReader, ObjectType, ReaderCache,
            get_blob, get_commit, list_commits_by_ref_name, read_object_bytes,
        },
        config::{CacheConfig, DEFAULT_MAX_BODY_SIZE},
        errors::GitError,
        hash::HashKind,
        reference::{ReferenceName, Revision, get_symbolic_ref},
    },
    utils::test::{TestRepo, git_supports_batch_command},
};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

async fn reader(repo: &TestRepo) -> CatfileReader {
    CatfileReader::new(
        &CancellationToken::new(),
        &repo.executor(),
        Arc::new(InMemoryMetrics::default()),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_info_of_head() {
    if !git_supports_batch_command() {
        return;
    }
    let repo = TestRepo::new();
    let head = repo.commit_file("README.md", "hello\n", "initial");
    let size: u64 = repo.git(&["cat-file", "-s", "HEAD"]).parse().unwrap();

    let reader = reader(&repo).await;
    let info = reader
        .info(&CancellationToken::new(), &"HEAD".into())
        .await
        .unwrap();
    assert_eq!(info.oid.to_hex(), head);
    assert_eq!(info.object_type, ObjectType::Commit);
    assert_eq!(info.size, size);
}

#[tokio::test]
async fn test_unknown_object_in_empty_repository() {
    if !git_supports_batch_command() {
        return;
    }
    let repo = TestRepo::new();
    let reader = reader(&repo).await;
    let ctx = CancellationToken::new();
    let err = reader
        .info(&ctx, &Revision::new("deadbeef".repeat(5)))
        .await
        .unwrap_err();
    assert!(matches!(err, GitError::NotFound(rev) if rev == "deadbeef".repeat(5)));
    assert!(!reader.is_dirty());
}

#[tokio::test]
async fn test_pipelined_object_then_info() {
    if !git_supports_batch_command() {
        return;
    }
    let repo = TestRepo::new();
    let a = repo.write_blob(b"contents of A\n");
    let b = repo.write_blob(b"B");
    let reader = reader(&repo).await;
    let ctx = CancellationToken::new();

    let mut queue = reader.object_queue(&ctx).unwrap();
    queue.request_object(&ctx, &Revision::new(&a)).await.unwrap();
    queue.request_info(&ctx, &Revision::new(&b)).await.unwrap();
    queue.flush(&ctx).await.unwrap();

    let mut object = queue.read_object(&ctx).await.unwrap();
    assert_eq!(object.oid().to_hex(), a);
    assert_eq!(object.read_to_vec().await.unwrap(), b"contents of A\n");
    drop(object);
    let info = queue.read_info(&ctx).await.unwrap();
    assert_eq!(info.oid.to_hex(), b);
    assert_eq!(info.size, 1);
    drop(queue);
    assert!(!reader.is_dirty());
}

#[tokio::test]
async fn test_read_without_flush_blocks() {
    if !git_supports_batch_command() {
        return;
    }
    let repo = TestRepo::new();
    let blob = repo.write_blob(b"payload");
    let reader = reader(&repo).await;
    let ctx = CancellationToken::new();

    let mut queue = reader.object_queue(&ctx).unwrap();
    queue.request_object(&ctx, &Revision::new(&blob)).await.unwrap();
    let waited = tokio::time::timeout(Duration::from_millis(300), queue.read_object(&ctx)).await;
    assert!(waited.is_err());
    drop(queue);
    assert!(reader.is_dirty());
}

#[tokio::test]
async fn test_cancelled_read_poisons_reader() {
    if !git_supports_batch_command() {
        return;
    }
    let repo = TestRepo::new();
    let blob = repo.write_blob(b"payload");
    let reader = reader(&repo).await;
    let ctx = CancellationToken::new();

    let mut queue = reader.object_queue(&ctx).unwrap();
    queue.request_object(&ctx, &Revision::new(&blob)).await.unwrap();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });
    assert!(matches!(
        queue.read_object(&ctx).await,
        Err(GitError::Cancelled)
    ));
    drop(queue);
    assert!(reader.is_dirty());
}

#[tokio::test]
async fn test_half_read_object_gets_a_fresh_process() {
    if !git_supports_batch_command() {
        return;
    }
    let repo = TestRepo::new();
    let blob = repo.write_blob(&vec![b'x'; 4096]);
    let executor = repo.executor();
    let metrics = Arc::new(InMemoryMetrics::default());
    let cache = ReaderCache::new(CacheConfig::default(), metrics.clone()).unwrap();
    let ctx = CancellationToken::new();

    let lease = cache.object_reader(&ctx, &executor).await.unwrap();
    let first_pid = lease.pid();
    assert!(first_pid.is_some());
    let mut object = lease.object(&ctx, &Revision::new(&blob)).await.unwrap();
    let mut half = vec![0u8; 2048];
    object.read_exact(&mut half).await.unwrap();
    drop(object);
    drop(lease);
    assert_eq!(metrics.events(CacheEvent::ReturnedDirty), 1);

    let lease = cache.object_reader(&ctx, &executor).await.unwrap();
    assert_ne!(lease.pid(), first_pid);
    let data = read_object_bytes(&ctx, &*lease, &Revision::new(&blob))
        .await
        .unwrap();
    assert_eq!(data.len(), 4096);
}

#[tokio::test]
async fn test_limited_blob_read_retires_process() {
    if !git_supports_batch_command() {
        return;
    }
    let repo = TestRepo::new();
    let blob = repo.write_blob(&vec![b'y'; 8192]);
    let executor = repo.executor();
    let metrics = Arc::new(InMemoryMetrics::default());
    let cache = ReaderCache::new(CacheConfig::default(), metrics.clone()).unwrap();
    let ctx = CancellationToken::new();

    let lease = cache.object_reader(&ctx, &executor).await.unwrap();
    let first_pid = lease.pid();
    let head = get_blob(&ctx, &*lease, &Revision::new(&blob), Some(100))
        .await
        .unwrap();
    assert_eq!(head.data.len(), 100);
    assert_eq!(head.info.size, 8192);
    drop(lease);
    assert_eq!(metrics.events(CacheEvent::ReturnedDirty), 1);

    let lease = cache.object_reader(&ctx, &executor).await.unwrap();
    assert_ne!(lease.pid(), first_pid);
    let whole = get_blob(&ctx, &*lease, &Revision::new(&blob), None)
        .await
        .unwrap();
    assert_eq!(whole.data.len(), 8192);
}

#[tokio::test]
async fn test_clean_lease_reuses_process() {
    if !git_supports_batch_command() {
        return;
    }
    let repo = TestRepo::new();
    repo.commit_file("a.txt", "a", "first");
    let executor = repo.executor();
    let cache = ReaderCache::new(CacheConfig::default(), Arc::new(InMemoryMetrics::default()))
        .unwrap();
    let ctx = CancellationToken::new();

    let lease = cache.object_reader(&ctx, &executor).await.unwrap();
    let pid = lease.pid();
    lease.info(&ctx, &"HEAD".into()).await.unwrap();
    drop(lease);

    let lease = cache.object_reader(&ctx, &executor).await.unwrap();
    assert_eq!(lease.pid(), pid);
}

#[tokio::test]
async fn test_commits_through_reader() {
    if !git_supports_batch_command() {
        return;
    }
    let repo = TestRepo::new();
    let first = repo.commit_file("a.txt", "a", "first commit");
    let second = repo.commit_file("a.txt", "b", "second commit\n\nWith a body.");
    repo.git(&["tag", "-a", "v1", "-m", "release", &first]);
    let reader = reader(&repo).await;
    let ctx = CancellationToken::new();

    let commit = get_commit(&ctx, &reader, &"v1".into(), DEFAULT_MAX_BODY_SIZE)
        .await
        .unwrap();
    assert_eq!(commit.id.to_hex(), first);
    assert!(commit.parent_ids.is_empty());
    assert_eq!(&commit.subject[..], b"first commit");
    let author = commit.author.unwrap();
    assert_eq!(&author.name[..], b"Catpool Test");
    assert_eq!(&author.email[..], b"test@example.com");
    assert!(author.time().is_some());

    let head = get_commit(&ctx, &reader, &"main".into(), DEFAULT_MAX_BODY_SIZE)
        .await
        .unwrap();
    assert_eq!(head.id.to_hex(), second);
    assert_eq!(head.parent_ids[0].to_hex(), first);
    assert_eq!(&head.body[..], b"second commit\n\nWith a body.\n");

    let missing = get_commit(&ctx, &reader, &"nope".into(), DEFAULT_MAX_BODY_SIZE)
        .await
        .unwrap_err();
    assert!(missing.is_not_found());

    let commits = list_commits_by_ref_name(
        &ctx,
        &reader,
        &[
            ReferenceName::from_branch_name("main"),
            ReferenceName::new("refs/heads/absent"),
            ReferenceName::new("refs/tags/v1"),
        ],
        DEFAULT_MAX_BODY_SIZE,
    )
    .await
    .unwrap();
    let ids: Vec<String> = commits.iter().map(|c| c.id.to_hex()).collect();
    assert_eq!(ids, vec![second, first]);
    assert!(!reader.is_dirty());
}

#[tokio::test]
async fn test_symbolic_head() {
    if !git_supports_batch_command() {
        return;
    }
    let repo = TestRepo::new();
    repo.commit_file("a.txt", "a", "first");
    let ctx = CancellationToken::new();
    let head = get_symbolic_ref(&ctx, &repo.executor(), &ReferenceName::new("HEAD"))
        .await
        .unwrap();
    assert!(head.is_symbolic());
    assert_eq!(
        head.target,
        catpool::internal::reference::ReferenceTarget::Symbolic(ReferenceName::new(
            "refs/heads/main"
        ))
    );
}

#[tokio::test]
async fn test_sha256_repository() {
    if !git_supports_batch_command() {
        return;
    }
    let repo = TestRepo::with_object_format(HashKind::Sha256);
    let head = repo.commit_file("a.txt", "a", "first");
    let reader = reader(&repo).await;
    let info = reader
        .info(&CancellationToken::new(), &"HEAD".into())
        .await
        .unwrap();
    assert_eq!(info.oid.kind(), HashKind::Sha256);
    assert_eq!(info.oid.to_hex(), head);
}

#[tokio::test]
async fn test_closed_reader() {
    if !git_supports_batch_command() {
        return;
    }
    let repo = TestRepo::new();
    let reader = reader(&repo).await;
    reader.close();
    assert!(reader.is_closed());
    assert!(matches!(
        reader.info(&CancellationToken::new(), &"HEAD".into()).await,
        Err(GitError::Closed)
    ));
}
