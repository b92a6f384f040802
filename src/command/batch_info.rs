//! `batch-info`: headers of many objects through one pipelined queue lease.

use clap::Parser;

use super::Session;
use crate::internal::{catfile::ObjectReader, errors::GitError, reference::Revision};

/// Print `<oid> <type> <size>` for every object, in argument order
#[derive(Parser, Debug)]
pub struct BatchInfoArgs {
    #[clap(value_name = "OBJECT", required = true, num_args = 1..)]
    pub objects: Vec<String>,
}

pub async fn execute(session: &Session, args: BatchInfoArgs) -> Result<(), GitError> {
    let ctx = &session.ctx;
    let reader = session.reader().await?;
    let mut queue = reader.object_queue(ctx)?;

    let revisions: Vec<Revision> = args.objects.into_iter().map(Revision::new).collect();
    for revision in &revisions {
        queue.request_info(ctx, revision).await?;
    }
    queue.flush(ctx).await?;

    for revision in &revisions {
        match queue.read_info(ctx).await {
            Ok(info) => println!("{info}"),
            Err(GitError::NotFound(_)) => println!("{revision} missing"),
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
