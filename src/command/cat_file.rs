//! `cat-file`: type, size, existence or contents of a single object.

use clap::{ArgGroup, Parser};
use tokio::io::AsyncWriteExt;

use super::Session;
use crate::internal::{
    catfile::{ObjectReader, ObjectType, get_blob},
    errors::GitError,
    reference::Revision,
};

/// Provide contents or details of a repository object
#[derive(Parser, Debug)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["show_type", "show_size", "pretty", "exists"])
))]
pub struct CatFileArgs {
    /// Show the object type
    #[clap(short = 't')]
    pub show_type: bool,

    /// Show the object size
    #[clap(short = 's')]
    pub show_size: bool,

    /// Print the object contents
    #[clap(short = 'p')]
    pub pretty: bool,

    /// Exit with zero status if the object exists, print nothing
    #[clap(short = 'e')]
    pub exists: bool,

    /// With -p, print at most this many bytes of a blob
    #[clap(long, value_name = "BYTES", requires = "pretty")]
    pub limit: Option<u64>,

    /// The object to show, any revision git understands
    #[clap(value_name = "OBJECT")]
    pub object: String,
}

pub async fn execute(session: &Session, args: CatFileArgs) -> Result<(), GitError> {
    let revision = Revision::new(args.object);
    let reader = session.reader().await?;

    if args.exists {
        match reader.info(&session.ctx, &revision).await {
            Ok(_) => return Ok(()),
            Err(e) if e.is_not_found() => {
                drop(reader);
                session.cache.shutdown();
                std::process::exit(1);
            }
            Err(e) => return Err(e),
        }
    }

    if let Some(limit) = args.limit {
        let blob = get_blob(&session.ctx, &*reader, &revision, Some(limit)).await?;
        let mut stdout = tokio::io::stdout();
        stdout.write_all(&blob.data).await?;
        stdout.flush().await?;
        return Ok(());
    }

    if !args.pretty {
        let info = reader.info(&session.ctx, &revision).await?;
        if args.show_type {
            println!("{}", info.object_type);
        } else if args.show_size {
            println!("{}", info.size);
        }
        return Ok(());
    }

    let mut object = reader.object(&session.ctx, &revision).await?;
    if object.object_type() == ObjectType::Tree {
        object.discard().await?;
        return Err(GitError::InvalidArgument(format!(
            "{revision} is a tree; tree listings are not supported"
        )));
    }
    let mut stdout = tokio::io::stdout();
    tokio::io::copy(&mut object, &mut stdout)
        .await
        .map_err(GitError::from_child_io)?;
    stdout.flush().await?;
    Ok(())
}
