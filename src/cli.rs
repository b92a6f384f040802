//! CLI entry for catpool, defining clap subcommands and dispatching each command handler.

use std::{io::IsTerminal, path::PathBuf};

use clap::{Parser, Subcommand};

use crate::{
    command::{self, Session},
    internal::{config::Config, errors::GitError},
};

#[derive(Parser, Debug)]
#[command(
    about = "catpool: object reads through pooled git cat-file processes",
    version
)]
struct Cli {
    /// Run as if started in <PATH>
    #[arg(short = 'C', global = true, value_name = "PATH", default_value = ".")]
    repository: PathBuf,

    /// TOML configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Provide contents or type and size information for an object")]
    CatFile(command::cat_file::CatFileArgs),
    #[command(about = "Look up many object headers through one pipelined queue")]
    BatchInfo(command::batch_info::BatchInfoArgs),
    #[command(about = "Show a commit")]
    Show(command::show::ShowArgs),
    #[command(about = "Output information on each reference")]
    ForEachRef(command::for_each_ref::ForEachRefArgs),
    #[command(about = "Ensure that a reference name is well formed")]
    CheckRefFormat(command::check_ref_format::CheckRefFormatArgs),
}

/// Parses the command line, or `args` when given, and runs the command.
/// Declared `async` only to get a runtime from `#[tokio::main]`.
#[tokio::main]
pub async fn parse(args: Option<&[&str]>) -> Result<(), GitError> {
    parse_async(args).await
}

/// `async` version of [parse]
pub async fn parse_async(args: Option<&[&str]>) -> Result<(), GitError> {
    let args = match args {
        Some(args) => {
            Cli::try_parse_from(args).map_err(|e| GitError::InvalidArgument(e.to_string()))?
        }
        None => Cli::parse(),
    };

    if !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    if let Commands::CheckRefFormat(args) = args.command {
        return command::check_ref_format::execute(args);
    }

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let session = Session::new(args.repository, config)?;
    let result = match args.command {
        Commands::CatFile(args) => command::cat_file::execute(&session, args).await,
        Commands::BatchInfo(args) => command::batch_info::execute(&session, args).await,
        Commands::Show(args) => command::show::execute(&session, args).await,
        Commands::ForEachRef(args) => command::for_each_ref::execute(&session, args).await,
        Commands::CheckRefFormat(_) => Ok(()),
    };
    session.cache.shutdown();
    result
}
