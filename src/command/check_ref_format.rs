//! `check-ref-format`: validate a reference name without touching a repository.

use clap::Parser;

use crate::internal::{errors::GitError, reference::validate_reference};

/// Ensure that a reference name is well formed
#[derive(Parser, Debug)]
pub struct CheckRefFormatArgs {
    /// Fully qualified name, e.g. refs/heads/main
    #[clap(value_name = "REFNAME")]
    pub name: String,
}

pub fn execute(args: CheckRefFormatArgs) -> Result<(), GitError> {
    validate_reference(&args.name)?;
    Ok(())
}
