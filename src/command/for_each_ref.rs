//! `for-each-ref`: list references with their targets.

use clap::Parser;

use super::Session;
use crate::internal::{
    errors::GitError,
    reference::{
        GetReferencesConfig, InternalReferenceType, ReferenceTarget, get_references,
        internal_reference_type,
    },
};

/// Output information on each reference
#[derive(Parser, Debug)]
pub struct ForEachRefArgs {
    /// Stop after this many references
    #[clap(long, value_name = "N")]
    pub count: Option<u32>,

    /// Leave out hidden internal references such as refs/keep-around/
    #[clap(long)]
    pub hide_internal: bool,

    /// Only references matching these patterns
    #[clap(value_name = "PATTERN")]
    pub patterns: Vec<String>,
}

pub async fn execute(session: &Session, args: ForEachRefArgs) -> Result<(), GitError> {
    let refs = get_references(
        &session.ctx,
        &session.repository,
        &GetReferencesConfig {
            patterns: args.patterns,
            limit: args.count,
        },
    )
    .await?;

    for reference in refs {
        if args.hide_internal
            && internal_reference_type(reference.name.as_str())
                == Some(InternalReferenceType::Hidden)
        {
            continue;
        }
        match &reference.target {
            ReferenceTarget::Direct(oid) => println!("{oid} {}", reference.name),
            ReferenceTarget::Symbolic(target) => println!("{} -> {target}", reference.name),
        }
    }
    Ok(())
}
