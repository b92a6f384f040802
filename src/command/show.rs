//! `show`: a commit's metadata and message, read through the reader pool.

use clap::Parser;
use colored::Colorize;

use super::Session;
use crate::internal::{
    catfile::{Commit, Signature, get_commit},
    errors::GitError,
    reference::Revision,
};

/// Show a commit
#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Commit, branch or tag to show. Defaults to HEAD
    #[clap(value_name = "OBJECT")]
    pub object: Option<String>,

    /// Print only the commit id and subject
    #[clap(long)]
    pub oneline: bool,
}

pub async fn execute(session: &Session, args: ShowArgs) -> Result<(), GitError> {
    let revision = Revision::new(args.object.unwrap_or_else(|| "HEAD".to_string()));
    let reader = session.reader().await?;
    let commit = get_commit(
        &session.ctx,
        &*reader,
        &revision,
        session.config.commit.max_body_size,
    )
    .await?;

    if args.oneline {
        println!(
            "{} {}",
            commit.id.to_string().as_str().yellow(),
            String::from_utf8_lossy(&commit.subject)
        );
    } else {
        print!("{}", render_commit(&commit));
    }
    Ok(())
}

fn render_commit(commit: &Commit) -> String {
    let mut out = format!("{} {}\n", "commit".yellow(), commit.id.to_string().as_str().yellow());
    if commit.parent_ids.len() > 1 {
        let parents: Vec<String> = commit
            .parent_ids
            .iter()
            .map(|p| p.to_hex()[..7].to_string())
            .collect();
        out.push_str(&format!("Merge: {}\n", parents.join(" ")));
    }
    if let Some(author) = &commit.author {
        out.push_str(&format!("Author: {}\n", identity(author)));
        if let Some(time) = author.time() {
            out.push_str(&format!("Date:   {}\n", time.format("%a %b %e %H:%M:%S %Y %z")));
        }
    }
    out.push('\n');
    for line in String::from_utf8_lossy(&commit.body).lines() {
        out.push_str(&format!("    {line}\n"));
    }
    if commit.body_size > commit.body.len() as u64 {
        out.push_str(&format!(
            "    {}\n",
            format!("[message truncated, {} bytes]", commit.body_size)
                .as_str()
                .dimmed()
        ));
    }
    out
}

fn identity(signature: &Signature) -> String {
    format!(
        "{} <{}>",
        String::from_utf8_lossy(&signature.name),
        String::from_utf8_lossy(&signature.email)
    )
}
