//! catpool: a pooled, pipelined object reader over `git cat-file --batch-command`.
//!
//! The library lives under [`internal`]; [`cli`] and [`command`] make up the
//! `catpool` binary.

pub mod cli;
pub mod command;
pub mod internal;
pub mod utils;
