//! Internal layer: object hashes, errors, configuration, the git executor,
//! references and the cat-file reader pool.

pub mod catfile;
pub mod config;
pub mod errors;
pub mod executor;
pub mod hash;
pub mod reference;
