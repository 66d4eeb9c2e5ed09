//! Filesystem helpers.

pub mod filename;
pub mod lock;
