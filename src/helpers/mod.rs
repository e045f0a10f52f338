//! Side-effecting building blocks for recipe steps: downloads, archives,
//! checksums, shell commands and file moves.

pub mod download;
pub mod extract;
pub mod fs_utils;
pub mod hash;
pub mod shell;
