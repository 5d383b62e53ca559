//! Subcommands of the `djrender` binary.

pub mod config;
pub mod engine;
pub mod info;
pub mod render;
