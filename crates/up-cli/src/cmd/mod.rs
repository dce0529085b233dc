//! Subcommand implementations.

pub mod dependency;
pub mod function;
