//! Subcommand implementations.

pub mod consume;
pub mod produce;
pub mod shards;
