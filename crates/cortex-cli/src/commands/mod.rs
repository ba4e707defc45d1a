//! Subcommand implementations.

pub mod info;
pub mod phantom;
pub mod project;
pub mod scene;
pub mod skull;
