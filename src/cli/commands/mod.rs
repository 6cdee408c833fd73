//! Subcommand implementations.

pub mod fetch;
pub mod status;
pub mod sync;
pub mod watch;
