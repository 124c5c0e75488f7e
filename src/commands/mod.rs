//! Command implementations for the CLI
//!
//! Each subcommand defined in `cli.rs` is implemented in its own module here.

pub mod compose;
