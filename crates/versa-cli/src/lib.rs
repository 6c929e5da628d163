//! Argument parsing, configuration loading, the filesystem watcher, the
//! dev server, and tracing setup for VersaCompile, per spec.md §1's
//! "deliberately out of scope" list and SPEC_FULL.md's crate split.
//!
//! `versa-core` supplies the engineering-dense subsystems; this crate
//! wires them to the outside world and ships the `versa` / `versa-server`
//! binaries.

pub mod args;
pub mod config_loader;
pub mod driver;
pub mod server;
pub mod watch;

pub use args::{CliArgs, Mode};
