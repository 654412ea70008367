//! rdsh: a small pipeline shell.
//!
//! A line is split on `|` into commands ([`pipes::parse_pipeline`]), each
//! command into an argument vector ([`command::CommandBuffer`]). A lone
//! built-in runs in the calling process; everything else runs as a pipeline of
//! forked processes joined by pipes ([`exec::spawn_pipeline`]). The
//! [`remote`] module serves the same executor over TCP, with the client
//! socket standing in for the terminal.

pub mod builtins;
pub mod command;
pub mod config;
pub mod error;
pub mod exec;
pub mod pipes;
pub mod prompt;
pub mod remote;
pub mod shell;
pub mod signal_handler;

pub use error::{Control, Outcome, ShellError, Warning};
pub use exec::{Endpoints, Executor};
pub use shell::Shell;
