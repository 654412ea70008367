use nix::errno::Errno;
use std::collections::TryReserveError;
use std::io;

pub const OK: i32 = 0;
pub const WARN_NO_CMDS: i32 = -1;
pub const ERR_TOO_MANY_COMMANDS: i32 = -2;
pub const ERR_CMD_OR_ARGS_TOO_BIG: i32 = -3;
pub const ERR_MEMORY: i32 = -5;
pub const ERR_EXEC_CMD: i32 = -6;
pub const OK_EXIT: i32 = -7;
pub const ERR_RDSH_COMMUNICATION: i32 = -50;
pub const STOP_SERVER_SC: i32 = -100;

/// Result of handing one line to the shell when nothing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Warning(Warning),
    Control(Control),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Warning {
    NoCommands,
}

/// Requests to stop reading input. Never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Leave the current command loop (or close the current connection).
    Exit,
    /// Shut the whole remote server down.
    StopServer,
}

impl Outcome {
    pub fn code(&self) -> i32 {
        match self {
            Outcome::Success => OK,
            Outcome::Warning(Warning::NoCommands) => WARN_NO_CMDS,
            Outcome::Control(Control::Exit) => OK_EXIT,
            Outcome::Control(Control::StopServer) => STOP_SERVER_SC,
        }
    }

    /// Line shown to the user, if any.
    pub fn message(&self) -> Option<&'static str> {
        match self {
            Outcome::Warning(Warning::NoCommands) => Some("warning: no commands provided"),
            _ => None,
        }
    }

    pub fn control(&self) -> Option<Control> {
        match self {
            Outcome::Control(c) => Some(*c),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("error: piping limited to {max} commands")]
    TooManyCommands { max: usize },

    #[error("error: command or arguments too large: {command}")]
    CommandTooLarge { command: String },

    #[error("error: memory allocation failed: {0}")]
    Memory(#[from] TryReserveError),

    #[error("error: failed to create pipe: {0}")]
    Pipe(#[source] Errno),

    #[error("error: failed to fork `{command}`: {source}")]
    Fork {
        command: String,
        #[source]
        source: Errno,
    },

    #[error("error: executing external command {command}")]
    Execute { command: String },

    #[error("error: {command} exited with code {code}")]
    Exited { command: String, code: i32 },

    #[error("error: {command} terminated by signal {signal}")]
    Signaled { command: String, signal: String },

    #[error("error: waiting for {command} failed: {source}")]
    Wait {
        command: String,
        #[source]
        source: Errno,
    },

    #[error("rdsh-error: communications error: {0}")]
    Communication(#[from] io::Error),
}

impl ShellError {
    pub fn code(&self) -> i32 {
        match self {
            ShellError::TooManyCommands { .. } => ERR_TOO_MANY_COMMANDS,
            ShellError::CommandTooLarge { .. } => ERR_CMD_OR_ARGS_TOO_BIG,
            ShellError::Memory(_) | ShellError::Pipe(_) | ShellError::Fork { .. } => ERR_MEMORY,
            ShellError::Execute { .. }
            | ShellError::Exited { .. }
            | ShellError::Signaled { .. }
            | ShellError::Wait { .. } => ERR_EXEC_CMD,
            ShellError::Communication(_) => ERR_RDSH_COMMUNICATION,
        }
    }

    /// Exit status of the failing program, when it ran to completion.
    pub fn exit_status(&self) -> Option<i32> {
        match self {
            ShellError::Exited { code, .. } => Some(*code),
            _ => None,
        }
    }
}
