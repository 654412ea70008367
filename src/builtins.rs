use crate::command::CommandBuffer;
use nix::unistd::{getuid, User};
use std::env;
use std::io::Write;
use std::path::PathBuf;

pub const EXIT_CMD: &str = "exit";
pub const CD_CMD: &str = "cd";
pub const DRAGON_CMD: &str = "dragon";
pub const STOP_SERVER_CMD: &str = "stop-server";

/// Exit status of a piped stage that ran `exit`.
pub const EXIT_REQUESTED_STATUS: i32 = 249;
/// Exit status of a piped stage that ran `stop-server`.
pub const STOP_REQUESTED_STATUS: i32 = 156;

/// Which front end a line came from. Decides the extra built-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Cd,
    Exit,
    Dragon,
    StopServer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinStatus {
    NotBuiltin,
    Executed,
    ExitRequested,
    StopRequested,
}

impl Builtin {
    pub fn lookup(name: &str, surface: Surface) -> Option<Self> {
        match (name, surface) {
            (CD_CMD, _) => Some(Builtin::Cd),
            (EXIT_CMD, _) => Some(Builtin::Exit),
            (DRAGON_CMD, Surface::Local) => Some(Builtin::Dragon),
            (STOP_SERVER_CMD, Surface::Remote) => Some(Builtin::StopServer),
            _ => None,
        }
    }
}

impl BuiltinStatus {
    /// Status a pipeline stage exits with after running a built-in.
    pub fn exit_status(self) -> Option<i32> {
        match self {
            BuiltinStatus::NotBuiltin => None,
            BuiltinStatus::Executed => Some(0),
            BuiltinStatus::ExitRequested => Some(EXIT_REQUESTED_STATUS),
            BuiltinStatus::StopRequested => Some(STOP_REQUESTED_STATUS),
        }
    }
}

/// Run `cmd` in the calling process if it names a built-in.
///
/// Errors from the built-in itself (a failed `cd`) are written to `err` and
/// still count as executed.
pub fn exec_builtin(
    cmd: &CommandBuffer,
    surface: Surface,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> BuiltinStatus {
    let Some(builtin) = Builtin::lookup(cmd.exe(), surface) else {
        return BuiltinStatus::NotBuiltin;
    };

    match builtin {
        Builtin::Cd => {
            match cmd.args().next() {
                Some(path) => {
                    if let Err(e) = env::set_current_dir(path) {
                        let _ = writeln!(err, "cd: {}: {}", path, e);
                    }
                }
                None => match home_dir() {
                    Some(home) => {
                        if let Err(e) = env::set_current_dir(&home) {
                            let _ = writeln!(err, "cd: {}: {}", home.display(), e);
                        }
                    }
                    None => {
                        let _ = writeln!(err, "cd: home directory not known");
                    }
                },
            }
            BuiltinStatus::Executed
        }
        Builtin::Exit => BuiltinStatus::ExitRequested,
        Builtin::StopServer => BuiltinStatus::StopRequested,
        Builtin::Dragon => {
            let _ = writeln!(out, "rawr (the dragon is resting)");
            let _ = out.flush();
            BuiltinStatus::Executed
        }
    }
}

/// Home directory of the invoking user.
pub fn home_dir() -> Option<PathBuf> {
    match env::var_os("HOME") {
        Some(home) if !home.is_empty() => Some(PathBuf::from(home)),
        _ => User::from_uid(getuid()).ok().flatten().map(|user| user.dir),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;

    fn command(line: &str) -> CommandBuffer {
        let limits = Limits::default();
        let mut cmd = CommandBuffer::alloc(&limits).unwrap();
        cmd.build(line, &limits).unwrap();
        cmd
    }

    fn run(line: &str, surface: Surface) -> (BuiltinStatus, String, String) {
        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();
        let status = exec_builtin(&command(line), surface, &mut out, &mut err);
        (
            status,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn test_lookup() {
        assert_eq!(Builtin::lookup("cd", Surface::Local), Some(Builtin::Cd));
        assert_eq!(Builtin::lookup("exit", Surface::Remote), Some(Builtin::Exit));
        assert_eq!(Builtin::lookup("dragon", Surface::Local), Some(Builtin::Dragon));
        assert_eq!(Builtin::lookup("dragon", Surface::Remote), None);
        assert_eq!(
            Builtin::lookup("stop-server", Surface::Remote),
            Some(Builtin::StopServer)
        );
        assert_eq!(Builtin::lookup("stop-server", Surface::Local), None);
        assert_eq!(Builtin::lookup("ls", Surface::Local), None);
        assert_eq!(Builtin::lookup("CD", Surface::Local), None);
    }

    #[test]
    fn test_exit() {
        let (status, out, err) = run("exit", Surface::Local);
        assert_eq!(status, BuiltinStatus::ExitRequested);
        assert!(out.is_empty() && err.is_empty());
    }

    #[test]
    fn test_stop_server_only_remote() {
        assert_eq!(run("stop-server", Surface::Remote).0, BuiltinStatus::StopRequested);
        assert_eq!(run("stop-server", Surface::Local).0, BuiltinStatus::NotBuiltin);
    }

    #[test]
    fn test_not_builtin() {
        assert_eq!(run("echo cd", Surface::Local).0, BuiltinStatus::NotBuiltin);
    }

    #[test]
    fn test_dragon() {
        let (status, out, _) = run("dragon", Surface::Local);
        assert_eq!(status, BuiltinStatus::Executed);
        assert!(out.starts_with("rawr"));
    }

    #[test]
    fn test_cd_failure_is_reported() {
        let before = env::current_dir().unwrap();
        let (status, _, err) = run("cd /definitely/not/a/dir", Surface::Local);
        assert_eq!(status, BuiltinStatus::Executed);
        assert!(err.starts_with("cd: /definitely/not/a/dir:"));
        assert_eq!(env::current_dir().unwrap(), before);
    }

    #[test]
    fn test_exit_statuses_are_distinct() {
        assert_eq!(BuiltinStatus::NotBuiltin.exit_status(), None);
        assert_eq!(BuiltinStatus::Executed.exit_status(), Some(0));
        assert_ne!(
            BuiltinStatus::ExitRequested.exit_status(),
            BuiltinStatus::StopRequested.exit_status()
        );
    }
}
