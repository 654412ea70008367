use crate::builtins::{
    exec_builtin, Builtin, BuiltinStatus, Surface, EXIT_REQUESTED_STATUS, STOP_REQUESTED_STATUS,
};
use crate::command::CommandBuffer;
use crate::config::Limits;
use crate::error::{Control, Outcome, ShellError, Warning};
use crate::pipes::{parse_pipeline, CommandList, PipeSet};
use crate::signal_handler::{restore_child_defaults, retry_eintr, terminate_and_reap};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execvp, fork, pipe2, ForkResult, Pid};
use std::ffi::CString;
use std::fs::File;
use std::io::{self, Read, Write};
use std::mem::ManuallyDrop;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use tracing::{debug, warn};

/// Status a stage exits with when its program could not be executed.
///
/// Only a report on the stage's exec status pipe makes the parent treat a
/// stage as unexecuted; a program exiting 127 on its own is an ordinary exit.
pub const EXEC_FAILED_STATUS: i32 = 127;

/// Descriptors that replace the terminal at the outer ends of a pipeline.
///
/// `stdin` feeds the first stage, `stdout` and `stderr` receive the last
/// stage's output. `None` keeps whatever the shell itself has.
#[derive(Debug, Clone, Copy, Default)]
pub struct Endpoints<'a> {
    pub stdin: Option<BorrowedFd<'a>>,
    pub stdout: Option<BorrowedFd<'a>>,
    pub stderr: Option<BorrowedFd<'a>>,
}

impl<'a> Endpoints<'a> {
    pub fn inherit() -> Self {
        Self::default()
    }

    /// Bind all three streams to one descriptor, e.g. a client socket.
    pub fn all(fd: BorrowedFd<'a>) -> Self {
        Self {
            stdin: Some(fd),
            stdout: Some(fd),
            stderr: Some(fd),
        }
    }

    pub fn with_stdin(mut self, fd: BorrowedFd<'a>) -> Self {
        self.stdin = Some(fd);
        self
    }

    pub fn with_stdout(mut self, fd: BorrowedFd<'a>) -> Self {
        self.stdout = Some(fd);
        self
    }

    pub fn with_stderr(mut self, fd: BorrowedFd<'a>) -> Self {
        self.stderr = Some(fd);
        self
    }
}

#[derive(Debug)]
struct Stage {
    pid: Pid,
    command: String,
    /// Ran as a built-in, so its exit status may carry a control request.
    builtin: bool,
    /// Why the program could not be started, as reported by the stage.
    exec_error: Option<Errno>,
}

/// A pipeline whose stages have all been started.
///
/// Dropping it without calling [`RunningPipeline::wait`] kills and reaps
/// every stage.
#[derive(Debug)]
pub struct RunningPipeline {
    stages: Vec<Stage>,
}

enum LastStage {
    Exited(String, i32),
    Signaled(String, String),
}

impl RunningPipeline {
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.stages.iter().map(|s| s.pid).collect()
    }

    /// Wait for every stage and fold their statuses into one outcome.
    ///
    /// A built-in stage that asked to stop the server or to exit wins over
    /// anything else. After that a stage whose program could not be executed
    /// is reported, and otherwise the last stage decides. Non-zero exits and
    /// signals of earlier stages are not reported.
    pub fn wait(mut self) -> Result<Outcome, ShellError> {
        let stages = std::mem::take(&mut self.stages);
        let total = stages.len();

        let mut control = None;
        let mut exec_failed = None;
        let mut wait_error = None;
        let mut last = None;

        for (i, stage) in stages.into_iter().enumerate() {
            let is_last = i + 1 == total;
            if stage.exec_error.is_some() {
                exec_failed.get_or_insert_with(|| stage.command.clone());
            }
            match retry_eintr(|| waitpid(stage.pid, None)) {
                Ok(WaitStatus::Exited(_, code)) => {
                    debug!(pid = %stage.pid, command = %stage.command, code, "pipeline.wait");
                    match code {
                        STOP_REQUESTED_STATUS if stage.builtin => {
                            control = Some(Control::StopServer);
                        }
                        EXIT_REQUESTED_STATUS if stage.builtin => {
                            control.get_or_insert(Control::Exit);
                        }
                        _ => {}
                    }
                    if is_last {
                        last = Some(LastStage::Exited(stage.command, code));
                    }
                }
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    debug!(pid = %stage.pid, command = %stage.command, signal = signal.as_str(), "pipeline.wait");
                    if is_last {
                        last = Some(LastStage::Signaled(stage.command, signal.as_str().to_string()));
                    }
                }
                Ok(other) => {
                    debug!(pid = %stage.pid, status = ?other, "pipeline.wait");
                }
                Err(source) => {
                    warn!(pid = %stage.pid, command = %stage.command, error = %source, "pipeline.wait failed");
                    wait_error.get_or_insert(ShellError::Wait {
                        command: stage.command,
                        source,
                    });
                }
            }
        }

        if let Some(control) = control {
            return Ok(Outcome::Control(control));
        }
        if let Some(err) = wait_error {
            return Err(err);
        }
        if let Some(command) = exec_failed {
            return Err(ShellError::Execute { command });
        }
        match last {
            Some(LastStage::Exited(_, 0)) | None => Ok(Outcome::Success),
            Some(LastStage::Exited(command, code)) => Err(ShellError::Exited { command, code }),
            Some(LastStage::Signaled(command, signal)) => {
                Err(ShellError::Signaled { command, signal })
            }
        }
    }
}

impl Drop for RunningPipeline {
    fn drop(&mut self) {
        if !self.stages.is_empty() {
            terminate_and_reap(&self.pids());
        }
    }
}

/// Start one process per command, connected by pipes.
///
/// By the time this returns the caller holds no pipe descriptor, so the last
/// reader sees end of input as soon as every writer has exited.
pub fn spawn_pipeline(
    list: &CommandList,
    surface: Surface,
    endpoints: Endpoints<'_>,
) -> Result<RunningPipeline, ShellError> {
    // argv is built before forking so a stage only has to exec
    let argvs = list
        .iter()
        .map(CommandBuffer::to_cstrings)
        .collect::<Result<Vec<_>, _>>()?;

    let pipes = PipeSet::create(list.len())?;
    debug!(stages = list.len(), pipes = pipes.len(), "pipeline.start");

    // anything still buffered would otherwise be written again by every child
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();

    let mut running = RunningPipeline {
        stages: Vec::with_capacity(list.len()),
    };
    let mut exec_reports = Vec::with_capacity(list.len());

    for (i, (cmd, argv)) in list.iter().zip(&argvs).enumerate() {
        let builtin = Builtin::lookup(cmd.exe(), surface).is_some();
        // the write end reaches EOF at exec, or carries the errno when exec fails
        let (report_rx, report_tx) = pipe2(OFlag::O_CLOEXEC).map_err(ShellError::Pipe)?;

        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                // siblings belong to the parent; never kill them from here
                std::mem::forget(running);
                drop(report_rx);
                let stage = StageIo {
                    index: i,
                    total: list.len(),
                    pipes,
                    endpoints,
                    report: report_tx,
                };
                run_stage(stage, cmd, argv, surface);
            }
            Ok(ForkResult::Parent { child }) => {
                drop(report_tx);
                debug!(stage = i, pid = %child, command = %cmd.exe(), builtin, "pipeline.spawn");
                running.stages.push(Stage {
                    pid: child,
                    command: cmd.exe().to_string(),
                    builtin,
                    exec_error: None,
                });
                exec_reports.push(report_rx);
            }
            Err(source) => {
                warn!(stage = i, command = %cmd.exe(), error = %source, "pipeline.spawn failed");
                // dropping `running` terminates and reaps the stages already started
                return Err(ShellError::Fork {
                    command: cmd.exe().to_string(),
                    source,
                });
            }
        }
    }

    pipes.close_all();

    for (stage, report) in running.stages.iter_mut().zip(exec_reports) {
        stage.exec_error = read_exec_report(report);
        if let Some(errno) = stage.exec_error {
            debug!(pid = %stage.pid, command = %stage.command, error = %errno, "pipeline.exec failed");
        }
    }
    Ok(running)
}

/// Errno a stage sent before giving up on exec, or `None` once the report
/// pipe closes empty.
fn read_exec_report(report: OwnedFd) -> Option<Errno> {
    let mut buf = Vec::with_capacity(4);
    if let Err(e) = File::from(report).read_to_end(&mut buf) {
        warn!(error = %e, "pipeline.exec report unreadable");
        return None;
    }
    let bytes: [u8; 4] = buf.get(..4)?.try_into().ok()?;
    Some(Errno::from_raw(i32::from_ne_bytes(bytes)))
}

/// Spawn the pipeline and wait for it.
pub fn run_pipeline(
    list: &CommandList,
    surface: Surface,
    endpoints: Endpoints<'_>,
) -> Result<Outcome, ShellError> {
    spawn_pipeline(list, surface, endpoints)?.wait()
}

/// Descriptors a forked stage starts from.
struct StageIo<'a> {
    index: usize,
    total: usize,
    pipes: PipeSet,
    endpoints: Endpoints<'a>,
    report: OwnedFd,
}

/// Body of a forked stage. Never returns into shell logic.
fn run_stage(stage_io: StageIo<'_>, cmd: &CommandBuffer, argv: &[CString], surface: Surface) -> ! {
    let StageIo {
        index,
        total,
        pipes,
        endpoints,
        report,
    } = stage_io;
    restore_child_defaults();

    let stdin = pipes
        .reader_for(index)
        .map(AsRawFd::as_raw_fd)
        .or_else(|| endpoints.stdin.map(|fd| fd.as_raw_fd()));
    let stdout = pipes
        .writer_for(index)
        .map(AsRawFd::as_raw_fd)
        .or_else(|| endpoints.stdout.map(|fd| fd.as_raw_fd()));
    let stderr = if index + 1 == total {
        endpoints.stderr.map(|fd| fd.as_raw_fd())
    } else {
        None
    };

    let wiring = [
        (stdin, libc::STDIN_FILENO),
        (stdout, libc::STDOUT_FILENO),
        (stderr, libc::STDERR_FILENO),
    ];
    for (source, target) in wiring {
        if let Some(fd) = source {
            if let Err(e) = redirect(fd, target) {
                let _ = writeln!(RawStdio::stderr(), "rdsh: dup2: {}", e);
                report_exec_failure(report, e);
            }
        }
    }
    pipes.close_all();

    if Builtin::lookup(cmd.exe(), surface).is_some() {
        drop(report);
        let status = exec_builtin(cmd, surface, &mut RawStdio::stdout(), &mut RawStdio::stderr());
        child_exit(status.exit_status().unwrap_or(0));
    }

    let Some(program) = argv.first() else {
        report_exec_failure(report, Errno::ENOENT);
    };
    let err = match execvp(program, argv) {
        Err(e) => e,
        Ok(never) => match never {},
    };
    let _ = writeln!(RawStdio::stderr(), "{}: {}", cmd.exe(), err);
    report_exec_failure(report, err)
}

/// Tell the parent why exec never happened, then leave.
fn report_exec_failure(report: OwnedFd, err: Errno) -> ! {
    let _ = File::from(report).write_all(&(err as i32).to_ne_bytes());
    child_exit(EXEC_FAILED_STATUS)
}

fn redirect(fd: RawFd, target: RawFd) -> nix::Result<()> {
    if fd == target {
        return Ok(());
    }
    retry_eintr(|| Errno::result(unsafe { libc::dup2(fd, target) })).map(drop)
}

fn child_exit(code: i32) -> ! {
    unsafe { libc::_exit(code) }
}

/// Unbuffered writer on a standard descriptor of a forked stage.
///
/// Bypasses `std::io::stdout`, whose lock may have been held by another
/// thread of the parent at fork time.
struct RawStdio(ManuallyDrop<File>);

impl RawStdio {
    fn stdout() -> Self {
        Self(ManuallyDrop::new(unsafe { File::from_raw_fd(libc::STDOUT_FILENO) }))
    }

    fn stderr() -> Self {
        Self(ManuallyDrop::new(unsafe { File::from_raw_fd(libc::STDERR_FILENO) }))
    }
}

impl Write for RawStdio {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self.0).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs whole input lines: parse, then built-in or pipeline.
#[derive(Debug, Clone, Copy)]
pub struct Executor {
    pub limits: Limits,
    pub surface: Surface,
}

impl Executor {
    pub fn new(surface: Surface) -> Self {
        Self {
            limits: Limits::default(),
            surface,
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Execute one line.
    ///
    /// A lone built-in runs right here, so `cd` moves this process. In a
    /// pipeline every command, built-ins included, gets its own process.
    /// `out` and `err` receive what in-process built-ins print.
    pub fn execute_line(
        &self,
        line: &str,
        endpoints: Endpoints<'_>,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<Outcome, ShellError> {
        let Some(mut list) = parse_pipeline(line, &self.limits)? else {
            return Ok(Outcome::Warning(Warning::NoCommands));
        };

        let result = match list.get(0) {
            Some(cmd) if list.len() == 1 => match exec_builtin(cmd, self.surface, out, err) {
                BuiltinStatus::NotBuiltin => run_pipeline(&list, self.surface, endpoints),
                BuiltinStatus::Executed => Ok(Outcome::Success),
                BuiltinStatus::ExitRequested => Ok(Outcome::Control(Control::Exit)),
                BuiltinStatus::StopRequested => Ok(Outcome::Control(Control::StopServer)),
            },
            _ => run_pipeline(&list, self.surface, endpoints),
        };

        list.release();
        result
    }
}
