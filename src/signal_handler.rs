use nix::errno::Errno;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;

/// Keep Ctrl+C from killing the interactive shell itself.
pub fn ignore_interrupts() -> nix::Result<()> {
    unsafe { signal::signal(Signal::SIGINT, SigHandler::SigIgn) }.map(|_| ())
}

/// Put back the dispositions a freshly exec'd program expects.
///
/// Ignored signals survive `execvp`, so a stage would otherwise inherit the
/// shell's SIGINT and SIGPIPE settings.
pub fn restore_child_defaults() {
    for sig in [Signal::SIGINT, Signal::SIGPIPE] {
        let _ = unsafe { signal::signal(sig, SigHandler::SigDfl) };
    }
}

/// Retry a system call interrupted by a signal.
pub fn retry_eintr<T>(mut f: impl FnMut() -> nix::Result<T>) -> nix::Result<T> {
    loop {
        match f() {
            Err(Errno::EINTR) => continue,
            result => return result,
        }
    }
}

/// Kill and reap children that must not outlive a failed pipeline.
pub fn terminate_and_reap(pids: &[Pid]) {
    for &pid in pids {
        let _ = signal::kill(pid, Signal::SIGKILL);
    }
    for &pid in pids {
        let _ = retry_eintr(|| waitpid(pid, None));
    }
}
