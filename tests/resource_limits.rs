//! Descriptor exhaustion while setting up a pipeline. Kept in its own binary:
//! the descriptor limit is process-wide.

use nix::errno::Errno;
use nix::sys::resource::{getrlimit, setrlimit, Resource};
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;
use rdsh::builtins::Surface;
use rdsh::config::Limits;
use rdsh::exec::{spawn_pipeline, Endpoints};
use rdsh::pipes::{parse_pipeline, PipeSet};
use rdsh::ShellError;
use std::fs;
use std::sync::Mutex;

static RLIMIT: Mutex<()> = Mutex::new(());

/// Open descriptors and the highest one, not counting the directory handle
/// used to list them.
fn open_fds() -> (usize, i32) {
    let fds: Vec<i32> = fs::read_dir("/proc/self/fd")
        .unwrap()
        .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
        .collect();
    let highest = fds.iter().copied().max().unwrap_or(0);
    (fds.len() - 1, highest)
}

/// Run `f` with room for exactly `spare` more descriptors.
fn with_spare_fds<T>(spare: u64, f: impl FnOnce() -> T) -> T {
    let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE).unwrap();
    let (open, highest) = open_fds();
    let limit = open as u64 + spare;
    assert!((highest as u64) < limit, "descriptor table too sparse for this test");

    setrlimit(Resource::RLIMIT_NOFILE, limit, hard).unwrap();
    let result = f();
    setrlimit(Resource::RLIMIT_NOFILE, soft, hard).unwrap();
    result
}

#[test]
fn failed_pipe_creation_closes_earlier_pipes() {
    let _guard = RLIMIT.lock().unwrap_or_else(|e| e.into_inner());
    let (before, _) = open_fds();

    let result = with_spare_fds(9, || PipeSet::create(20));

    assert!(matches!(result, Err(ShellError::Pipe(Errno::EMFILE))));
    assert_eq!(open_fds().0, before);
}

#[test]
fn failed_spawn_kills_and_reaps_started_stages() {
    let _guard = RLIMIT.lock().unwrap_or_else(|e| e.into_inner());
    let list = parse_pipeline("sleep 30 | sleep 30 | sleep 30 | sleep 30", &Limits::default())
        .unwrap()
        .unwrap();
    let (before, _) = open_fds();

    // 6 for the joining pipes, then each started stage keeps one more open
    // until all are running; the third stage does not fit
    let result = with_spare_fds(9, || {
        spawn_pipeline(&list, Surface::Local, Endpoints::inherit()).map(|running| running.len())
    });

    assert!(matches!(result, Err(ShellError::Pipe(Errno::EMFILE))));
    assert_eq!(
        waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)),
        Err(Errno::ECHILD)
    );
    assert_eq!(open_fds().0, before);
}
