use rdsh::builtins::Surface;
use rdsh::exec::{Endpoints, Executor};
use rdsh::Outcome;
use std::env;
use std::io::{Read, Seek, SeekFrom};
use std::os::fd::AsFd;
use std::sync::Mutex;

// every test here reads or changes the process working directory
static CWD: Mutex<()> = Mutex::new(());

fn execute(line: &str) -> (Outcome, String) {
    let mut stdout = tempfile::tempfile().unwrap();
    let (mut out, mut err) = (Vec::<u8>::new(), Vec::<u8>::new());
    let outcome = Executor::new(Surface::Local)
        .execute_line(line, Endpoints::inherit().with_stdout(stdout.as_fd()), &mut out, &mut err)
        .unwrap();

    let mut captured = String::from_utf8(out).unwrap();
    stdout.seek(SeekFrom::Start(0)).unwrap();
    stdout.read_to_string(&mut captured).unwrap();
    (outcome, captured)
}

#[test]
fn piped_cd_leaves_shell_directory_alone() {
    let _guard = CWD.lock().unwrap_or_else(|e| e.into_inner());
    let start = env::current_dir().unwrap();

    let (outcome, out) = execute("cd /tmp | pwd");
    assert_eq!(outcome, Outcome::Success);
    assert_eq!(out.trim_end(), start.to_str().unwrap());
    assert_eq!(env::current_dir().unwrap(), start);
}

#[test]
fn lone_cd_changes_shell_directory() {
    let _guard = CWD.lock().unwrap_or_else(|e| e.into_inner());
    let start = env::current_dir().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().canonicalize().unwrap();

    let (outcome, _) = execute(&format!("cd {}", target.display()));
    assert_eq!(outcome, Outcome::Success);
    assert_eq!(env::current_dir().unwrap(), target);

    let (_, out) = execute("pwd");
    assert_eq!(out.trim_end(), target.to_str().unwrap());

    env::set_current_dir(start).unwrap();
}

#[test]
fn cd_without_argument_goes_home() {
    let _guard = CWD.lock().unwrap_or_else(|e| e.into_inner());
    let start = env::current_dir().unwrap();
    let home = env::var_os("HOME");
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().canonicalize().unwrap();

    env::set_var("HOME", &target);
    let (outcome, _) = execute("cd");
    let now = env::current_dir().unwrap();

    match home {
        Some(home) => env::set_var("HOME", home),
        None => env::remove_var("HOME"),
    }
    env::set_current_dir(start).unwrap();

    assert_eq!(outcome, Outcome::Success);
    assert_eq!(now, target);
}

#[test]
fn cd_to_missing_directory_reports_and_stays() {
    let _guard = CWD.lock().unwrap_or_else(|e| e.into_inner());
    let start = env::current_dir().unwrap();

    let (outcome, _) = execute("cd /no/such/dir/rdsh-test");
    assert_eq!(outcome, Outcome::Success);
    assert_eq!(env::current_dir().unwrap(), start);
}
