use crate::builtins::Surface;
use crate::exec::{Endpoints, Executor};
use crate::prompt::Prompt;
use std::io::{self, BufRead, Write};
use tracing::debug;

/// Local read loop around an [`Executor`].
pub struct Shell {
    prompt: Prompt,
    executor: Executor,
}

impl Shell {
    pub fn new(prompt: Prompt) -> Self {
        Self {
            prompt,
            executor: Executor::new(Surface::Local),
        }
    }

    pub fn with_executor(mut self, executor: Executor) -> Self {
        self.executor = executor;
        self
    }

    /// Read and run lines until end of input or `exit`.
    ///
    /// Prompts and the one-line warning/error messages go to `out`; programs
    /// write to the shell's own standard streams.
    pub fn run<R: BufRead, W: Write>(&mut self, mut input: R, mut out: W) -> io::Result<()> {
        let mut buf = Vec::new();

        loop {
            write!(out, "{}", self.prompt.get_string())?;
            out.flush()?;

            let Some(cmd) = read_input_line(&mut input, &mut buf)? else {
                writeln!(out)?;
                break;
            };

            let result =
                self.executor
                    .execute_line(&cmd, Endpoints::inherit(), &mut out, &mut io::stderr());
            match result {
                Ok(outcome) => {
                    if let Some(msg) = outcome.message() {
                        writeln!(out, "{}", msg)?;
                    }
                    if let Some(control) = outcome.control() {
                        debug!(?control, "shell.stop");
                        break;
                    }
                }
                Err(e) => writeln!(out, "{}", e)?,
            }
        }

        Ok(())
    }
}

/// Read one line without its line ending, or `None` at end of input.
///
/// Bytes that are not UTF-8 are replaced rather than rejected, so a stray
/// byte costs one command and not the session.
pub fn read_input_line(input: &mut impl BufRead, buf: &mut Vec<u8>) -> io::Result<Option<String>> {
    buf.clear();
    if input.read_until(b'\n', buf)? == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(buf);
    Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::SH_PROMPT;
    use std::io::Cursor;

    fn session(input: &str) -> String {
        session_bytes(input.as_bytes())
    }

    fn session_bytes(input: &[u8]) -> String {
        let mut out = Vec::<u8>::new();
        Shell::new(Prompt::plain(SH_PROMPT))
            .run(Cursor::new(input.to_vec()), &mut out)
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_warning_then_exit() {
        let out = session("\n  | \nexit\necho never\n");
        assert_eq!(
            out,
            "dsh> warning: no commands provided\n\
             dsh> warning: no commands provided\n\
             dsh> "
        );
    }

    #[test]
    fn test_end_of_input() {
        assert_eq!(session(""), "dsh> \n");
    }

    #[test]
    fn test_pipe_limit_keeps_looping() {
        let line = vec!["cat"; 9].join("|");
        let out = session(&format!("{}\ndragon\n", line));
        assert_eq!(
            out,
            "dsh> error: piping limited to 8 commands\n\
             dsh> rawr (the dragon is resting)\n\
             dsh> \n"
        );
    }

    #[test]
    fn test_invalid_utf8_line_keeps_looping() {
        let out = session_bytes(b"\xff\xfe\ndragon\n");
        assert!(out.starts_with("dsh> error: executing external command"));
        assert!(out.ends_with("dsh> rawr (the dragon is resting)\ndsh> \n"));
    }

    #[test]
    fn test_read_input_line() {
        let mut input = Cursor::new(b"ls\r\n\xffx\nlast".to_vec());
        let mut buf = Vec::new();
        assert_eq!(read_input_line(&mut input, &mut buf).unwrap().as_deref(), Some("ls"));
        assert_eq!(
            read_input_line(&mut input, &mut buf).unwrap().as_deref(),
            Some("\u{FFFD}x")
        );
        assert_eq!(read_input_line(&mut input, &mut buf).unwrap().as_deref(), Some("last"));
        assert_eq!(read_input_line(&mut input, &mut buf).unwrap(), None);
    }
}
