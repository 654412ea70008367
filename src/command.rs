use crate::config::Limits;
use crate::error::ShellError;
use std::ffi::CString;
use std::fmt;
use std::ops::Range;

const QUOTE_CHAR: char = '"';

/// One parsed command.
///
/// Tokens live back to back in a single owned text block; `argv` holds the
/// byte span of each token, the executable name first. Nothing outside the
/// buffer can point into the text, so releasing it cannot leave dangling
/// tokens behind.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    text: String,
    argv: Vec<Range<usize>>,
}

impl CommandBuffer {
    /// Acquire storage for one command of at most `limits` size.
    pub fn alloc(limits: &Limits) -> Result<Self, ShellError> {
        let mut buf = Self::default();
        buf.reserve(limits)?;
        Ok(buf)
    }

    fn reserve(&mut self, limits: &Limits) -> Result<(), ShellError> {
        self.text.try_reserve_exact(limits.command_capacity())?;
        self.argv.try_reserve_exact(limits.max_argv)?;
        Ok(())
    }

    /// Populate the buffer from one pipeline segment.
    ///
    /// Splits on whitespace; a pair of double quotes keeps whitespace inside
    /// a token and the quotes themselves are dropped. A segment with no
    /// tokens leaves the buffer empty.
    pub fn build(&mut self, segment: &str, limits: &Limits) -> Result<(), ShellError> {
        self.clear();
        if self.text.capacity() == 0 {
            self.reserve(limits)?;
        }

        let mut in_quotes = false;
        let mut start = None;

        for ch in segment.chars() {
            if ch == QUOTE_CHAR {
                in_quotes = !in_quotes;
                start.get_or_insert(self.text.len());
                continue;
            }
            if ch == '\0' || (!in_quotes && ch.is_whitespace()) {
                if let Some(s) = start.take() {
                    self.push_token(s, segment, limits)?;
                }
                continue;
            }
            if self.text.len() + ch.len_utf8() > limits.command_capacity() {
                return Err(too_large(segment));
            }
            start.get_or_insert(self.text.len());
            self.text.push(ch);
        }

        if let Some(s) = start {
            self.push_token(s, segment, limits)?;
        }
        Ok(())
    }

    fn push_token(&mut self, start: usize, segment: &str, limits: &Limits) -> Result<(), ShellError> {
        if self.argv.len() >= limits.max_argv {
            return Err(too_large(segment));
        }
        self.argv.push(start..self.text.len());

        let exe_len = self.argv[0].len();
        if exe_len > limits.max_exe_len {
            return Err(too_large(segment));
        }
        // arguments are measured as if joined by single spaces
        let args = self.argv.len() - 1;
        if args > 0 {
            let args_len = self.text.len() - exe_len + (args - 1);
            if args_len > limits.max_args_len {
                return Err(too_large(segment));
            }
        }
        Ok(())
    }

    /// Forget all tokens but keep the storage for reuse.
    pub fn clear(&mut self) {
        self.text.clear();
        self.argv.clear();
    }

    /// Return the storage. Safe to call any number of times.
    pub fn release(&mut self) {
        self.text = String::new();
        self.argv = Vec::new();
    }

    pub fn capacity(&self) -> usize {
        self.text.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.argv.is_empty()
    }

    pub fn argc(&self) -> usize {
        self.argv.len()
    }

    /// Executable name, or "" for an empty buffer.
    pub fn exe(&self) -> &str {
        self.argv.first().map(|r| &self.text[r.clone()]).unwrap_or("")
    }

    /// All tokens, executable first.
    pub fn argv(&self) -> impl Iterator<Item = &str> + '_ {
        self.argv.iter().map(move |r| &self.text[r.clone()])
    }

    /// Tokens after the executable name.
    pub fn args(&self) -> impl Iterator<Item = &str> + '_ {
        self.argv().skip(1)
    }

    /// Argument vector ready for `execvp`.
    pub fn to_cstrings(&self) -> Result<Vec<CString>, ShellError> {
        self.argv()
            .map(|tok| {
                CString::new(tok).map_err(|_| ShellError::Execute {
                    command: self.exe().to_string(),
                })
            })
            .collect()
    }
}

impl fmt::Display for CommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, tok) in self.argv().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(tok)?;
        }
        Ok(())
    }
}

fn too_large(segment: &str) -> ShellError {
    ShellError::CommandTooLarge {
        command: segment.trim().to_string(),
    }
}
