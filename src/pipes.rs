use crate::command::CommandBuffer;
use crate::config::Limits;
use crate::error::ShellError;
use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use std::os::fd::OwnedFd;

pub const PIPE_CHAR: char = '|';

/// The commands of one pipeline, in the order they were typed.
#[derive(Debug, Default)]
pub struct CommandList {
    commands: Vec<CommandBuffer>,
}

impl CommandList {
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CommandBuffer> {
        self.commands.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CommandBuffer> {
        self.commands.iter()
    }

    /// Release every command. The list is empty afterwards.
    pub fn release(&mut self) {
        for cmd in &mut self.commands {
            cmd.release();
        }
        self.commands.clear();
    }
}

impl<'a> IntoIterator for &'a CommandList {
    type Item = &'a CommandBuffer;
    type IntoIter = std::slice::Iter<'a, CommandBuffer>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

/// Parse user input into pipeline commands.
/// e.g., "ls -l | grep rdsh | wc -l" -> three commands
///
/// Empty segments (`a || b`, a leading or trailing `|`) are skipped. Returns
/// `Ok(None)` when nothing is left to run.
pub fn parse_pipeline(line: &str, limits: &Limits) -> Result<Option<CommandList>, ShellError> {
    let mut list = CommandList::default();

    for segment in line.split(PIPE_CHAR) {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        if list.commands.len() >= limits.max_stages {
            return Err(ShellError::TooManyCommands { max: limits.max_stages });
        }

        let mut cmd = CommandBuffer::alloc(limits)?;
        cmd.build(segment, limits)?;
        if !cmd.is_empty() {
            list.commands.try_reserve(1)?;
            list.commands.push(cmd);
        }
    }

    Ok(if list.is_empty() { None } else { Some(list) })
}

/// The N-1 pipes joining N stages. Pipe `i` carries stage `i`'s stdout to
/// stage `i + 1`'s stdin. Every end is closed when the set is dropped.
#[derive(Debug)]
pub struct PipeSet {
    pipes: Vec<(OwnedFd, OwnedFd)>,
}

impl PipeSet {
    /// Create the pipes for a pipeline of `stages` commands.
    ///
    /// If one creation fails the pipes made so far are closed before the
    /// error is returned.
    pub fn create(stages: usize) -> Result<Self, ShellError> {
        let count = stages.saturating_sub(1);
        let mut pipes = Vec::new();
        pipes.try_reserve_exact(count)?;
        for _ in 0..count {
            // close-on-exec: children only keep the ends they dup2 onto 0/1
            let pair = pipe2(OFlag::O_CLOEXEC).map_err(ShellError::Pipe)?;
            pipes.push(pair);
        }
        Ok(Self { pipes })
    }

    pub fn len(&self) -> usize {
        self.pipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipes.is_empty()
    }

    /// Read end feeding stage `stage`, if it is not the first.
    pub fn reader_for(&self, stage: usize) -> Option<&OwnedFd> {
        stage.checked_sub(1).and_then(|i| self.pipes.get(i)).map(|(r, _)| r)
    }

    /// Write end fed by stage `stage`, if it is not the last.
    pub fn writer_for(&self, stage: usize) -> Option<&OwnedFd> {
        self.pipes.get(stage).map(|(_, w)| w)
    }

    /// Close both ends of every pipe.
    pub fn close_all(self) {
        drop(self);
    }
}
