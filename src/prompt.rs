use colored::Colorize;
use std::env;

pub const SH_PROMPT: &str = "dsh>";
pub const RSH_PROMPT: &str = "rdsh>";

pub struct Prompt {
    prefix: &'static str,
    decorated: bool,
}

impl Prompt {
    /// Bare prompt, for piped or scripted input.
    pub fn plain(prefix: &'static str) -> Self {
        Self {
            prefix,
            decorated: false,
        }
    }

    /// Prompt showing user and working directory.
    pub fn decorated(prefix: &'static str) -> Self {
        Self {
            prefix,
            decorated: true,
        }
    }

    pub fn get_string(&self) -> String {
        if !self.decorated {
            return format!("{} ", self.prefix);
        }

        let cwd = env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| String::from("?"));

        format!(
            "{}:{} {} ",
            whoami::username().green(),
            cwd.blue(),
            self.prefix.bold()
        )
    }
}
