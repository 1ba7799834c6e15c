//! Option bags for the high-level entry points.

use spawnkit_common::{Encoding, Signal, DEFAULT_MAX_BUFFER};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Options for [`exec`](crate::exec) and [`exec_file`](crate::exec_file)
/// and their blocking variants.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub clear_env: bool,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// Zero means disabled.
    pub timeout: Option<Duration>,
    pub kill_signal: Signal,
    pub max_buffer: usize,
    /// Defaults to [`Encoding::Utf8`]; the blocking spawn path stays binary.
    pub encoding: Encoding,
    /// Bytes fed to the child's stdin before it is closed.
    pub input: Option<Vec<u8>>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            env: HashMap::new(),
            clear_env: false,
            uid: None,
            gid: None,
            timeout: None,
            kill_signal: Signal::SIGTERM,
            max_buffer: DEFAULT_MAX_BUFFER,
            encoding: Encoding::Utf8,
            input: None,
        }
    }
}

impl ExecOptions {
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn kill_signal(mut self, signal: Signal) -> Self {
        self.kill_signal = signal;
        self
    }

    pub fn max_buffer(mut self, max_buffer: usize) -> Self {
        self.max_buffer = max_buffer;
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn input(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.input = Some(input.into());
        self
    }
}

/// Options for [`fork`](crate::fork).
#[derive(Debug, Clone, Default)]
pub struct ForkOptions {
    /// Executable to launch instead of the current one.
    pub exec_path: Option<PathBuf>,
    /// Arguments inserted before the module arguments.
    pub exec_args: Vec<String>,
    /// Pipe the child's stdio instead of inheriting the parent's.
    pub silent: bool,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

impl ForkOptions {
    pub fn exec_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.exec_path = Some(path.into());
        self
    }

    pub fn exec_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exec_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}
