//! Launch specification: everything the launch manager needs to create a
//! child process. Immutable once passed to [`crate::launch`].

use spawnkit_common::{Signal, SpawnError, SpawnResult};
use spawnkit_stdio::StdioConfig;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Shell-wrapping policy for the command line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ShellWrap {
    /// Execute the command directly.
    #[default]
    Off,
    /// Wrap command and arguments into a single string passed to `/bin/sh`.
    Default,
    /// Wrap into a single string passed to the given shell.
    Custom(String),
}

/// Complete description of one process launch.
///
/// Environment entries add to (or override) the parent's environment
/// unless `clear_env` drops the inheritance. `timeout` of zero means
/// disabled. The Windows-specific options are carried for configuration
/// compatibility and have no effect on platforms without the concept.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub clear_env: bool,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// Override for the value the child sees as argv[0].
    pub argv0: Option<String>,
    /// Run the child in its own session and signal its process group.
    pub detached: bool,
    pub shell: ShellWrap,
    pub timeout: Option<Duration>,
    /// Signal used by timeout and overflow kills. Default SIGTERM.
    pub kill_signal: Signal,
    pub stdio: StdioConfig,
    pub windows_hide: bool,
    pub windows_verbatim_arguments: bool,
}

impl LaunchSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            clear_env: false,
            uid: None,
            gid: None,
            argv0: None,
            detached: false,
            shell: ShellWrap::Off,
            timeout: None,
            kill_signal: Signal::SIGTERM,
            stdio: StdioConfig::default(),
            windows_hide: true,
            windows_verbatim_arguments: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn stdio(mut self, stdio: StdioConfig) -> Self {
        self.stdio = stdio;
        self
    }

    pub fn shell(mut self, shell: ShellWrap) -> Self {
        self.shell = shell;
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

    pub fn detached(mut self, detached: bool) -> Self {
        self.detached = detached;
        self
    }

    /// Timeout with the zero-means-disabled convention applied.
    pub fn effective_timeout(&self) -> Option<Duration> {
        self.timeout.filter(|t| !t.is_zero())
    }

    /// The program and argument vector actually handed to the OS, with
    /// shell wrapping applied. Wrapping joins command and arguments into
    /// one string; quoting heuristics are deliberately out of scope.
    pub fn effective_command(&self) -> (String, Vec<String>) {
        match &self.shell {
            ShellWrap::Off => (self.command.clone(), self.args.clone()),
            ShellWrap::Default => ("/bin/sh".to_string(), self.wrapped_args()),
            ShellWrap::Custom(shell) => (shell.clone(), self.wrapped_args()),
        }
    }

    fn wrapped_args(&self) -> Vec<String> {
        let mut line = self.command.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        vec!["-c".to_string(), line]
    }

    /// Validate the spec before any OS resource is touched.
    pub fn validate(&self) -> SpawnResult<()> {
        if self.command.is_empty() {
            return Err(SpawnError::invalid_spec("command cannot be empty"));
        }

        for (key, value) in &self.env {
            if key.is_empty() {
                return Err(SpawnError::invalid_spec("environment key cannot be empty"));
            }
            if key.contains('=') || key.contains('\0') {
                return Err(SpawnError::invalid_spec(format!(
                    "invalid environment key: {:?}",
                    key
                )));
            }
            if value.contains('\0') {
                return Err(SpawnError::invalid_spec(format!(
                    "invalid environment value for key {:?}",
                    key
                )));
            }
        }

        self.stdio.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_command_rejected() {
        let err = LaunchSpec::new("").validate().unwrap_err();
        assert!(err.to_string().contains("command cannot be empty"));
    }

    #[test]
    fn test_env_key_validation() {
        let spec = LaunchSpec::new("true").env("BAD=KEY", "v");
        assert!(spec.validate().is_err());

        let spec = LaunchSpec::new("true").env("GOOD_KEY", "v");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_shell_wrapping() {
        let spec = LaunchSpec::new("echo").arg("hi").shell(ShellWrap::Default);
        let (program, args) = spec.effective_command();
        assert_eq!(program, "/bin/sh");
        assert_eq!(args, vec!["-c".to_string(), "echo hi".to_string()]);
    }

    #[test]
    fn test_custom_shell() {
        let spec = LaunchSpec::new("ls").shell(ShellWrap::Custom("/bin/bash".into()));
        let (program, args) = spec.effective_command();
        assert_eq!(program, "/bin/bash");
        assert_eq!(args[0], "-c");
    }

    #[test]
    fn test_zero_timeout_is_disabled() {
        let spec = LaunchSpec::new("true").timeout(Duration::ZERO);
        assert_eq!(spec.effective_timeout(), None);

        let spec = LaunchSpec::new("true").timeout(Duration::from_secs(5));
        assert_eq!(spec.effective_timeout(), Some(Duration::from_secs(5)));
    }
}
