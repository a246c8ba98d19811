/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use async_trait::async_trait;
use std::{
    fmt,
    process::Stdio,
    time::{Duration, Instant},
};
use tracing::debug;

/// An external command as an argument vector. Nothing is ever passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    program: String,
    args: Vec<String>,
    privileged: bool,
    timeout: Option<Duration>,
    tolerate_failure: bool,
}
impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
            privileged: false,
            timeout: None,
            tolerate_failure: false,
        }
    }

    /// Builds a command from a POSIX command line, e.g. one taken from the config file.
    pub fn parse(line: &str) -> anyhow::Result<Self> {
        let words = shlex::split(line)
            .ok_or_else(|| anyhow::anyhow!("Command string is not POSIX compliant: {}", line))?;

        match &words[..] {
            [program, args @ ..] => Ok(Command::new(program).args(args)),
            _ => Err(anyhow::anyhow!("Empty command")),
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

    /// Marks the command as needing root. Whether `sudo` is actually prepended is up to the
    /// executor.
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// A non-zero exit is reported through `CommandResult::status` instead of an error.
    pub fn tolerate_failure(mut self) -> Self {
        self.tolerate_failure = true;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn tolerates_failure(&self) -> bool {
        self.tolerate_failure
    }

    pub fn argv(&self, use_sudo: bool) -> Vec<&str> {
        let sudo = (use_sudo && self.privileged).then_some("sudo");
        sudo.into_iter()
            .chain(std::iter::once(self.program.as_str()))
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    /// The command line as a shell would see it, for logs and error messages only.
    pub fn render(&self, use_sudo: bool) -> String {
        let argv = self.argv(use_sudo);
        shlex::try_join(argv.iter().copied()).unwrap_or_else(|_| argv.join(" "))
    }
}
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false))
    }
}

/// Outcome of a single external invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub command: String,
    /// `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}
impl CommandResult {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

/// Ceph tools print some errors on stdout, so that is used when stderr is empty.
fn failure_output<'a>(stdout: &'a str, stderr: &'a str) -> &'a str {
    match stderr.trim() {
        "" => stdout.trim(),
        stderr => stderr,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("failed to spawn `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "`{command}` failed with {}: {}",
        describe_status(.status),
        failure_output(.stdout, .stderr)
    )]
    NonZeroExit {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("`{command}` timed out after {}s", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },
}
impl ExecutionError {
    pub fn command(&self) -> &str {
        match self {
            ExecutionError::Spawn { command, .. }
            | ExecutionError::NonZeroExit { command, .. }
            | ExecutionError::Timeout { command, .. } => command,
        }
    }
}

/// Runs external commands. Implementations hold no per-call state, so one executor can be
/// shared by every driver in a run.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Runs the command and reports whatever it did. Only spawn failures and timeouts are
    /// errors here.
    async fn run(&self, command: &Command) -> Result<CommandResult, ExecutionError>;

    /// Runs the command and turns a non-zero exit into `ExecutionError::NonZeroExit` unless the
    /// command tolerates failure.
    async fn execute(&self, command: &Command) -> Result<CommandResult, ExecutionError> {
        let result = self.run(command).await?;
        if result.success() || command.tolerates_failure() {
            Ok(result)
        } else {
            Err(ExecutionError::NonZeroExit {
                command: result.command,
                status: result.status,
                stdout: result.stdout,
                stderr: result.stderr,
            })
        }
    }
}

/// How long a timed out command gets to exit after SIGTERM before its group is killed.
const KILL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(group: u32, signal: Signal) {
    let signal = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // SAFETY: killpg takes no pointers; an already empty group only yields ESRCH
    let rc = unsafe { libc::killpg(group as libc::pid_t, signal) };
    if rc != 0 {
        debug!(
            "Signal {} to process group {} not delivered: {}",
            signal,
            group,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn signal_group(_group: u32, _signal: Signal) {}

/// Executes commands as child processes of this one.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    use_sudo: bool,
    default_timeout: Option<Duration>,
}
impl ProcessExecutor {
    pub fn new(use_sudo: bool, default_timeout: Option<Duration>) -> Self {
        Self {
            use_sudo,
            default_timeout,
        }
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn run(&self, command: &Command) -> Result<CommandResult, ExecutionError> {
        let rendered = command.render(self.use_sudo);
        let argv = command.argv(self.use_sudo);
        let timeout = command.get_timeout().or(self.default_timeout);

        let (program, args) = match &argv[..] {
            [program, args @ ..] => (*program, args),
            [] => unreachable!("argv always contains the program"),
        };

        debug!("Running command {}", rendered);
        let start = Instant::now();

        let mut process = tokio::process::Command::new(program);
        process
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // own process group, so a timeout reaches whatever the command started
        #[cfg(unix)]
        process.process_group(0);

        let child = process.spawn().map_err(|source| ExecutionError::Spawn {
            command: rendered.clone(),
            source,
        })?;
        let group = child.id();
        let output = child.wait_with_output();
        tokio::pin!(output);

        let output = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, output.as_mut()).await {
                Ok(output) => output,
                Err(_) => {
                    debug!("Command {} timed out, stopping it", rendered);
                    if let Some(group) = group {
                        // sudo relays SIGTERM to its child but cannot relay SIGKILL
                        signal_group(group, Signal::Terminate);
                        let _ = tokio::time::timeout(KILL_GRACE, output.as_mut()).await;
                        signal_group(group, Signal::Kill);
                    }
                    return Err(ExecutionError::Timeout {
                        command: rendered,
                        timeout,
                    });
                }
            },
            None => output.await,
        }
        .map_err(|source| ExecutionError::Spawn {
            command: rendered.clone(),
            source,
        })?;

        let result = CommandResult {
            command: rendered,
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            elapsed: start.elapsed(),
        };
        debug!(
            "Command {} finished with {} in {:.3}s",
            result.command,
            describe_status(&result.status),
            result.elapsed.as_secs_f64()
        );

        Ok(result)
    }
}
