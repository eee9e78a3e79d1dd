use std::io::Read;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, warn};

use crate::matcher::strip_ansi;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Captured result of one command line.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub command: String,
    /// Exit code, `None` when the process was ended by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ExecutionOutcome {
    pub fn failed(&self) -> bool {
        self.status != Some(0)
    }

    /// stdout followed by stderr with styling removed. Leading indentation is kept.
    pub fn unstyled(&self) -> String {
        let mut text = String::with_capacity(self.stdout.len() + self.stderr.len());
        text.push_str(&self.stdout);
        text.push_str(&self.stderr);
        strip_ansi(&text).into_owned()
    }

    /// [`unstyled`](Self::unstyled), trimmed. This is what patterns are matched against.
    pub fn combined(&self) -> String {
        self.unstyled().trim().to_string()
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("could not start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("waiting for `{command}` failed: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` timed out after {}s", .after.as_secs_f32())]
    Timeout {
        command: String,
        after: Duration,
        partial: Box<ExecutionOutcome>,
    },
}

/// Runs command lines through `sh -c` with a bounded wait.
///
/// A non-zero exit is an ordinary outcome here: preview invocations of the CLI
/// exit with an error on purpose and their stderr carries the next command.
#[derive(Debug, Clone)]
pub struct Executor {
    timeout: Duration,
    env: Vec<(String, String)>,
}

impl Executor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            env: Vec::new(),
        }
    }

    /// Extra variables for every invocation, e.g. `NEAR_ENV=testnet`.
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn run(&self, line: &str) -> Result<ExecutionOutcome, ExecError> {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(line)
            .envs(self.env.iter().map(|(key, value)| (key.as_str(), value.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        let started = Instant::now();
        let mut child = command.spawn().map_err(|source| ExecError::Spawn {
            command: line.to_string(),
            source,
        })?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let waited = wait_bounded(&mut child, self.timeout);
        if matches!(waited, Ok(Some(_))) {
            reap_group(&child);
        } else {
            terminate(&mut child);
        }
        let outcome = |status: Option<i32>| ExecutionOutcome {
            command: line.to_string(),
            status,
            stdout: collect(stdout),
            stderr: collect(stderr),
            elapsed: started.elapsed(),
        };

        match waited {
            Ok(Some(status)) => {
                let outcome = outcome(status.code());
                debug!(
                    command = line,
                    status = ?outcome.status,
                    elapsed = ?outcome.elapsed,
                    stdout_bytes = outcome.stdout.len(),
                    stderr_bytes = outcome.stderr.len(),
                    "command finished"
                );
                Ok(outcome)
            }
            Ok(None) => {
                warn!(command = line, timeout = ?self.timeout, "command timed out, killed");
                Err(ExecError::Timeout {
                    command: line.to_string(),
                    after: self.timeout,
                    partial: Box::new(outcome(None)),
                })
            }
            Err(source) => Err(ExecError::Wait {
                command: line.to_string(),
                source,
            }),
        }
    }
}

/// Resolves the CLI under test: literal paths must exist, bare names go through `PATH`.
pub fn locate_binary(binary: &str) -> Result<PathBuf> {
    let path = Path::new(binary);
    if path.components().count() > 1 {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        anyhow::bail!("{} does not exist; build the CLI first", path.display());
    }
    which::which(binary).with_context(|| format!("{binary} not found in PATH"))
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(err) = pipe.read_to_end(&mut buf) {
                debug!(%err, bytes = buf.len(), "reading command output failed");
            }
        }
        buf
    })
}

fn collect(reader: JoinHandle<Vec<u8>>) -> String {
    let bytes = reader.join().unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn wait_bounded(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Background jobs left behind by the shell inherit the output pipes and
/// would keep `collect` waiting after the shell itself exited.
fn reap_group(child: &Child) {
    let group = Pid::from_raw(child.id() as i32);
    match killpg(group, Signal::SIGKILL) {
        Ok(()) => debug!(pgid = child.id(), "killed leftover processes"),
        // ESRCH: the group is already empty
        Err(nix::errno::Errno::ESRCH) => {}
        Err(err) => debug!(pgid = child.id(), %err, "could not signal process group"),
    }
}

/// SIGTERM to the whole process group, SIGKILL after a grace period.
fn terminate(child: &mut Child) {
    let group = Pid::from_raw(child.id() as i32);
    if let Err(err) = killpg(group, Signal::SIGTERM) {
        debug!(pgid = child.id(), %err, "SIGTERM not delivered");
    }
    let deadline = Instant::now() + KILL_GRACE;
    while Instant::now() < deadline {
        if matches!(child.try_wait(), Ok(Some(_))) {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }
    // stragglers in the group would keep the output pipes open
    let _ = killpg(group, Signal::SIGKILL);
    let _ = child.kill();
    let _ = child.wait();
}
