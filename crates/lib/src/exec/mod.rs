//! Local process execution.
//!
//! Commands run in their own process group. Cancelling a run kills the whole
//! group and reports [`KILLED_EXIT_CODE`] instead of whatever status the
//! parent process happened to exit with once its children were gone.

mod builder;
mod cancel;
mod fake;
mod output;
mod serve;

use std::future::Future;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

pub use builder::{LocalBuildError, LocalBuilder};
pub use cancel::{CancelSignal, Canceller};
pub use fake::{FakeCall, FakeExecer};
pub use output::{LineLogger, OneShotResult, one_shot, one_shot_to_logger};
pub use serve::ServeProcess;

pub use crate::consts::KILLED_EXIT_CODE;
use crate::manifest::Cmd;

/// Errors that can occur while running a command.
///
/// A non-zero exit is not an error at the [`Execer`] boundary; it is only
/// turned into [`ExecError::ExitStatus`] by helpers that want one.
#[derive(Debug, Error)]
pub enum ExecError {
  #[error("empty command")]
  EmptyCommand,

  #[error("failed to start {cmd}: {source}")]
  Spawn {
    cmd: String,
    #[source]
    source: io::Error,
  },

  #[error("waiting for {cmd}: {source}")]
  Wait {
    cmd: String,
    #[source]
    source: io::Error,
  },

  #[error("copying output of {cmd}: {source}")]
  Io {
    cmd: String,
    #[source]
    source: io::Error,
  },

  #[error("exit status {0}")]
  ExitStatus(i32),

  #[error("cancelled before start")]
  Cancelled,

  #[error("{0}")]
  Registered(String),
}

impl ExecError {
  /// The exit code reported alongside this error.
  pub fn exit_code(&self) -> i32 {
    match self {
      ExecError::ExitStatus(code) => *code,
      _ => -1,
    }
  }
}

/// Where a running command's output goes.
pub struct RunIo<'a> {
  pub stdout: &'a mut (dyn AsyncWrite + Unpin + Send),
  pub stderr: &'a mut (dyn AsyncWrite + Unpin + Send),
}

impl<'a> RunIo<'a> {
  pub fn new(stdout: &'a mut (dyn AsyncWrite + Unpin + Send), stderr: &'a mut (dyn AsyncWrite + Unpin + Send)) -> Self {
    Self { stdout, stderr }
  }
}

/// Runs a command to completion.
pub trait Execer: Send + Sync {
  /// Runs `cmd` and waits for it to exit, returning its exit code.
  ///
  /// If `cancel` fires first the process group is killed and the exit code
  /// is [`KILLED_EXIT_CODE`].
  ///
  /// # Errors
  ///
  /// Returns an error if the process could not be started or waited on, or
  /// if its output could not be copied. The exit code is -1 in that case.
  fn run(&self, cmd: &Cmd, io: RunIo<'_>, cancel: CancelSignal) -> impl Future<Output = Result<i32, ExecError>> + Send;
}

impl<E: Execer + ?Sized> Execer for Arc<E> {
  fn run(&self, cmd: &Cmd, io: RunIo<'_>, cancel: CancelSignal) -> impl Future<Output = Result<i32, ExecError>> + Send {
    (**self).run(cmd, io, cancel)
  }
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecer;

impl ProcessExecer {
  pub fn new() -> Self {
    Self
  }
}

impl Execer for ProcessExecer {
  async fn run(&self, cmd: &Cmd, io: RunIo<'_>, mut cancel: CancelSignal) -> Result<i32, ExecError> {
    let mut child = spawn(cmd, true)?;
    let pid = child.id();
    let mut child_stdout = child.stdout.take();
    let mut child_stderr = child.stderr.take();
    let RunIo { stdout, stderr } = io;

    // Set by whichever of natural exit or cancellation gets there first.
    let exit_code = OnceLock::new();

    let copy_stdout = async {
      match child_stdout.as_mut() {
        Some(pipe) => tokio::io::copy(pipe, stdout).await.map(drop),
        None => Ok(()),
      }
    };
    let copy_stderr = async {
      match child_stderr.as_mut() {
        Some(pipe) => tokio::io::copy(pipe, stderr).await.map(drop),
        None => Ok(()),
      }
    };
    // The run is over only once the leader exited and every pipe reached EOF.
    // Other group members can hold the pipes open after the leader is gone.
    let mut drain = Box::pin(async { tokio::join!(child.wait(), copy_stdout, copy_stderr) });

    let finished = tokio::select! {
      done = &mut drain => Some(done),
      () = cancel.cancelled() => None,
    };
    let (status, copied_stdout, copied_stderr) = match finished {
      Some(done) => done,
      None => {
        if exit_code.set(KILLED_EXIT_CODE).is_ok() {
          info!(cmd = %cmd, pid = ?pid, "cancelled, killing process group");
        }
        if kill_pid_group(pid) {
          drain.await
        } else {
          drop(drain);
          if let Err(e) = child.start_kill() {
            debug!(error = %e, "process already exited");
          }
          (child.wait().await, Ok(()), Ok(()))
        }
      }
    };

    let status = status.map_err(|source| ExecError::Wait {
      cmd: cmd.to_string(),
      source,
    })?;
    copied_stdout.and(copied_stderr).map_err(|source| ExecError::Io {
      cmd: cmd.to_string(),
      source,
    })?;

    let code = *exit_code.get_or_init(|| status_code(status));
    debug!(cmd = %cmd, exit_code = code, "process exited");
    Ok(code)
  }
}

/// Builds and spawns `cmd` in a new process group with piped output.
pub(crate) fn spawn(cmd: &Cmd, pipe_output: bool) -> Result<Child, ExecError> {
  let Some((program, args)) = cmd.argv.split_first() else {
    return Err(ExecError::EmptyCommand);
  };

  let mut command = Command::new(program);
  command.args(args).stdin(Stdio::null()).kill_on_drop(true);
  if pipe_output {
    command.stdout(Stdio::piped()).stderr(Stdio::piped());
  }
  if !cmd.dir.as_os_str().is_empty() {
    command.current_dir(&cmd.dir);
  }
  command.envs(cmd.env_pairs());

  #[cfg(unix)]
  command.process_group(0);

  info!(cmd = %cmd, "executing command");
  debug!(program = %program, working_dir = ?cmd.dir, "spawning process");

  command.spawn().map_err(|source| ExecError::Spawn {
    cmd: cmd.to_string(),
    source,
  })
}

/// Kills every process in the group led by `pid`.
#[cfg(unix)]
pub(crate) fn kill_group(child: &mut Child, pid: Option<u32>) {
  kill_pid_group(pid);
  // The leader may not have joined its group yet.
  if let Err(e) = child.start_kill() {
    debug!(error = %e, "process already exited");
  }
}

#[cfg(not(unix))]
pub(crate) fn kill_group(child: &mut Child, _pid: Option<u32>) {
  if let Err(e) = child.start_kill() {
    debug!(error = %e, "process already exited");
  }
}

/// Sends SIGKILL to the group led by `pid`. Returns false where process
/// groups are not supported and only the leader can be killed.
#[cfg(unix)]
fn kill_pid_group(pid: Option<u32>) -> bool {
  signal_group(pid, rustix::process::Signal::KILL);
  true
}

#[cfg(not(unix))]
fn kill_pid_group(_pid: Option<u32>) -> bool {
  false
}

/// Signals the group led by `pid`. A group with no members left is ignored.
#[cfg(unix)]
pub(crate) fn signal_group(pid: Option<u32>, signal: rustix::process::Signal) {
  let Some(raw) = pid.and_then(|p| i32::try_from(p).ok()) else {
    return;
  };
  let Some(group) = rustix::process::Pid::from_raw(raw) else {
    return;
  };
  match rustix::process::kill_process_group(group, signal) {
    Ok(()) => {}
    Err(rustix::io::Errno::SRCH) => debug!(pid = raw, "process group already gone"),
    Err(e) => warn!(pid = raw, error = %e, "failed to signal process group"),
  }
}

/// Whether any process is left in the group led by `pid`.
#[cfg(unix)]
pub(crate) fn group_alive(pid: Option<u32>) -> bool {
  let Some(group) = pid
    .and_then(|p| i32::try_from(p).ok())
    .and_then(rustix::process::Pid::from_raw)
  else {
    return false;
  };
  rustix::process::test_kill_process_group(group).is_ok()
}

/// Exit code of a finished process. Death by signal maps to `128 + signal`.
fn status_code(status: ExitStatus) -> i32 {
  if let Some(code) = status.code() {
    return code;
  }
  #[cfg(unix)]
  {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = status.signal() {
      return 128 + signal;
    }
  }
  -1
}
