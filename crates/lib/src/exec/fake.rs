use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use tokio::io::AsyncWriteExt;

use super::{CancelSignal, ExecError, Execer, KILLED_EXIT_CODE, RunIo};
use crate::manifest::Cmd;

#[derive(Debug, Clone, Default)]
struct FakeResponse {
  exit_code: i32,
  error: Option<String>,
  stdout: Vec<u8>,
  stderr: Vec<u8>,
  until_cancelled: bool,
}

/// One recorded invocation of a [`FakeExecer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCall {
  pub cmd: Cmd,
  pub exit_code: i32,
  pub error: Option<String>,
}

impl fmt::Display for FakeCall {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "cmd={:?} exit_code={}", self.cmd.to_string(), self.exit_code)?;
    if let Some(error) = &self.error {
      write!(f, " error={}", error)?;
    }
    Ok(())
  }
}

#[derive(Debug, Default)]
struct Inner {
  responses: HashMap<String, FakeResponse>,
  calls: Vec<FakeCall>,
}

/// An [`Execer`] that answers from canned responses keyed by the command's
/// display string. Unregistered commands succeed silently.
#[derive(Debug, Default)]
pub struct FakeExecer {
  inner: Mutex<Inner>,
}

impl FakeExecer {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers output for `cmd`, newline-terminating non-empty output.
  pub fn register_command(&self, cmd: &str, exit_code: i32, stdout: &str, stderr: &str) {
    self.register_bytes(cmd, exit_code, terminate_line(stdout), terminate_line(stderr));
  }

  /// Registers output for `cmd` exactly as given.
  pub fn register_bytes(&self, cmd: &str, exit_code: i32, stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) {
    self.insert(
      cmd,
      FakeResponse {
        exit_code,
        stdout: stdout.into(),
        stderr: stderr.into(),
        ..Default::default()
      },
    );
  }

  /// Makes `cmd` fail as if it could not be started.
  pub fn register_error(&self, cmd: &str, error: impl Into<String>) {
    self.insert(
      cmd,
      FakeResponse {
        exit_code: -1,
        error: Some(error.into()),
        ..Default::default()
      },
    );
  }

  /// Makes `cmd` run until cancelled, then report it killed.
  pub fn register_until_cancelled(&self, cmd: &str) {
    self.insert(
      cmd,
      FakeResponse {
        until_cancelled: true,
        ..Default::default()
      },
    );
  }

  pub fn calls(&self) -> Vec<FakeCall> {
    self.lock().calls.clone()
  }

  fn insert(&self, cmd: &str, response: FakeResponse) {
    self.lock().responses.insert(cmd.to_string(), response);
  }

  fn record(&self, cmd: &Cmd, result: &Result<i32, ExecError>) {
    let call = FakeCall {
      cmd: cmd.clone(),
      exit_code: match result {
        Ok(code) => *code,
        Err(e) => e.exit_code(),
      },
      error: result.as_ref().err().map(ToString::to_string),
    };
    self.lock().calls.push(call);
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  async fn respond(&self, cmd: &Cmd, io: RunIo<'_>, mut cancel: CancelSignal) -> Result<i32, ExecError> {
    if cancel.is_cancelled() {
      return Err(ExecError::Cancelled);
    }
    let response = self.lock().responses.get(&cmd.to_string()).cloned();
    let Some(response) = response else {
      return Ok(0);
    };
    if let Some(error) = response.error {
      return Err(ExecError::Registered(error));
    }

    let copy_err = |source| ExecError::Io {
      cmd: cmd.to_string(),
      source,
    };
    if !response.stdout.is_empty() {
      io.stdout.write_all(&response.stdout).await.map_err(copy_err)?;
    }
    if !response.stderr.is_empty() {
      io.stderr.write_all(&response.stderr).await.map_err(copy_err)?;
    }

    if response.until_cancelled {
      cancel.cancelled().await;
      return Ok(KILLED_EXIT_CODE);
    }
    Ok(response.exit_code)
  }
}

impl Execer for FakeExecer {
  async fn run(&self, cmd: &Cmd, io: RunIo<'_>, cancel: CancelSignal) -> Result<i32, ExecError> {
    let result = self.respond(cmd, io, cancel).await;
    self.record(cmd, &result);
    result
  }
}

fn terminate_line(s: &str) -> Vec<u8> {
  if s.is_empty() || s.ends_with('\n') {
    s.as_bytes().to_vec()
  } else {
    format!("{}\n", s).into_bytes()
  }
}
