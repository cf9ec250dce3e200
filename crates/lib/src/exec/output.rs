use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;
use tracing::info;

use super::{CancelSignal, ExecError, Execer, RunIo};
use crate::manifest::Cmd;

/// The captured result of a short-lived command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OneShotResult {
  pub exit_code: i32,
  pub stdout: Vec<u8>,
  pub stderr: Vec<u8>,
}

impl OneShotResult {
  pub fn stdout_str(&self) -> String {
    String::from_utf8_lossy(&self.stdout).into_owned()
  }

  pub fn stderr_str(&self) -> String {
    String::from_utf8_lossy(&self.stderr).into_owned()
  }
}

/// Runs `cmd`, buffering its output.
///
/// # Errors
///
/// Returns the execer's error; a non-zero exit is reported in the result.
pub async fn one_shot<E: Execer + ?Sized>(
  execer: &E,
  cmd: &Cmd,
  cancel: CancelSignal,
) -> Result<OneShotResult, ExecError> {
  let mut stdout = Vec::new();
  let mut stderr = Vec::new();
  let exit_code = execer.run(cmd, RunIo::new(&mut stdout, &mut stderr), cancel).await?;
  Ok(OneShotResult {
    exit_code,
    stdout,
    stderr,
  })
}

/// Runs `cmd`, streaming its output into the log line by line.
///
/// # Errors
///
/// Returns the execer's error, or [`ExecError::ExitStatus`] on a non-zero exit.
pub async fn one_shot_to_logger<E: Execer + ?Sized>(
  execer: &E,
  cmd: &Cmd,
  source: &str,
  cancel: CancelSignal,
) -> Result<(), ExecError> {
  let mut stdout = LineLogger::new(source, "stdout");
  let mut stderr = LineLogger::new(source, "stderr");

  info!(source = %source, "Running cmd: {}", cmd);
  let exit_code = execer.run(cmd, RunIo::new(&mut stdout, &mut stderr), cancel).await?;
  stdout.flush_partial();
  stderr.flush_partial();

  match exit_code {
    0 => Ok(()),
    code => Err(ExecError::ExitStatus(code)),
  }
}

/// An [`AsyncWrite`] sink that emits one `tracing` event per output line.
///
/// A trailing partial line is held until more output arrives, the writer is
/// shut down, or it is dropped.
#[derive(Debug)]
pub struct LineLogger {
  source: String,
  stream: &'static str,
  pending: Vec<u8>,
}

impl LineLogger {
  pub fn new(source: impl Into<String>, stream: &'static str) -> Self {
    Self {
      source: source.into(),
      stream,
      pending: Vec::new(),
    }
  }

  fn emit(&self, line: &[u8]) {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches('\r');
    info!(source = %self.source, stream = self.stream, "{}", line);
  }

  fn emit_complete_lines(&mut self) {
    while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
      let rest = self.pending.split_off(pos + 1);
      let line = std::mem::replace(&mut self.pending, rest);
      self.emit(&line[..pos]);
    }
  }

  /// Emits any buffered partial line.
  pub fn flush_partial(&mut self) {
    if !self.pending.is_empty() {
      let line = std::mem::take(&mut self.pending);
      self.emit(&line);
    }
  }
}

impl AsyncWrite for LineLogger {
  fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
    let this = self.get_mut();
    this.pending.extend_from_slice(buf);
    this.emit_complete_lines();
    Poll::Ready(Ok(buf.len()))
  }

  fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    Poll::Ready(Ok(()))
  }

  fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    self.get_mut().flush_partial();
    Poll::Ready(Ok(()))
  }
}

impl Drop for LineLogger {
  fn drop(&mut self) {
    self.flush_partial();
  }
}
