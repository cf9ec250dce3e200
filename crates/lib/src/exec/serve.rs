//! Long-running serve commands of local resources.

use std::time::Duration;

use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, warn};

use super::{ExecError, LineLogger, kill_group, spawn, status_code};
use crate::manifest::Cmd;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);
#[cfg(unix)]
const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A serve command running in its own process group, its output forwarded
/// to the log.
#[derive(Debug)]
pub struct ServeProcess {
  name: String,
  cmd: Cmd,
  child: Child,
  pid: Option<u32>,
  forwarders: Vec<JoinHandle<()>>,
}

impl ServeProcess {
  /// # Errors
  ///
  /// Returns an error if the command is empty or cannot be started.
  pub fn start(name: &str, cmd: &Cmd) -> Result<Self, ExecError> {
    let mut child = spawn(cmd, true)?;
    let pid = child.id();
    info!(resource = %name, pid = ?pid, "serve process started");

    let mut forwarders = Vec::new();
    if let Some(mut stdout) = child.stdout.take() {
      let mut logger = LineLogger::new(name, "stdout");
      forwarders.push(tokio::spawn(async move {
        if let Err(e) = tokio::io::copy(&mut stdout, &mut logger).await {
          debug!(error = %e, "serve stdout closed");
        }
      }
      .in_current_span()));
    }
    if let Some(mut stderr) = child.stderr.take() {
      let mut logger = LineLogger::new(name, "stderr");
      forwarders.push(tokio::spawn(async move {
        if let Err(e) = tokio::io::copy(&mut stderr, &mut logger).await {
          debug!(error = %e, "serve stderr closed");
        }
      }
      .in_current_span()));
    }

    Ok(Self {
      name: name.to_string(),
      cmd: cmd.clone(),
      child,
      pid,
      forwarders,
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn id(&self) -> Option<u32> {
    self.pid
  }

  /// The exit code if the process has already exited.
  ///
  /// # Errors
  ///
  /// Returns an error if the process status cannot be queried.
  pub fn try_exit_code(&mut self) -> Result<Option<i32>, ExecError> {
    self
      .child
      .try_wait()
      .map(|status| status.map(status_code))
      .map_err(|source| self.wait_error(source))
  }

  /// Waits for the process to exit on its own.
  ///
  /// # Errors
  ///
  /// Returns an error if waiting on the process fails.
  pub async fn wait(&mut self) -> Result<i32, ExecError> {
    let status = self.child.wait().await.map_err(|source| self.wait_error(source))?;
    Ok(status_code(status))
  }

  /// Asks the process group to terminate, killing it once `grace` elapses.
  ///
  /// # Errors
  ///
  /// Returns an error if waiting on the process fails.
  pub async fn stop(mut self, grace: Duration) -> Result<i32, ExecError> {
    if let Some(code) = self.try_exit_code()? {
      self.stop_leftover_group(grace).await;
      return Ok(code);
    }

    self.terminate();
    let deadline = Instant::now() + grace;
    let mut progress = tokio::time::interval_at(Instant::now() + PROGRESS_INTERVAL, PROGRESS_INTERVAL);

    loop {
      tokio::select! {
        status = self.child.wait() => {
          let status = status.map_err(|source| self.wait_error(source))?;
          let code = status_code(status);
          info!(resource = %self.name, exit_code = code, "serve process stopped");
          return Ok(code);
        }
        () = tokio::time::sleep_until(deadline) => break,
        _ = progress.tick() => {
          let remaining = deadline.saturating_duration_since(Instant::now());
          info!(
            resource = %self.name,
            remaining_secs = remaining.as_secs(),
            "waiting for serve process to exit"
          );
        }
      }
    }

    warn!(resource = %self.name, grace = ?grace, "serve process ignored SIGTERM, killing");
    kill_group(&mut self.child, self.pid);
    let status = self.child.wait().await.map_err(|source| self.wait_error(source))?;
    Ok(status_code(status))
  }

  /// Processes the command left behind in its group outlive the leader;
  /// they get the same SIGTERM, then SIGKILL treatment.
  #[cfg(unix)]
  async fn stop_leftover_group(&mut self, grace: Duration) {
    if !super::group_alive(self.pid) {
      return;
    }
    self.terminate();
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
      tokio::time::sleep(GROUP_POLL_INTERVAL).await;
      if !super::group_alive(self.pid) {
        return;
      }
    }
    warn!(resource = %self.name, grace = ?grace, "serve process group ignored SIGTERM, killing");
    super::signal_group(self.pid, rustix::process::Signal::KILL);
  }

  #[cfg(not(unix))]
  async fn stop_leftover_group(&mut self, _grace: Duration) {}

  #[cfg(unix)]
  fn terminate(&mut self) {
    debug!(resource = %self.name, "sending SIGTERM to serve process group");
    super::signal_group(self.pid, rustix::process::Signal::TERM);
  }

  #[cfg(not(unix))]
  fn terminate(&mut self) {
    kill_group(&mut self.child, self.pid);
  }

  fn wait_error(&self, source: std::io::Error) -> ExecError {
    ExecError::Wait {
      cmd: self.cmd.to_string(),
      source,
    }
  }
}

impl Drop for ServeProcess {
  fn drop(&mut self) {
    // Also reaches members still running after the leader exited.
    kill_group(&mut self.child, self.pid);
    for forwarder in &self.forwarders {
      forwarder.abort();
    }
  }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
  #[cfg(target_os = "linux")]
  use tempfile::TempDir;
  use tracing_test::traced_test;

  use super::*;
  use crate::consts::KILLED_EXIT_CODE;

  #[tokio::test]
  #[traced_test]
  async fn forwards_output_to_the_log() {
    let mut serve = ServeProcess::start("web", &Cmd::shell("echo listening on 8000")).unwrap();
    assert_eq!(serve.wait().await.unwrap(), 0);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(logs_contain("listening on 8000"));
  }

  #[tokio::test]
  async fn stop_terminates_cooperative_process() {
    let serve = ServeProcess::start(
      "web",
      &Cmd::shell("trap 'exit 0' TERM; while true; do sleep 0.1; done"),
    )
    .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let code = tokio::time::timeout(Duration::from_secs(5), serve.stop(Duration::from_secs(10)))
      .await
      .expect("stop should not need the grace period")
      .unwrap();
    assert_eq!(code, 0);
  }

  #[tokio::test]
  async fn stop_kills_after_grace_period() {
    let serve = ServeProcess::start("web", &Cmd::shell("trap '' TERM; sleep 30")).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let code = tokio::time::timeout(Duration::from_secs(5), serve.stop(Duration::from_millis(200)))
      .await
      .expect("process should be killed after the grace period")
      .unwrap();
    assert_eq!(code, KILLED_EXIT_CODE);
  }

  #[tokio::test]
  async fn stop_after_exit_returns_exit_code() {
    let mut serve = ServeProcess::start("web", &Cmd::shell("exit 4")).unwrap();
    serve.wait().await.unwrap();
    assert_eq!(serve.stop(Duration::from_secs(1)).await.unwrap(), 4);
  }

  #[tokio::test]
  #[cfg(target_os = "linux")]
  async fn stop_after_exit_terminates_backgrounded_members() {
    let temp_dir = TempDir::new().unwrap();
    let pid_file = temp_dir.path().join("member.pid");
    let cmd = Cmd::shell(format!("sleep 600 & echo $! > {}; exit 0", pid_file.display()));
    let mut serve = ServeProcess::start("web", &cmd).unwrap();
    assert_eq!(serve.wait().await.unwrap(), 0);
    let member: u32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
    assert!(process_alive(member));

    let code = tokio::time::timeout(Duration::from_secs(5), serve.stop(Duration::from_secs(2)))
      .await
      .expect("stop should return within the grace period")
      .unwrap();
    assert_eq!(code, 0);

    let mut dead = false;
    for _ in 0..100 {
      if !process_alive(member) {
        dead = true;
        break;
      }
      tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(dead, "backgrounded member {member} outlived stop");
  }

  #[cfg(target_os = "linux")]
  fn process_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
      Ok(stat) => stat
        .rsplit_once(')')
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .is_some_and(|state| state != "Z"),
      Err(_) => false,
    }
  }
}
