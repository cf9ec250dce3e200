use thiserror::Error;

use super::{CancelSignal, ExecError, Execer, LineLogger, RunIo};
use crate::build::{BuildResult, BuildType, TargetBuilder};
use crate::manifest::{DeployTarget, Target};
use crate::target::{TargetId, TargetSpec};

#[derive(Debug, Error)]
pub enum LocalBuildError {
  #[error("no builder for {0}")]
  Unsupported(TargetId),

  #[error("command {cmd} exited with status {code}")]
  Failed { cmd: String, code: i32 },

  #[error(transparent)]
  Exec(#[from] ExecError),
}

impl LocalBuildError {
  pub fn exit_code(&self) -> Option<i32> {
    match self {
      LocalBuildError::Failed { code, .. } => Some(*code),
      LocalBuildError::Exec(e) => Some(e.exit_code()),
      LocalBuildError::Unsupported(_) => None,
    }
  }
}

/// Builds local targets by running their update command.
#[derive(Debug)]
pub struct LocalBuilder<E> {
  execer: E,
  cancel: CancelSignal,
}

impl<E: Execer> LocalBuilder<E> {
  pub fn new(execer: E, cancel: CancelSignal) -> Self {
    Self { execer, cancel }
  }

  pub fn execer(&self) -> &E {
    &self.execer
  }
}

impl<E: Execer> TargetBuilder for LocalBuilder<E> {
  type Error = LocalBuildError;

  async fn build(&self, target: &Target, _dep_results: Vec<BuildResult>) -> Result<BuildResult, LocalBuildError> {
    let Target::Deploy(DeployTarget::Local(local)) = target else {
      return Err(LocalBuildError::Unsupported(target.id()));
    };
    let result = BuildResult::new(target.id(), BuildType::Local);
    if local.update_cmd.is_empty() {
      return Ok(result);
    }

    let mut cmd = local.update_cmd.clone();
    if cmd.dir.as_os_str().is_empty() {
      cmd.dir = local.workdir.clone();
    }

    let mut stdout = LineLogger::new(&local.name, "stdout");
    let mut stderr = LineLogger::new(&local.name, "stderr");
    let code = self
      .execer
      .run(&cmd, RunIo::new(&mut stdout, &mut stderr), self.cancel.clone())
      .await?;

    if code != 0 {
      return Err(LocalBuildError::Failed {
        cmd: cmd.to_string(),
        code,
      });
    }
    Ok(result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::exec::FakeExecer;
  use crate::manifest::{Cmd, ImageTarget, LocalTarget};

  fn local(name: &str, update: Cmd) -> Target {
    Target::Deploy(DeployTarget::Local(LocalTarget::new(update)).with_name(name))
  }

  #[tokio::test]
  async fn runs_update_command_in_workdir() {
    let builder = LocalBuilder::new(FakeExecer::new(), CancelSignal::never());
    let mut target = LocalTarget::new(Cmd::new(["make", "gen"]));
    target.workdir = "/src/app".into();
    let target = Target::Deploy(DeployTarget::Local(target).with_name("gen"));

    let result = builder.build(&target, Vec::new()).await.unwrap();
    assert_eq!(result.build_type, BuildType::Local);
    assert_eq!(result.target_id, target.id());

    let calls = builder.execer().calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].cmd.dir, std::path::PathBuf::from("/src/app"));
  }

  #[tokio::test]
  async fn nonzero_exit_fails_the_build() {
    let execer = FakeExecer::new();
    execer.register_command("make gen", 2, "", "boom");
    let builder = LocalBuilder::new(execer, CancelSignal::never());

    let err = builder
      .build(&local("gen", Cmd::new(["make", "gen"])), Vec::new())
      .await
      .unwrap_err();
    assert_eq!(err.exit_code(), Some(2));
    assert_eq!(err.to_string(), "command make gen exited with status 2");
  }

  #[tokio::test]
  async fn serve_only_target_needs_no_command() {
    let builder = LocalBuilder::new(FakeExecer::new(), CancelSignal::never());
    builder.build(&local("srv", Cmd::default()), Vec::new()).await.unwrap();
    assert!(builder.execer().calls().is_empty());
  }

  #[tokio::test]
  async fn image_targets_are_unsupported() {
    let builder = LocalBuilder::new(FakeExecer::new(), CancelSignal::never());
    let target = Target::Image(ImageTarget::new("gcr.io/app"));
    let err = builder.build(&target, Vec::new()).await.unwrap_err();
    assert!(matches!(err, LocalBuildError::Unsupported(_)));
    assert_eq!(err.exit_code(), None);
  }
}
