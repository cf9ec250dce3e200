use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// An external command: argv, extra environment, and working directory.
///
/// An empty `argv` means "no command".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Cmd {
  pub argv: Vec<String>,
  /// Extra environment in `KEY=VALUE` form, applied on top of the inherited environment.
  pub env: Vec<String>,
  pub dir: PathBuf,
}

impl Cmd {
  pub fn new<I, S>(argv: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      argv: argv.into_iter().map(Into::into).collect(),
      ..Default::default()
    }
  }

  /// A command run through the platform shell.
  #[cfg(unix)]
  pub fn shell(script: impl Into<String>) -> Self {
    Self::new(["sh".to_string(), "-c".to_string(), script.into()])
  }

  #[cfg(windows)]
  pub fn shell(script: impl Into<String>) -> Self {
    Self::new(["cmd.exe".to_string(), "/S".to_string(), "/C".to_string(), script.into()])
  }

  pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.dir = dir.into();
    self
  }

  pub fn with_env(mut self, key: &str, value: &str) -> Self {
    self.env.push(format!("{}={}", key, value));
    self
  }

  pub fn is_empty(&self) -> bool {
    self.argv.is_empty()
  }

  /// Parses `env` into key/value pairs, skipping malformed entries.
  pub fn env_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
    self.env.iter().filter_map(|kv| kv.split_once('='))
  }
}

impl fmt::Display for Cmd {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let quoted: Vec<String> = self
      .argv
      .iter()
      .map(|arg| {
        if arg.is_empty() || arg.contains(char::is_whitespace) {
          format!("{:?}", arg)
        } else {
          arg.clone()
        }
      })
      .collect();
    f.write_str(&quoted.join(" "))
  }
}
