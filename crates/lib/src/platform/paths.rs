use std::path::PathBuf;

use thiserror::Error;

use crate::consts::{APP_NAME, DATA_DIR_ENV, INSIGHTS_DIR, INSIGHTS_FILE};

#[derive(Debug, Error)]
pub enum PathError {
  #[error("cannot determine the data directory: set {} or {}", DATA_DIR_ENV, HOME_ENV)]
  NoHome,
}

#[cfg(windows)]
const HOME_ENV: &str = "USERPROFILE";
#[cfg(not(windows))]
const HOME_ENV: &str = "HOME";

/// Returns the user's home directory.
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// Returns the directory for data files of the application.
///
/// `DEVLOOP_DATA_DIR` wins over the platform default.
///
/// # Errors
///
/// Returns an error if neither the override nor a home directory is set.
#[cfg(windows)]
pub fn data_dir() -> Result<PathBuf, PathError> {
  if let Some(dir) = env_dir(DATA_DIR_ENV) {
    return Ok(dir);
  }
  env_dir("APPDATA")
    .or_else(|| home_dir().map(|home| home.join("AppData").join("Roaming")))
    .map(|base| base.join(APP_NAME))
    .ok_or(PathError::NoHome)
}

/// Returns the directory for data files of the application.
///
/// `DEVLOOP_DATA_DIR` wins over `XDG_DATA_HOME`, which wins over `~/.local/share`.
///
/// # Errors
///
/// Returns an error if neither the override nor a home directory is set.
#[cfg(not(windows))]
pub fn data_dir() -> Result<PathBuf, PathError> {
  if let Some(dir) = env_dir(DATA_DIR_ENV) {
    return Ok(dir);
  }
  env_dir("XDG_DATA_HOME")
    .or_else(|| home_dir().map(|home| home.join(".local").join("share")))
    .map(|base| base.join(APP_NAME))
    .ok_or(PathError::NoHome)
}

/// Location of the build insights database.
///
/// # Errors
///
/// Returns an error if the data directory cannot be determined.
pub fn insights_file() -> Result<PathBuf, PathError> {
  Ok(data_dir()?.join(INSIGHTS_DIR).join(INSIGHTS_FILE))
}

fn env_dir(var: &str) -> Option<PathBuf> {
  std::env::var_os(var).filter(|v| !v.is_empty()).map(PathBuf::from)
}

#[cfg(test)]
#[cfg(not(windows))]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  #[serial]
  fn override_takes_precedence() {
    temp_env::with_vars(
      [
        (DATA_DIR_ENV, Some("/srv/devloop")),
        ("XDG_DATA_HOME", Some("/custom/data")),
        ("HOME", Some("/home/user")),
      ],
      || {
        assert_eq!(data_dir().unwrap(), PathBuf::from("/srv/devloop"));
        assert_eq!(
          insights_file().unwrap(),
          PathBuf::from("/srv/devloop/insights/build_metrics.json")
        );
      },
    );
  }

  #[test]
  #[serial]
  fn xdg_data_home_takes_precedence_over_home() {
    temp_env::with_vars(
      [
        (DATA_DIR_ENV, None::<&str>),
        ("XDG_DATA_HOME", Some("/custom/data")),
        ("HOME", Some("/home/user")),
      ],
      || {
        assert_eq!(data_dir().unwrap(), PathBuf::from("/custom/data").join(APP_NAME));
      },
    );
  }

  #[test]
  #[serial]
  fn falls_back_to_local_share() {
    temp_env::with_vars(
      [
        (DATA_DIR_ENV, None::<&str>),
        ("XDG_DATA_HOME", Some("")),
        ("HOME", Some("/home/user")),
      ],
      || {
        assert_eq!(data_dir().unwrap(), PathBuf::from("/home/user/.local/share").join(APP_NAME));
      },
    );
  }

  #[test]
  #[serial]
  fn fails_without_home() {
    temp_env::with_vars(
      [
        (DATA_DIR_ENV, None::<&str>),
        ("XDG_DATA_HOME", None::<&str>),
        ("HOME", None::<&str>),
      ],
      || {
        let err = data_dir().unwrap_err();
        assert_eq!(
          err.to_string(),
          "cannot determine the data directory: set DEVLOOP_DATA_DIR or HOME"
        );
      },
    );
  }
}
