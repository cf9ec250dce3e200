//! Manifests: named units composed of image targets and one deploy target.
//!
//! A manifest is produced by the config loader on every reload and replaced
//! wholesale when its configuration changes. All `with_*` methods consume and
//! return a modified value; a published manifest is never mutated in place.

mod cmd;
mod compare;
mod deploy;
mod image;
mod types;

pub use cmd::Cmd;
pub use compare::{CompareMode, FieldGroup, changed_field_groups, changes_invalidate_build};
pub use deploy::{ComposeProject, DeployTarget, DockerComposeTarget, K8sTarget, Link, LocalTarget};
pub use image::{BuildDetails, CustomBuild, DockerBuild, ImageTarget, LiveUpdateRun, LiveUpdateSpec, LiveUpdateSync};
pub use types::{Manifest, ManifestName, Target};
