use std::time::Duration;

pub const APP_NAME: &str = "devloop";

/// Name of the main configuration source. Only this source may set global settings.
pub const MAIN_CONFIG_NAME: &str = "(Tiltfile)";

/// Default configuration file looked up by the CLI.
pub const DEFAULT_CONFIG_FILE: &str = "devloop.json";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "DEVLOOP_DATA_DIR";

/// Number of finished build records kept per manifest.
pub const BUILD_HISTORY_LIMIT: usize = 2;

/// Attempts made while the object store cache is still warming up.
pub const CACHE_RETRY_LIMIT: usize = 5;
pub const CACHE_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Exit code reported for a process group killed on cancellation.
pub const KILLED_EXIT_CODE: i32 = 137;

/// How long a serve process gets to exit after SIGTERM before the group is killed.
pub const SERVE_GRACE_PERIOD: Duration = Duration::from_secs(30);

pub const DEFAULT_MAX_PARALLEL_UPDATES: usize = 3;

pub const INSIGHTS_DIR: &str = "insights";
pub const INSIGHTS_FILE: &str = "build_metrics.json";
pub const INSIGHTS_VERSION: u32 = 1;
pub const INSIGHTS_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);
pub const INSIGHTS_MAX_RECENT_BUILDS: usize = 100;
pub const INSIGHTS_MAX_SLOWEST_BUILDS: usize = 10;
pub const INSIGHTS_MOST_FAILED: usize = 5;
pub const INSIGHTS_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Annotation naming the manifest a generated object belongs to.
pub const ANNOTATION_MANIFEST: &str = "devloop.dev/resource";
/// Annotation carrying the log span of a generated object.
pub const ANNOTATION_SPAN_ID: &str = "devloop.dev/span-id";
/// Annotation naming the controller that manages a generated object.
pub const ANNOTATION_MANAGED_BY: &str = "devloop.dev/managed-by";

/// ConfigMap key holding a resource's disabled flag.
pub const DISABLE_KEY: &str = "isDisabled";
/// Annotation on live updates: `auto` or `manual`.
pub const ANNOTATION_UPDATE_MODE: &str = "devloop.dev/update-mode";

/// Name of the session object generated for the main configuration source.
pub const SESSION_NAME: &str = "devloop";
