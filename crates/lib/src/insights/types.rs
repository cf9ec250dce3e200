use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::build::{BuildReason, BuildType};
use crate::manifest::ManifestName;

/// One finished build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMetric {
  pub build_id: String,
  pub manifest_name: ManifestName,
  #[serde(default)]
  pub build_types: Vec<BuildType>,
  pub start_time: DateTime<Utc>,
  pub finish_time: DateTime<Utc>,
  pub duration_ms: i64,
  pub success: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error_message: Option<String>,
  #[serde(default)]
  pub warning_count: usize,
  #[serde(default)]
  pub reason: BuildReason,
  #[serde(default)]
  pub cache_hit: bool,
  #[serde(default, skip_serializing_if = "is_zero")]
  pub image_size: u64,
  #[serde(default)]
  pub live_update: bool,
  #[serde(default)]
  pub files_changed: usize,
}

fn is_zero(n: &u64) -> bool {
  *n == 0
}

impl BuildMetric {
  pub fn duration(&self) -> std::time::Duration {
    std::time::Duration::from_millis(self.duration_ms.max(0) as u64)
  }
}

/// Aggregate statistics for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResourceStats {
  pub manifest_name: ManifestName,
  pub total_builds: usize,
  pub successful_builds: usize,
  pub failed_builds: usize,
  /// Percentage, 0 to 100.
  pub success_rate: f64,
  pub total_duration_ms: i64,
  pub average_duration_ms: i64,
  pub min_duration_ms: i64,
  pub max_duration_ms: i64,
  pub p50_duration_ms: i64,
  pub p95_duration_ms: i64,
  pub p99_duration_ms: i64,
  pub live_update_count: usize,
  pub full_rebuild_count: usize,
  /// Percentage, 0 to 100.
  pub cache_hit_rate: f64,
  pub total_warnings: usize,
  pub last_build_time: Option<DateTime<Utc>>,
  pub last_build_success: bool,
  pub average_files_changed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakType {
  Success,
  Failure,
}

impl fmt::Display for StreakType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StreakType::Success => f.write_str("success"),
      StreakType::Failure => f.write_str("failure"),
    }
  }
}

/// Statistics over every build in the queried window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionStats {
  pub session_id: String,
  pub start_time: Option<DateTime<Utc>>,
  pub total_builds: usize,
  pub successful_builds: usize,
  pub failed_builds: usize,
  pub total_duration_ms: i64,
  pub average_duration_ms: i64,
  pub live_update_count: usize,
  pub full_rebuild_count: usize,
  pub resource_count: usize,
  /// Length of the run of consecutive builds with the same outcome, ending
  /// at the latest build.
  pub current_streak: usize,
  pub streak_type: Option<StreakType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationType {
  Performance,
  Reliability,
  Caching,
  General,
}

/// Ordered from most to least urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationPriority {
  High,
  Medium,
  Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
  #[serde(rename = "type")]
  pub kind: RecommendationType,
  pub priority: RecommendationPriority,
  pub title: String,
  pub description: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub affected_resources: Vec<ManifestName>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub potential_savings_ms: Option<i64>,
}

/// A full insights report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildInsights {
  pub version: u32,
  pub generated_at: DateTime<Utc>,
  pub session: SessionStats,
  /// Sorted by total builds, descending.
  pub resources: Vec<ResourceStats>,
  /// Newest first.
  pub recent_builds: Vec<BuildMetric>,
  /// Slowest first.
  pub slowest_builds: Vec<BuildMetric>,
  pub most_failed_resources: Vec<ResourceStats>,
  /// Most urgent first.
  pub recommendations: Vec<Recommendation>,
}
