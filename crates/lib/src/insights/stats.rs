//! Aggregations over build metrics, computed on read.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use super::types::*;
use crate::manifest::ManifestName;

const SLOW_BUILD_MS: i64 = 30_000;
const MIN_BUILDS_FOR_RATES: usize = 5;
const MIN_BUILDS_FOR_VARIANCE: usize = 10;
const LOW_SUCCESS_RATE: f64 = 70.0;
const LOW_CACHE_HIT_RATE: f64 = 50.0;

/// The value at `p` percent of an ascending slice.
pub fn percentile(sorted: &[i64], p: usize) -> i64 {
  if sorted.is_empty() {
    return 0;
  }
  let idx = (p * sorted.len() / 100).min(sorted.len() - 1);
  sorted[idx]
}

fn rate(count: usize, total: usize) -> f64 {
  if total == 0 {
    0.0
  } else {
    count as f64 / total as f64 * 100.0
  }
}

pub fn resource_stats(name: &ManifestName, metrics: &[&BuildMetric]) -> ResourceStats {
  if metrics.is_empty() {
    return ResourceStats {
      manifest_name: name.clone(),
      ..Default::default()
    };
  }

  let total = metrics.len();
  let mut durations: Vec<i64> = metrics.iter().map(|m| m.duration_ms).collect();
  durations.sort_unstable();
  let total_duration: i64 = durations.iter().sum();
  let successes = metrics.iter().filter(|m| m.success).count();
  let live_updates = metrics.iter().filter(|m| m.live_update).count();
  let cache_hits = metrics.iter().filter(|m| m.cache_hit).count();
  let total_files: usize = metrics.iter().map(|m| m.files_changed).sum();
  let last = metrics.iter().max_by_key(|m| m.start_time);

  ResourceStats {
    manifest_name: name.clone(),
    total_builds: total,
    successful_builds: successes,
    failed_builds: total - successes,
    success_rate: rate(successes, total),
    total_duration_ms: total_duration,
    average_duration_ms: total_duration / total as i64,
    min_duration_ms: durations[0],
    max_duration_ms: durations[total - 1],
    p50_duration_ms: percentile(&durations, 50),
    p95_duration_ms: percentile(&durations, 95),
    p99_duration_ms: percentile(&durations, 99),
    live_update_count: live_updates,
    full_rebuild_count: total - live_updates,
    cache_hit_rate: rate(cache_hits, total),
    total_warnings: metrics.iter().map(|m| m.warning_count).sum(),
    last_build_time: last.map(|m| m.start_time),
    last_build_success: last.is_some_and(|m| m.success),
    average_files_changed: total_files as f64 / total as f64,
  }
}

/// Per-resource statistics, busiest resource first.
pub fn all_resource_stats(metrics: &[&BuildMetric]) -> Vec<ResourceStats> {
  let mut by_resource: BTreeMap<&ManifestName, Vec<&BuildMetric>> = BTreeMap::new();
  for m in metrics {
    by_resource.entry(&m.manifest_name).or_default().push(m);
  }
  let mut stats: Vec<ResourceStats> = by_resource
    .into_iter()
    .map(|(name, metrics)| resource_stats(name, &metrics))
    .collect();
  stats.sort_by(|a, b| b.total_builds.cmp(&a.total_builds));
  stats
}

pub fn session_stats(session_id: &str, start_time: DateTime<Utc>, metrics: &[&BuildMetric]) -> SessionStats {
  let mut chronological = metrics.to_vec();
  chronological.sort_by_key(|m| m.start_time);

  let mut streak = 0;
  let mut streak_type = None;
  for m in &chronological {
    let outcome = if m.success {
      StreakType::Success
    } else {
      StreakType::Failure
    };
    if streak_type == Some(outcome) {
      streak += 1;
    } else {
      streak = 1;
      streak_type = Some(outcome);
    }
  }

  let total = metrics.len();
  let total_duration: i64 = metrics.iter().map(|m| m.duration_ms).sum();
  let successes = metrics.iter().filter(|m| m.success).count();
  let live_updates = metrics.iter().filter(|m| m.live_update).count();
  let resources: HashSet<&ManifestName> = metrics.iter().map(|m| &m.manifest_name).collect();

  SessionStats {
    session_id: session_id.to_string(),
    start_time: Some(start_time),
    total_builds: total,
    successful_builds: successes,
    failed_builds: total - successes,
    total_duration_ms: total_duration,
    average_duration_ms: if total == 0 { 0 } else { total_duration / total as i64 },
    live_update_count: live_updates,
    full_rebuild_count: total - live_updates,
    resource_count: resources.len(),
    current_streak: streak,
    streak_type,
  }
}

/// The `limit` newest builds.
pub fn recent_builds(metrics: &[&BuildMetric], limit: usize) -> Vec<BuildMetric> {
  let mut sorted: Vec<BuildMetric> = metrics.iter().map(|m| (*m).clone()).collect();
  sorted.sort_by(|a, b| b.start_time.cmp(&a.start_time));
  sorted.truncate(limit);
  sorted
}

/// The `limit` longest builds.
pub fn slowest_builds(metrics: &[&BuildMetric], limit: usize) -> Vec<BuildMetric> {
  let mut sorted: Vec<BuildMetric> = metrics.iter().map(|m| (*m).clone()).collect();
  sorted.sort_by(|a, b| b.duration_ms.cmp(&a.duration_ms));
  sorted.truncate(limit);
  sorted
}

/// Resources with at least one failure, most failures first.
pub fn most_failed(stats: &[ResourceStats], limit: usize) -> Vec<ResourceStats> {
  let mut failing: Vec<ResourceStats> = stats.iter().filter(|s| s.failed_builds > 0).cloned().collect();
  failing.sort_by(|a, b| b.failed_builds.cmp(&a.failed_builds));
  failing.truncate(limit);
  failing
}

pub fn recommendations(stats: &[ResourceStats]) -> Vec<Recommendation> {
  let mut recs = Vec::new();

  for s in stats {
    let name = &s.manifest_name;
    let avg_secs = s.average_duration_ms as f64 / 1000.0;

    if s.average_duration_ms > SLOW_BUILD_MS && s.live_update_count < s.full_rebuild_count {
      recs.push(Recommendation {
        kind: RecommendationType::Performance,
        priority: RecommendationPriority::High,
        title: "Consider enabling Live Update".to_string(),
        description: format!(
          "Resource '{}' has slow builds (avg {:.1}s) with mostly full rebuilds. Live Update could significantly reduce iteration time.",
          name, avg_secs
        ),
        affected_resources: vec![name.clone()],
        potential_savings_ms: Some(s.average_duration_ms / 2),
      });
    }

    if s.total_builds >= MIN_BUILDS_FOR_RATES && s.success_rate < LOW_SUCCESS_RATE {
      recs.push(Recommendation {
        kind: RecommendationType::Reliability,
        priority: RecommendationPriority::High,
        title: "High build failure rate detected".to_string(),
        description: format!(
          "Resource '{}' has a {:.0}% success rate. Review build configuration and error logs.",
          name, s.success_rate
        ),
        affected_resources: vec![name.clone()],
        potential_savings_ms: None,
      });
    }

    if s.total_builds >= MIN_BUILDS_FOR_RATES && s.cache_hit_rate < LOW_CACHE_HIT_RATE {
      recs.push(Recommendation {
        kind: RecommendationType::Caching,
        priority: RecommendationPriority::Medium,
        title: "Improve Docker layer caching".to_string(),
        description: format!(
          "Resource '{}' has low cache hit rate ({:.0}%). Consider reordering Dockerfile instructions to maximize cache reuse.",
          name, s.cache_hit_rate
        ),
        affected_resources: vec![name.clone()],
        potential_savings_ms: Some(s.average_duration_ms / 3),
      });
    }

    if s.total_builds >= MIN_BUILDS_FOR_VARIANCE && s.max_duration_ms > s.average_duration_ms * 3 {
      recs.push(Recommendation {
        kind: RecommendationType::Performance,
        priority: RecommendationPriority::Low,
        title: "Build time variance is high".to_string(),
        description: format!(
          "Resource '{}' shows high variance in build times (max: {:.1}s, avg: {:.1}s). This may indicate intermittent issues or resource contention.",
          name,
          s.max_duration_ms as f64 / 1000.0,
          avg_secs
        ),
        affected_resources: vec![name.clone()],
        potential_savings_ms: None,
      });
    }
  }

  // Stable, so resources keep their order within a priority.
  recs.sort_by_key(|r| r.priority);
  recs
}
