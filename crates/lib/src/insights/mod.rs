//! Build insights: per-build metrics, rolling statistics and recommendations.
//!
//! The [`Collector`] watches the engine state and records each finished build
//! into an [`InsightsStore`]; [`FileStore`] keeps them on disk.

mod collector;
pub mod stats;
mod store;
mod types;

pub use collector::Collector;
pub use store::{FileStore, InsightsError, InsightsStore};
pub use types::{
  BuildInsights, BuildMetric, Recommendation, RecommendationPriority, RecommendationType, ResourceStats, SessionStats,
  StreakType,
};
