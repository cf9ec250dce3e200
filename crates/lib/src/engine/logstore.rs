//! In-memory log of everything builds and reloads printed.
//!
//! Segments are tagged with the span of the build that produced them so a
//! build's warnings can be counted, and secrets declared mid-build can be
//! scrubbed from everything logged since that build started.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::build::SpanId;
use crate::load::SecretSet;

/// Position in the log store. Segments appended later have higher checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Checkpoint(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Info,
  Warn,
  Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSegment {
  pub span_id: SpanId,
  pub level: LogLevel,
  pub time: DateTime<Utc>,
  pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct LogStore {
  segments: Vec<LogSegment>,
}

impl LogStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn append(&mut self, span_id: &SpanId, level: LogLevel, text: impl Into<String>) {
    self.segments.push(LogSegment {
      span_id: span_id.clone(),
      level,
      time: Utc::now(),
      text: text.into(),
    });
  }

  pub fn checkpoint(&self) -> Checkpoint {
    Checkpoint(self.segments.len())
  }

  pub fn len(&self) -> usize {
    self.segments.len()
  }

  pub fn is_empty(&self) -> bool {
    self.segments.is_empty()
  }

  pub fn segments(&self) -> &[LogSegment] {
    &self.segments
  }

  /// Warning lines logged under `span_id`.
  pub fn warnings(&self, span_id: &SpanId) -> Vec<String> {
    self
      .segments
      .iter()
      .filter(|s| &s.span_id == span_id && s.level == LogLevel::Warn)
      .map(|s| s.text.clone())
      .collect()
  }

  /// All text logged under `span_id`, in order.
  pub fn span_text(&self, span_id: &SpanId) -> String {
    self
      .segments
      .iter()
      .filter(|s| &s.span_id == span_id)
      .map(|s| s.text.as_str())
      .collect()
  }

  /// Text logged at or after `checkpoint`.
  pub fn text_since(&self, checkpoint: Checkpoint) -> String {
    self
      .segments
      .iter()
      .skip(checkpoint.0)
      .map(|s| s.text.as_str())
      .collect()
  }

  /// Replaces every occurrence of a secret value in segments at or after `checkpoint`.
  pub fn scrub_secrets_starting_at(&mut self, secrets: &SecretSet, checkpoint: Checkpoint) {
    if secrets.is_empty() {
      return;
    }

    for segment in self.segments.iter_mut().skip(checkpoint.0) {
      for secret in secrets.values() {
        if secret.value.is_empty() || !segment.text.contains(&secret.value) {
          continue;
        }
        let redacted = format!("[redacted secret {}:{}]", secret.name, secret.key);
        segment.text = segment.text.replace(&secret.value, &redacted);
      }
    }
  }
}
