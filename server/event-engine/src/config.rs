//! Engine configuration with sane defaults.

use serde::Deserialize;
use std::path::Path;
use tracing::info;

use crate::correlation::CorrelationDefinition;
use crate::error::EngineError;
use crate::rules::Rule;

/// Tunables for intake, deduplication and worker lifecycle.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Lookback for duplicate detection, in seconds.
  pub duplicate_window_secs: u64,
  /// Times a failed event is re-enqueued before it is dead-lettered.
  pub max_retries: u32,
  /// Bounded wait for the worker to finish its in-flight event on stop.
  pub shutdown_timeout_secs: u64,
  /// Reporter name placed on incident requests.
  pub reporter: String,
  /// Dead letters kept for inspection; oldest are dropped first.
  pub dead_letter_capacity: usize,
  /// How often the worker escalates events that aged out of their
  /// correlation windows and prunes expired state.
  pub sweep_interval_secs: u64,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      duplicate_window_secs: 300,
      max_retries: 3,
      shutdown_timeout_secs: 5,
      reporter: "event-manager".to_string(),
      dead_letter_capacity: 1000,
      sweep_interval_secs: 30,
    }
  }
}

/// Full configuration file: engine tunables plus the rule and correlation
/// definitions to install at startup.
///
/// ```toml
/// [engine]
/// duplicate_window_secs = 300
///
/// [[rules]]
/// id = "db-critical"
/// name = "Database outages are P1"
/// priority = 10
/// conditions = { event_types = ["critical"], sources = ["infrastructure"] }
/// actions = [{ set_priority = "critical" }, { add_tag = "database" }]
///
/// [[correlations]]
/// name = "db-storm"
/// window_secs = 300
/// max_events = 3
/// create_incident = true
/// conditions = { event_types = ["critical"] }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuleSet {
  pub engine: Config,
  pub rules: Vec<Rule>,
  pub correlations: Vec<CorrelationDefinition>,
}

impl RuleSet {
  pub fn from_toml_str(content: &str) -> Result<Self, EngineError> {
    let set: RuleSet = toml::from_str(content)?;
    set.validate()?;
    Ok(set)
  }

  /// Load configuration from file.
  pub fn load(path: &Path) -> Result<Self, EngineError> {
    let content = std::fs::read_to_string(path)?;
    let set = Self::from_toml_str(&content)?;
    info!(
      path = %path.display(),
      rules = set.rules.len(),
      correlations = set.correlations.len(),
      "loaded configuration"
    );
    Ok(set)
  }

  fn validate(&self) -> Result<(), EngineError> {
    if self.engine.reporter.trim().is_empty() {
      return Err(EngineError::config("engine.reporter must not be empty"));
    }
    if self.engine.sweep_interval_secs == 0 {
      return Err(EngineError::config("engine.sweep_interval_secs must be at least 1"));
    }
    for def in &self.correlations {
      def.validate()?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::rules::RuleAction;
  use crate::types::{EventType, Priority};

  #[test]
  fn empty_file_uses_defaults() {
    let set = RuleSet::from_toml_str("").unwrap();
    assert_eq!(set.engine.duplicate_window_secs, 300);
    assert_eq!(set.engine.max_retries, 3);
    assert!(set.rules.is_empty());
  }

  #[test]
  fn parses_rules_and_correlations() {
    let set = RuleSet::from_toml_str(
      r#"
      [engine]
      max_retries = 1

      [[rules]]
      id = "db-critical"
      name = "Database outages are P1"
      priority = 10
      conditions = { event_types = ["critical"], attributes = { db = "primary" } }
      actions = [{ set_priority = "critical" }, { add_tag = "database" }, "escalate"]

      [[correlations]]
      name = "db-storm"
      window_secs = 300
      max_events = 3
      create_incident = true
      "#,
    )
    .unwrap();

    assert_eq!(set.engine.max_retries, 1);
    assert_eq!(set.engine.duplicate_window_secs, 300);
    let rule = &set.rules[0];
    assert!(rule.enabled);
    assert_eq!(rule.conditions.event_types, vec![EventType::Critical]);
    assert_eq!(rule.actions[0], RuleAction::SetPriority(Priority::Critical));
    assert_eq!(rule.actions[2], RuleAction::Escalate);
    assert_eq!(set.correlations[0].max_events, 3);
  }

  #[test]
  fn zero_threshold_is_rejected() {
    let err = RuleSet::from_toml_str(
      r#"
      [[correlations]]
      name = "broken"
      window_secs = 60
      max_events = 0
      "#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("max_events"));
  }

  #[test]
  fn zero_sweep_interval_is_rejected() {
    let err = RuleSet::from_toml_str("[engine]\nsweep_interval_secs = 0\n").unwrap_err();
    assert!(err.to_string().contains("sweep_interval_secs"));
  }
}
