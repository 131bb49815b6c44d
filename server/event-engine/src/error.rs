//! Structured error types for the event engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("validation: {field}: {reason}")]
  Validation { field: String, reason: String },

  #[error("config: {0}")]
  Config(String),

  #[error("toml: {0}")]
  Toml(#[from] toml::de::Error),

  #[error("io: {0}")]
  Io(#[from] std::io::Error),

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),

  #[error("ingestion queue is closed")]
  QueueClosed,

  #[error("inconsistent store: {0}")]
  Inconsistent(String),

  #[error("pipeline panicked: {0}")]
  Panicked(String),
}

impl EngineError {
  pub fn validation(field: &str, reason: &str) -> Self {
    Self::Validation {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }

  pub fn config(msg: impl Into<String>) -> Self {
    Self::Config(msg.into())
  }
}

/// Failure of a single rule action. Recorded in the action log, never
/// propagated past the rule pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
  #[error("event status {0:?} does not allow changes")]
  Locked(crate::types::EventStatus),

  #[error("event already belongs to correlation {0}")]
  AlreadyCorrelated(String),

  #[error("incident {0} already created for event")]
  AlreadyEscalated(String),

  #[error("assignee must not be empty")]
  EmptyAssignee,
}

/// Failure reported by the incident-creation collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IncidentError {
  #[error("incident rejected: {0}")]
  Rejected(String),

  #[error("incident service unavailable: {0}")]
  Unavailable(String),
}
