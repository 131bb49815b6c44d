//! Event correlation and escalation engine.
//!
//! Monitoring and operational events enter through `EventManager::create_event`,
//! are queued, and a single background worker runs each one through duplicate
//! detection, ordered rule evaluation and time-windowed correlation. Patterns
//! that matter are escalated through an `IncidentSink` collaborator.
//!
//! In-memory state only; persistence and incident records live elsewhere.

pub mod config;
pub mod correlation;
pub mod dedup;
pub mod error;
pub mod fingerprint;
pub mod incident;
pub mod lifecycle;
pub mod manager;
pub mod normalize;
pub mod pipeline;
pub mod rules;
pub mod stats;
pub mod store;
pub mod types;

pub use config::{Config, RuleSet};
pub use correlation::{CorrelationDefinition, CorrelationResult};
pub use error::{EngineError, IncidentError};
pub use incident::{IncidentRequest, IncidentSink, RecordingSink};
pub use manager::{DeadLetter, EventManager};
pub use rules::{Conditions, Rule, RuleAction};
pub use stats::Statistics;
pub use types::{Event, EventStatus, NewEvent};
