//! Incident-creation collaborator seam.
//!
//! The engine never builds incident records itself; it hands an
//! `IncidentRequest` to an `IncidentSink` and writes the returned id back onto
//! the originating events.

use parking_lot::Mutex;
use serde::Serialize;

use crate::correlation::CorrelationResult;
use crate::error::IncidentError;
use crate::types::{Event, EventId, Impact, Priority, Urgency};

/// Payload handed to the incident collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncidentRequest {
  pub title: String,
  pub description: String,
  pub priority: Priority,
  pub impact: Impact,
  pub urgency: Urgency,
  pub category: String,
  pub subcategory: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub configuration_item: Option<String>,
  pub reporter: String,
  pub source_event_ids: Vec<EventId>,
}

impl IncidentRequest {
  /// Escalate one event on its own.
  pub fn for_event(event: &Event, reporter: &str) -> Self {
    let description = if event.description.is_empty() {
      format!(
        "{} event reported by {}",
        event.event_type.label(),
        event.source_system
      )
    } else {
      event.description.clone()
    };

    Self {
      title: event.title.clone(),
      description,
      priority: event.priority,
      impact: event.impact,
      urgency: event.urgency,
      category: event.source.label().to_string(),
      subcategory: event.event_type.label().to_string(),
      configuration_item: event.configuration_item.clone(),
      reporter: reporter.to_string(),
      source_event_ids: vec![event.id.clone()],
    }
  }

  /// Escalate a correlation group. `events` holds the members that could be
  /// resolved; the most urgent priority, impact and urgency win.
  pub fn for_group(result: &CorrelationResult, events: &[Event], reporter: &str) -> Self {
    let lead = events.first();
    let mut lines = vec![format!(
      "{} related events correlated by '{}' ({})",
      result.event_ids.len(),
      result.definition,
      result.correlation_id
    )];
    lines.extend(
      events
        .iter()
        .map(|e| format!("- {} [{}] {}", e.created_at.to_rfc3339(), e.event_type.label(), e.title)),
    );

    Self {
      title: match lead {
        Some(e) => format!("Correlated: {} ({} events)", e.title, result.event_ids.len()),
        None => format!("Correlated: {} ({} events)", result.definition, result.event_ids.len()),
      },
      description: lines.join("\n"),
      priority: events.iter().map(|e| e.priority).min().unwrap_or_default(),
      impact: events.iter().map(|e| e.impact).min().unwrap_or_default(),
      urgency: events.iter().map(|e| e.urgency).min().unwrap_or_default(),
      category: lead.map_or("Event", |e| e.source.label()).to_string(),
      subcategory: result.definition.clone(),
      configuration_item: lead.and_then(|e| e.configuration_item.clone()),
      reporter: reporter.to_string(),
      source_event_ids: result.event_ids.clone(),
    }
  }
}

/// Creates incident records on behalf of the engine.
///
/// Called from the worker while processing an event; implementations must not
/// call back into the `EventManager` that owns them.
pub trait IncidentSink: Send + Sync {
  fn create_incident(&self, request: &IncidentRequest) -> Result<String, IncidentError>;
}

/// In-memory sink that records every request and hands out sequential ids.
#[derive(Debug, Default)]
pub struct RecordingSink {
  requests: Mutex<Vec<IncidentRequest>>,
  failure: Mutex<Option<IncidentError>>,
}

impl RecordingSink {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make every following call fail with `error` (or succeed again with `None`).
  pub fn set_failure(&self, error: Option<IncidentError>) {
    *self.failure.lock() = error;
  }

  pub fn requests(&self) -> Vec<IncidentRequest> {
    self.requests.lock().clone()
  }

  pub fn count(&self) -> usize {
    self.requests.lock().len()
  }
}

impl IncidentSink for RecordingSink {
  fn create_incident(&self, request: &IncidentRequest) -> Result<String, IncidentError> {
    if let Some(err) = self.failure.lock().clone() {
      return Err(err);
    }
    let mut requests = self.requests.lock();
    requests.push(request.clone());
    Ok(format!("INC{:07}", requests.len()))
  }
}
