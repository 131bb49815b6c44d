//! Core types for the event engine (intake contract + internal models).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Identifier of a stored event (UUID v4, hyphenated).
pub type EventId = String;

/// Identifier shared by every event of one correlation group.
pub type CorrelationId = String;

/// Tag attached to events recognized as repeats of an open event.
pub const DUPLICATE_TAG: &str = "duplicate";

/// Lowercase and drop separators so "User Report", "user_report" and
/// "user-report" compare equal.
fn token(s: &str) -> String {
  s.chars()
    .filter(|c| !matches!(c, ' ' | '_' | '-'))
    .flat_map(char::to_lowercase)
    .collect()
}

// ---------------------------------------------------------------------------
// Inbound types (intake contract — what the caller sends)
// ---------------------------------------------------------------------------

/// Field set accepted by `EventManager::create_event`. Unknown JSON fields are
/// ignored; enumerations arrive as loose strings and default when absent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewEvent {
  pub title: String,
  pub description: String,
  pub event_type: Option<String>,
  pub source: Option<String>,
  pub source_system: String,
  pub configuration_item: Option<String>,
  pub service_affected: Option<String>,
  pub priority: Option<String>,
  pub impact: Option<String>,
  pub urgency: Option<String>,
  pub attributes: BTreeMap<String, String>,
  pub tags: BTreeSet<String>,
}

impl NewEvent {
  pub fn new(title: impl Into<String>, source_system: impl Into<String>) -> Self {
    Self {
      title: title.into(),
      source_system: source_system.into(),
      ..Self::default()
    }
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = description.into();
    self
  }

  pub fn with_type(mut self, event_type: impl Into<String>) -> Self {
    self.event_type = Some(event_type.into());
    self
  }

  pub fn with_source(mut self, source: impl Into<String>) -> Self {
    self.source = Some(source.into());
    self
  }

  pub fn with_item(mut self, configuration_item: impl Into<String>) -> Self {
    self.configuration_item = Some(configuration_item.into());
    self
  }

  pub fn with_service(mut self, service: impl Into<String>) -> Self {
    self.service_affected = Some(service.into());
    self
  }

  pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
    self.priority = Some(priority.into());
    self
  }

  pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.attributes.insert(key.into(), value.into());
    self
  }

  pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
    self.tags.insert(tag.into());
    self
  }
}

// ---------------------------------------------------------------------------
// Classification enums (normalized)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
  #[default]
  Informational,
  Warning,
  Exception,
  Alert,
  Critical,
}

impl EventType {
  pub fn from_str_loose(s: &str) -> Option<Self> {
    match token(s).as_str() {
      "informational" | "information" | "info" => Some(Self::Informational),
      "warning" | "warn" => Some(Self::Warning),
      "exception" | "error" | "err" => Some(Self::Exception),
      "alert" => Some(Self::Alert),
      "critical" | "crit" | "fatal" => Some(Self::Critical),
      _ => None,
    }
  }

  /// Types that open an incident on their own when nothing else claims them.
  pub fn escalates(self) -> bool {
    matches!(self, Self::Critical | Self::Exception)
  }

  pub fn label(self) -> &'static str {
    match self {
      Self::Informational => "Informational",
      Self::Warning => "Warning",
      Self::Exception => "Exception",
      Self::Alert => "Alert",
      Self::Critical => "Critical",
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
  #[default]
  MonitoringTool,
  Application,
  Infrastructure,
  Network,
  Security,
  UserReport,
  AutomatedScan,
  SyntheticCheck,
}

impl EventSource {
  pub fn from_str_loose(s: &str) -> Option<Self> {
    match token(s).as_str() {
      "monitoringtool" | "monitoring" => Some(Self::MonitoringTool),
      "application" | "app" => Some(Self::Application),
      "infrastructure" | "infra" => Some(Self::Infrastructure),
      "network" | "net" => Some(Self::Network),
      "security" | "sec" => Some(Self::Security),
      "userreport" | "user" => Some(Self::UserReport),
      "automatedscan" | "scan" => Some(Self::AutomatedScan),
      "syntheticcheck" | "synthetic" => Some(Self::SyntheticCheck),
      _ => None,
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      Self::MonitoringTool => "Monitoring Tool",
      Self::Application => "Application",
      Self::Infrastructure => "Infrastructure",
      Self::Network => "Network",
      Self::Security => "Security",
      Self::UserReport => "User Report",
      Self::AutomatedScan => "Automated Scan",
      Self::SyntheticCheck => "Synthetic Check",
    }
  }
}

/// Incident-domain priority. Declaration order runs from most to least
/// urgent, so `min()` over a group picks the most urgent one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
  Critical,
  High,
  Medium,
  Low,
  #[default]
  Planning,
}

impl Priority {
  pub fn from_str_loose(s: &str) -> Option<Self> {
    match token(s).as_str() {
      "critical" | "p1" | "1" => Some(Self::Critical),
      "high" | "p2" | "2" => Some(Self::High),
      "medium" | "p3" | "3" => Some(Self::Medium),
      "low" | "p4" | "4" => Some(Self::Low),
      "planning" | "p5" | "5" => Some(Self::Planning),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
  High,
  Medium,
  #[default]
  Low,
}

impl Impact {
  pub fn from_str_loose(s: &str) -> Option<Self> {
    match token(s).as_str() {
      "high" | "1" => Some(Self::High),
      "medium" | "2" => Some(Self::Medium),
      "low" | "3" => Some(Self::Low),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
  High,
  Medium,
  #[default]
  Low,
}

impl Urgency {
  pub fn from_str_loose(s: &str) -> Option<Self> {
    match token(s).as_str() {
      "high" | "1" => Some(Self::High),
      "medium" | "2" => Some(Self::Medium),
      "low" | "3" => Some(Self::Low),
      _ => None,
    }
  }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
  #[default]
  New,
  Acknowledged,
  InProgress,
  Resolved,
  Closed,
  Correlated,
  Suppressed,
}

impl EventStatus {
  /// Open events still count as parents for duplicate detection.
  pub fn is_open(self) -> bool {
    !matches!(self, Self::Resolved | Self::Closed)
  }

  /// Rule and correlation actions may only change priority or tags here.
  pub fn allows_mutation(self) -> bool {
    matches!(self, Self::New | Self::Acknowledged)
  }
}

// ---------------------------------------------------------------------------
// Event (canonical, stored)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
  pub id: EventId,
  pub title: String,
  pub description: String,
  pub event_type: EventType,
  pub source: EventSource,
  pub source_system: String,
  pub configuration_item: Option<String>,
  pub service_affected: Option<String>,
  pub attributes: BTreeMap<String, String>,
  pub tags: BTreeSet<String>,

  pub priority: Priority,
  pub impact: Impact,
  pub urgency: Urgency,

  pub status: EventStatus,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub acknowledged_at: Option<DateTime<Utc>>,
  pub resolved_at: Option<DateTime<Utc>>,
  pub closed_at: Option<DateTime<Utc>>,
  pub acknowledged_by: Option<String>,
  pub resolved_by: Option<String>,
  pub closed_by: Option<String>,
  pub assigned_to: Option<String>,
  pub resolution_notes: Option<String>,

  pub correlation_id: Option<CorrelationId>,
  pub parent_event_id: Option<EventId>,
  pub related_events: Vec<EventId>,
  pub escalation_level: u32,
  pub incident_id: Option<String>,
  pub notification_sent: bool,
}

impl Event {
  pub fn has_tag(&self, tag: &str) -> bool {
    self.tags.contains(tag)
  }

  pub fn is_duplicate(&self) -> bool {
    self.parent_event_id.is_some()
  }

  /// Record an incident id unless one is already present.
  pub fn record_incident(&mut self, incident_id: &str) -> bool {
    if self.incident_id.is_some() {
      return false;
    }
    self.incident_id = Some(incident_id.to_string());
    self.notification_sent = true;
    true
  }

  /// Join a correlation group. The id is write-once; the status only moves
  /// to `Correlated` from `New`.
  pub fn join_correlation(&mut self, correlation_id: &str) -> bool {
    if self.correlation_id.is_some() {
      return false;
    }
    self.correlation_id = Some(correlation_id.to_string());
    if self.status == EventStatus::New {
      self.status = EventStatus::Correlated;
    }
    true
  }
}

// ---------------------------------------------------------------------------
// CLI stream wrappers
// ---------------------------------------------------------------------------

/// Structured error output for invalid input lines.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorOutput {
  pub error: bool,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub field: Option<String>,
}

impl ErrorOutput {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      error: true,
      message: message.into(),
      field: None,
    }
  }

  pub fn with_field(mut self, field: impl Into<String>) -> Self {
    self.field = Some(field.into());
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn loose_parsing_accepts_display_spellings() {
    assert_eq!(EventType::from_str_loose("Critical"), Some(EventType::Critical));
    assert_eq!(EventType::from_str_loose("ERROR"), Some(EventType::Exception));
    assert_eq!(EventSource::from_str_loose("Infrastructure"), Some(EventSource::Infrastructure));
    assert_eq!(EventSource::from_str_loose("user report"), Some(EventSource::UserReport));
    assert_eq!(EventSource::from_str_loose("synthetic_check"), Some(EventSource::SyntheticCheck));
    assert_eq!(Priority::from_str_loose("P2"), Some(Priority::High));
    assert_eq!(Impact::from_str_loose("bogus"), None);
  }

  #[test]
  fn defaults_are_lowest_severity() {
    assert_eq!(EventType::default(), EventType::Informational);
    assert_eq!(Priority::default(), Priority::Planning);
    assert_eq!(Impact::default(), Impact::Low);
    assert_eq!(Urgency::default(), Urgency::Low);
  }

  #[test]
  fn most_urgent_priority_sorts_first() {
    let group = [Priority::Low, Priority::High, Priority::Medium];
    assert_eq!(group.iter().min(), Some(&Priority::High));
  }

  #[test]
  fn status_groups() {
    assert!(EventStatus::Correlated.is_open());
    assert!(!EventStatus::Resolved.is_open());
    assert!(EventStatus::Acknowledged.allows_mutation());
    assert!(!EventStatus::Suppressed.allows_mutation());
  }
}
