//! Validate intake fields and build canonical Event models.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::EngineError;
use crate::types::*;

/// Parse an optional loose enum field; absent or blank values take the default.
fn parse_field<T: Default>(
  value: &Option<String>,
  field: &str,
  expected: &str,
  parse: fn(&str) -> Option<T>,
) -> Result<T, EngineError> {
  match value.as_deref().map(str::trim) {
    None | Some("") => Ok(T::default()),
    Some(s) => parse(s).ok_or_else(|| EngineError::validation(field, &format!("expected {}", expected))),
  }
}

/// Trim an optional string, mapping blanks to `None`.
fn non_blank(value: &Option<String>) -> Option<String> {
  value
    .as_deref()
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
}

/// Validate a `NewEvent` and turn it into a fresh `Event` stamped at `now`.
pub fn normalize(raw: &NewEvent, now: DateTime<Utc>) -> Result<Event, EngineError> {
  let title = raw.title.trim();
  if title.is_empty() {
    return Err(EngineError::validation("title", "must not be empty"));
  }
  let source_system = raw.source_system.trim();
  if source_system.is_empty() {
    return Err(EngineError::validation("source_system", "must not be empty"));
  }

  let event_type = parse_field(
    &raw.event_type,
    "event_type",
    "informational|warning|exception|alert|critical",
    EventType::from_str_loose,
  )?;
  let source = parse_field(
    &raw.source,
    "source",
    "monitoring_tool|application|infrastructure|network|security|user_report|automated_scan|synthetic_check",
    EventSource::from_str_loose,
  )?;
  let priority = parse_field(
    &raw.priority,
    "priority",
    "critical|high|medium|low|planning",
    Priority::from_str_loose,
  )?;
  let impact = parse_field(&raw.impact, "impact", "high|medium|low", Impact::from_str_loose)?;
  let urgency = parse_field(&raw.urgency, "urgency", "high|medium|low", Urgency::from_str_loose)?;

  if raw.tags.iter().any(|t| t.trim().is_empty()) {
    return Err(EngineError::validation("tags", "must not contain blank tags"));
  }
  if raw.attributes.keys().any(|k| k.trim().is_empty()) {
    return Err(EngineError::validation("attributes", "keys must not be blank"));
  }

  Ok(Event {
    id: Uuid::new_v4().to_string(),
    title: title.to_string(),
    description: raw.description.trim().to_string(),
    event_type,
    source,
    source_system: source_system.to_string(),
    configuration_item: non_blank(&raw.configuration_item),
    service_affected: non_blank(&raw.service_affected),
    attributes: raw.attributes.clone(),
    tags: raw.tags.clone(),
    priority,
    impact,
    urgency,
    status: EventStatus::New,
    created_at: now,
    updated_at: now,
    acknowledged_at: None,
    resolved_at: None,
    closed_at: None,
    acknowledged_by: None,
    resolved_by: None,
    closed_by: None,
    assigned_to: None,
    resolution_notes: None,
    correlation_id: None,
    parent_event_id: None,
    related_events: Vec::new(),
    escalation_level: 0,
    incident_id: None,
    notification_sent: false,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 10, 30, 0).unwrap()
  }

  #[test]
  fn normalize_rejects_empty_title() {
    let err = normalize(&NewEvent::new("   ", "zabbix"), now()).unwrap_err();
    assert!(err.to_string().contains("title"));
  }

  #[test]
  fn normalize_rejects_missing_source_system() {
    let err = normalize(&NewEvent::new("disk full", ""), now()).unwrap_err();
    assert!(err.to_string().contains("source_system"));
  }

  #[test]
  fn normalize_rejects_unknown_type() {
    let raw = NewEvent::new("disk full", "zabbix").with_type("catastrophic");
    match normalize(&raw, now()).unwrap_err() {
      EngineError::Validation { field, .. } => assert_eq!(field, "event_type"),
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn normalize_applies_defaults() {
    let event = normalize(&NewEvent::new("disk full", "zabbix"), now()).unwrap();
    assert_eq!(event.event_type, EventType::Informational);
    assert_eq!(event.source, EventSource::MonitoringTool);
    assert_eq!(event.priority, Priority::Planning);
    assert_eq!(event.impact, Impact::Low);
    assert_eq!(event.urgency, Urgency::Low);
    assert_eq!(event.status, EventStatus::New);
    assert_eq!(event.created_at, now());
    assert!(Uuid::parse_str(&event.id).is_ok());
  }

  #[test]
  fn normalize_valid_event() {
    let raw = NewEvent::new(" DB timeout ", "zabbix")
      .with_type("Critical")
      .with_source("Infrastructure")
      .with_item(" SRV-01 ")
      .with_service("")
      .with_priority("high");
    let event = normalize(&raw, now()).unwrap();
    assert_eq!(event.title, "DB timeout");
    assert_eq!(event.event_type, EventType::Critical);
    assert_eq!(event.source, EventSource::Infrastructure);
    assert_eq!(event.configuration_item.as_deref(), Some("SRV-01"));
    assert_eq!(event.service_affected, None);
    assert_eq!(event.priority, Priority::High);
  }

  #[test]
  fn ids_are_unique() {
    let raw = NewEvent::new("disk full", "zabbix");
    let a = normalize(&raw, now()).unwrap();
    let b = normalize(&raw, now()).unwrap();
    assert_ne!(a.id, b.id);
  }
}
