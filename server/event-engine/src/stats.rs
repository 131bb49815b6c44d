//! Aggregate pipeline statistics.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::types::{Event, EventSource, EventStatus, EventType};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
  Running,
  #[default]
  Stopped,
}

/// Snapshot returned by `EventManager::get_statistics`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
  /// Events that finished processing and were stored.
  pub total_events: u64,
  pub events_by_type: BTreeMap<EventType, u64>,
  pub events_by_source: BTreeMap<EventSource, u64>,
  pub incidents_created: u64,
  pub events_correlated: u64,
  pub events_suppressed: u64,
  pub events_duplicated: u64,
  /// Processing attempts that failed (each retry counts again).
  pub events_failed: u64,
  pub queue_size: usize,
  pub processing_status: ProcessingStatus,
}

impl Statistics {
  /// Count a stored event once its processing step has completed.
  pub fn record_processed(&mut self, event: &Event) {
    self.total_events += 1;
    *self.events_by_type.entry(event.event_type).or_insert(0) += 1;
    *self.events_by_source.entry(event.source).or_insert(0) += 1;
    if event.status == EventStatus::Suppressed {
      self.events_suppressed += 1;
    }
    if event.is_duplicate() {
      self.events_duplicated += 1;
    }
  }

  pub fn record_correlated(&mut self, newly_marked: usize) {
    self.events_correlated += newly_marked as u64;
  }

  pub fn record_incident(&mut self) {
    self.incidents_created += 1;
  }

  pub fn record_failure(&mut self) {
    self.events_failed += 1;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::normalize::normalize;
  use crate::types::{NewEvent, DUPLICATE_TAG};
  use chrono::Utc;

  #[test]
  fn processed_events_are_bucketed() {
    let mut stats = Statistics::default();
    let crit = normalize(
      &NewEvent::new("DB timeout", "zabbix").with_type("critical").with_source("infrastructure"),
      Utc::now(),
    )
    .unwrap();
    let mut noise = normalize(&NewEvent::new("ping", "heartbeat"), Utc::now()).unwrap();
    noise.status = EventStatus::Suppressed;
    noise.parent_event_id = Some(crit.id.clone());
    noise.tags.insert(DUPLICATE_TAG.into());

    stats.record_processed(&crit);
    stats.record_processed(&noise);
    stats.record_correlated(3);
    stats.record_incident();

    assert_eq!(stats.total_events, 2);
    assert_eq!(stats.events_by_type[&EventType::Critical], 1);
    assert_eq!(stats.events_by_type[&EventType::Informational], 1);
    assert_eq!(stats.events_by_source[&EventSource::Infrastructure], 1);
    assert_eq!(stats.events_suppressed, 1);
    assert_eq!(stats.events_duplicated, 1);
    assert_eq!(stats.events_correlated, 3);
    assert_eq!(stats.incidents_created, 1);
  }

  #[test]
  fn snapshot_serializes_enum_keys_as_strings() {
    let mut stats = Statistics::default();
    stats.events_by_type.insert(EventType::Alert, 2);
    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["events_by_type"]["alert"], 2);
    assert_eq!(json["processing_status"], "stopped");
  }
}
