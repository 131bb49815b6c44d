//! Time-windowed correlation of related events.
//!
//! Each definition keeps one sliding window per scope (the event's
//! configuration item, or a global scope for events without one). Windows are
//! evicted on every access. When a window reaches the definition's threshold
//! its members become one correlation group and the window starts over.
//!
//! Placing an event is split in two: `place` works out what would happen
//! without touching any window, and `commit` applies it once the rest of the
//! processing step has succeeded. Entries of incident-creating definitions
//! that age out without joining a group are reported so the caller can
//! escalate them on their own.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::info;
use uuid::Uuid;

use crate::error::EngineError;
use crate::rules::Conditions;
use crate::types::{CorrelationId, Event, EventId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationDefinition {
  pub name: String,
  #[serde(default)]
  pub conditions: Conditions,
  pub window_secs: u64,
  /// Events needed inside the window to form a group.
  pub max_events: usize,
  #[serde(default)]
  pub create_incident: bool,
  /// Carried through to the result for the incident collaborator; the engine
  /// does not schedule anything itself.
  #[serde(default)]
  pub escalation_delay_secs: Option<u64>,
}

impl CorrelationDefinition {
  pub fn new(name: impl Into<String>, window_secs: u64, max_events: usize) -> Self {
    Self {
      name: name.into(),
      conditions: Conditions::default(),
      window_secs,
      max_events,
      create_incident: false,
      escalation_delay_secs: None,
    }
  }

  pub fn when(mut self, conditions: Conditions) -> Self {
    self.conditions = conditions;
    self
  }

  pub fn creating_incident(mut self) -> Self {
    self.create_incident = true;
    self
  }

  pub fn validate(&self) -> Result<(), EngineError> {
    if self.name.trim().is_empty() {
      return Err(EngineError::config("correlation name must not be empty"));
    }
    if self.max_events == 0 {
      return Err(EngineError::config(format!("{}: max_events must be at least 1", self.name)));
    }
    if self.window_secs == 0 {
      return Err(EngineError::config(format!("{}: window_secs must be at least 1", self.name)));
    }
    Ok(())
  }

  fn window(&self) -> Duration {
    Duration::seconds(self.window_secs as i64)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WindowScope {
  Item(String),
  Global,
}

impl WindowScope {
  pub fn of(event: &Event) -> Self {
    match &event.configuration_item {
      Some(ci) => Self::Item(ci.clone()),
      None => Self::Global,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
  pub definition: usize,
  pub scope: WindowScope,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorrelationResult {
  pub correlation_id: CorrelationId,
  pub definition: String,
  pub event_ids: Vec<EventId>,
  pub create_incident: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub escalation_delay_secs: Option<u64>,
}

/// Where an event lands in its claiming definition's window.
#[derive(Debug, Clone)]
pub struct Placement {
  key: WindowKey,
  event_id: EventId,
  created_at: DateTime<Utc>,
  cutoff: DateTime<Utc>,
  /// Entries that aged out of an incident-creating window without a group.
  pub expired: Vec<EventId>,
  pub result: Option<CorrelationResult>,
}

#[derive(Debug, Default)]
pub struct CorrelationEngine {
  definitions: Vec<CorrelationDefinition>,
  windows: HashMap<WindowKey, VecDeque<(EventId, DateTime<Utc>)>>,
}

impl CorrelationEngine {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_definition(&mut self, definition: CorrelationDefinition) -> Result<(), EngineError> {
    definition.validate()?;
    self.definitions.push(definition);
    Ok(())
  }

  pub fn definitions(&self) -> &[CorrelationDefinition] {
    &self.definitions
  }

  /// The definition that would claim this event, if any.
  pub fn claiming(&self, event: &Event) -> Option<&CorrelationDefinition> {
    self.definitions.iter().find(|d| d.conditions.matches(event))
  }

  /// Work out where an event lands without changing any window.
  ///
  /// Window time is the event's creation time, so queueing delay never
  /// shortens a window. Returns `None` when no definition claims the event.
  pub fn place(&self, event: &Event) -> Option<Placement> {
    let (index, definition) = self
      .definitions
      .iter()
      .enumerate()
      .find(|(_, d)| d.conditions.matches(event))?;

    let key = WindowKey {
      definition: index,
      scope: WindowScope::of(event),
    };
    let cutoff = event.created_at - definition.window();
    let window = self.windows.get(&key);

    let mut members: Vec<EventId> = window
      .into_iter()
      .flatten()
      .filter(|(_, ts)| *ts >= cutoff)
      .map(|(id, _)| id.clone())
      .collect();
    let expired = if definition.create_incident {
      window
        .into_iter()
        .flatten()
        .filter(|(_, ts)| *ts < cutoff)
        .map(|(id, _)| id.clone())
        .collect()
    } else {
      Vec::new()
    };
    if !members.contains(&event.id) {
      members.push(event.id.clone());
    }

    let result = (members.len() >= definition.max_events).then(|| CorrelationResult {
      correlation_id: format!("corr-{}", Uuid::new_v4().simple()),
      definition: definition.name.clone(),
      event_ids: members,
      create_incident: definition.create_incident,
      escalation_delay_secs: definition.escalation_delay_secs,
    });

    Some(Placement {
      key,
      event_id: event.id.clone(),
      created_at: event.created_at,
      cutoff,
      expired,
      result,
    })
  }

  /// Apply a placement: evict, then either append the event or clear the
  /// window it completed.
  pub fn commit(&mut self, placement: &Placement) {
    let window = self.windows.entry(placement.key.clone()).or_default();
    window.retain(|(_, ts)| *ts >= placement.cutoff);

    match &placement.result {
      Some(result) => {
        window.clear();
        info!(
          correlation_id = %result.correlation_id,
          definition = %result.definition,
          events = result.event_ids.len(),
          "correlation triggered"
        );
      }
      None => {
        if !window.iter().any(|(id, _)| *id == placement.event_id) {
          window.push_back((placement.event_id.clone(), placement.created_at));
        }
      }
    }
  }

  /// Place and commit in one go, marking the event when it completes a group.
  pub fn correlate(&mut self, event: &mut Event) -> Option<CorrelationResult> {
    let placement = self.place(event)?;
    self.commit(&placement);
    let result = placement.result?;
    event.join_correlation(&result.correlation_id);
    Some(result)
  }

  /// Entries of incident-creating definitions that have aged out by `now`.
  pub fn expired(&self, now: DateTime<Utc>) -> Vec<EventId> {
    self
      .windows
      .iter()
      .filter_map(|(key, window)| {
        let def = self.definitions.get(key.definition)?;
        def.create_incident.then(|| (now - def.window(), window))
      })
      .flat_map(|(cutoff, window)| {
        window
          .iter()
          .filter(move |(_, ts)| *ts < cutoff)
          .map(|(id, _)| id.clone())
      })
      .collect()
  }

  /// Events currently held for a definition and scope.
  pub fn window_len(&self, definition: usize, scope: &WindowScope) -> usize {
    let key = WindowKey {
      definition,
      scope: scope.clone(),
    };
    self.windows.get(&key).map_or(0, VecDeque::len)
  }

  /// Drop expired entries from every window and forget empty windows.
  pub fn purge_expired(&mut self, now: DateTime<Utc>) {
    let definitions = &self.definitions;
    self.windows.retain(|key, window| {
      if let Some(def) = definitions.get(key.definition) {
        let cutoff = now - def.window();
        window.retain(|(_, ts)| *ts >= cutoff);
      }
      !window.is_empty()
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::normalize::normalize;
  use crate::types::{EventSource, EventStatus, EventType, NewEvent};
  use chrono::TimeZone;

  fn at(min: u32, sec: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 10, min, sec).unwrap()
  }

  fn db_event(ci: Option<&str>, ts: DateTime<Utc>) -> Event {
    let mut raw = NewEvent::new("DB timeout", "zabbix")
      .with_type("critical")
      .with_source("infrastructure");
    if let Some(ci) = ci {
      raw = raw.with_item(ci);
    }
    normalize(&raw, ts).unwrap()
  }

  fn critical_infra(max_events: usize) -> CorrelationDefinition {
    CorrelationDefinition::new("db-storm", 300, max_events)
      .when(Conditions {
        event_types: vec![EventType::Critical],
        sources: vec![EventSource::Infrastructure],
        ..Conditions::default()
      })
      .creating_incident()
  }

  #[test]
  fn nth_event_triggers_one_group_of_n() {
    let mut engine = CorrelationEngine::new();
    engine.add_definition(critical_infra(3)).unwrap();

    let mut e1 = db_event(Some("SRV-01"), at(0, 0));
    let mut e2 = db_event(Some("SRV-01"), at(0, 20));
    let mut e3 = db_event(Some("SRV-01"), at(0, 40));
    assert!(engine.correlate(&mut e1).is_none());
    assert!(engine.correlate(&mut e2).is_none());
    let result = engine.correlate(&mut e3).unwrap();

    assert_eq!(result.event_ids, vec![e1.id.clone(), e2.id.clone(), e3.id.clone()]);
    assert_eq!(result.definition, "db-storm");
    assert!(result.create_incident);
    assert!(result.correlation_id.starts_with("corr-"));
    assert_eq!(e3.correlation_id.as_deref(), Some(result.correlation_id.as_str()));
    assert_eq!(e3.status, EventStatus::Correlated);
    assert_eq!(engine.window_len(0, &WindowScope::Item("SRV-01".into())), 0);
  }

  #[test]
  fn expired_entries_do_not_count() {
    let mut engine = CorrelationEngine::new();
    engine.add_definition(critical_infra(3)).unwrap();

    let mut old = db_event(Some("SRV-01"), at(0, 0));
    let mut e2 = db_event(Some("SRV-01"), at(5, 30));
    let mut e3 = db_event(Some("SRV-01"), at(6, 0));
    assert!(engine.correlate(&mut old).is_none());
    assert!(engine.correlate(&mut e2).is_none());
    assert!(engine.correlate(&mut e3).is_none());
    assert_eq!(engine.window_len(0, &WindowScope::Item("SRV-01".into())), 2);
  }

  #[test]
  fn items_have_separate_windows() {
    let mut engine = CorrelationEngine::new();
    engine.add_definition(critical_infra(2)).unwrap();

    let mut a = db_event(Some("SRV-01"), at(0, 0));
    let mut b = db_event(Some("SRV-02"), at(0, 10));
    let mut c = db_event(None, at(0, 20));
    assert!(engine.correlate(&mut a).is_none());
    assert!(engine.correlate(&mut b).is_none());
    assert!(engine.correlate(&mut c).is_none());
    assert_eq!(engine.window_len(0, &WindowScope::Global), 1);

    let mut d = db_event(None, at(0, 30));
    let result = engine.correlate(&mut d).unwrap();
    assert_eq!(result.event_ids, vec![c.id.clone(), d.id.clone()]);
  }

  #[test]
  fn first_matching_definition_claims_the_event() {
    let mut engine = CorrelationEngine::new();
    engine.add_definition(critical_infra(5)).unwrap();
    engine
      .add_definition(CorrelationDefinition::new("anything", 300, 1))
      .unwrap();

    let mut e = db_event(Some("SRV-01"), at(0, 0));
    assert!(engine.correlate(&mut e).is_none());
    assert_eq!(engine.window_len(0, &WindowScope::Item("SRV-01".into())), 1);
    assert_eq!(engine.window_len(1, &WindowScope::Item("SRV-01".into())), 0);
    assert_eq!(engine.claiming(&e).map(|d| d.name.as_str()), Some("db-storm"));

    let info = normalize(&NewEvent::new("backup done", "cron"), at(0, 5)).unwrap();
    assert_eq!(engine.claiming(&info).map(|d| d.name.as_str()), Some("anything"));
  }

  #[test]
  fn unmatched_event_is_ignored() {
    let mut engine = CorrelationEngine::new();
    engine.add_definition(critical_infra(1)).unwrap();

    let mut info = normalize(&NewEvent::new("backup done", "cron"), at(0, 0)).unwrap();
    assert!(engine.correlate(&mut info).is_none());
    assert_eq!(info.correlation_id, None);
  }

  #[test]
  fn reprocessing_an_event_does_not_double_count() {
    let mut engine = CorrelationEngine::new();
    engine.add_definition(critical_infra(2)).unwrap();

    let mut e = db_event(Some("SRV-01"), at(0, 0));
    assert!(engine.correlate(&mut e).is_none());
    assert!(engine.correlate(&mut e).is_none());
    assert_eq!(engine.window_len(0, &WindowScope::Item("SRV-01".into())), 1);
  }

  #[test]
  fn purge_forgets_idle_windows() {
    let mut engine = CorrelationEngine::new();
    engine.add_definition(critical_infra(3)).unwrap();
    let mut e = db_event(Some("SRV-01"), at(0, 0));
    engine.correlate(&mut e);

    engine.purge_expired(at(4, 0));
    assert_eq!(engine.window_len(0, &WindowScope::Item("SRV-01".into())), 1);
    engine.purge_expired(at(10, 0));
    assert_eq!(engine.window_len(0, &WindowScope::Item("SRV-01".into())), 0);
  }

  #[test]
  fn invalid_definitions_are_rejected() {
    let mut engine = CorrelationEngine::new();
    assert!(engine.add_definition(CorrelationDefinition::new("zero", 60, 0)).is_err());
    assert!(engine.add_definition(CorrelationDefinition::new("instant", 0, 2)).is_err());
    assert!(engine.definitions().is_empty());
  }

  #[test]
  fn place_does_not_touch_windows() {
    let mut engine = CorrelationEngine::new();
    engine.add_definition(critical_infra(2)).unwrap();

    let mut e1 = db_event(Some("SRV-01"), at(0, 0));
    engine.correlate(&mut e1);
    let e2 = db_event(Some("SRV-01"), at(0, 10));

    let placement = engine.place(&e2).unwrap();
    let result = placement.result.clone().unwrap();
    assert_eq!(result.event_ids, vec![e1.id.clone(), e2.id.clone()]);
    assert_eq!(engine.window_len(0, &WindowScope::Item("SRV-01".into())), 1);

    // Placing again after a dropped placement sees the same window.
    let again = engine.place(&e2).unwrap();
    assert_eq!(again.result.unwrap().event_ids, result.event_ids);

    engine.commit(&placement);
    assert_eq!(engine.window_len(0, &WindowScope::Item("SRV-01".into())), 0);
  }

  #[test]
  fn aged_out_entries_are_reported_for_escalating_definitions() {
    let mut engine = CorrelationEngine::new();
    engine.add_definition(critical_infra(3)).unwrap();
    engine
      .add_definition(
        CorrelationDefinition::new("quiet", 60, 3).when(Conditions {
          event_types: vec![EventType::Alert],
          ..Conditions::default()
        }),
      )
      .unwrap();

    let mut lone = db_event(Some("SRV-01"), at(0, 0));
    engine.correlate(&mut lone);
    let mut alert = normalize(&NewEvent::new("latency", "apm").with_type("alert"), at(0, 0)).unwrap();
    engine.correlate(&mut alert);

    assert!(engine.expired(at(4, 0)).is_empty());
    assert_eq!(engine.expired(at(5, 1)), vec![lone.id.clone()]);

    let later = db_event(Some("SRV-01"), at(6, 0));
    let placement = engine.place(&later).unwrap();
    assert_eq!(placement.expired, vec![lone.id.clone()]);
    assert!(placement.result.is_none());
  }
}
