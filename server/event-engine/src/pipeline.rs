//! Per-event processing step: duplicate check, rules, correlation, escalation.
//!
//! A step first works on its own copy of the event and reads shared state,
//! then calls the incident collaborator, and only then commits: window
//! changes, rule counters, parent links, group marks and the stored event.
//! A step that fails before the commit leaves nothing behind, so the worker
//! can run it again from the original event.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::correlation::{CorrelationDefinition, CorrelationEngine, CorrelationResult};
use crate::dedup::{self, DuplicateDetector};
use crate::error::EngineError;
use crate::incident::{IncidentRequest, IncidentSink};
use crate::rules::{self, ActionRecord, Rule, RuleAction, RuleEngine};
use crate::stats::Statistics;
use crate::store::EventStore;
use crate::types::{Event, EventId, EventStatus};

/// State read by callers and written only by the processing step.
#[derive(Debug, Default)]
pub struct Shared {
  pub store: RwLock<EventStore>,
  pub stats: RwLock<Statistics>,
}

/// Everything that happened to one event during processing.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
  pub event: Event,
  pub duplicate_of: Option<EventId>,
  pub actions: Vec<ActionRecord>,
  pub correlation: Option<CorrelationResult>,
  pub incident_id: Option<String>,
}

pub struct Pipeline {
  reporter: String,
  rules: RuleEngine,
  correlation: CorrelationEngine,
  dedup: DuplicateDetector,
  sink: Arc<dyn IncidentSink>,
}

impl Pipeline {
  pub fn new(config: &Config, sink: Arc<dyn IncidentSink>) -> Self {
    Self {
      reporter: config.reporter.clone(),
      rules: RuleEngine::new(),
      correlation: CorrelationEngine::new(),
      dedup: DuplicateDetector::new(config.duplicate_window_secs),
      sink,
    }
  }

  pub fn add_rule(&mut self, rule: Rule) {
    self.rules.add_rule(rule);
  }

  pub fn remove_rule(&mut self, id: &str) -> bool {
    self.rules.remove_rule(id)
  }

  pub fn set_rule_enabled(&mut self, id: &str, enabled: bool) -> bool {
    self.rules.set_enabled(id, enabled)
  }

  pub fn rules(&self) -> &[Rule] {
    self.rules.rules()
  }

  pub fn add_correlation(&mut self, definition: CorrelationDefinition) -> Result<(), EngineError> {
    self.correlation.add_definition(definition)
  }

  pub fn correlations(&self) -> &[CorrelationDefinition] {
    self.correlation.definitions()
  }

  /// Process one dequeued event and store it.
  ///
  /// On `Err` (or a panic) nothing has been committed; running the step
  /// again for the same event gives the same result.
  pub fn process(&mut self, mut event: Event, shared: &Shared) -> Result<ProcessOutcome, EngineError> {
    let now = Utc::now();

    // 1. Duplicate check.
    let duplicate_of = self.dedup.check(&mut event, &shared.store.read())?;

    // 2. Rules.
    let pass = self.rules.apply_to(&mut event);
    let mut newly_correlated = pass
      .records
      .iter()
      .filter(|r| r.applied() && matches!(r.action, RuleAction::MarkCorrelated(_)))
      .count();

    // 3. Correlation. Suppressed events are noise and events already grouped
    // by a rule keep their group.
    let eligible = event.status != EventStatus::Suppressed && event.correlation_id.is_none();
    let placement = if eligible { self.correlation.place(&event) } else { None };
    let claimed_for_incident = eligible
      && self
        .correlation
        .claiming(&event)
        .is_some_and(|d| d.create_incident);
    if let Some(placement) = &placement {
      self.escalate_expired(&placement.expired, shared);
    }
    let correlation = placement.as_ref().and_then(|p| p.result.clone());

    let mut incident_id = None;
    if let Some(result) = &correlation {
      if event.join_correlation(&result.correlation_id) {
        newly_correlated += 1;
      }
      if result.create_incident {
        let members = self.members(result, &event, shared);
        let request = IncidentRequest::for_group(result, &members, &self.reporter);
        incident_id = self.escalate(&request);
      }
    }

    // 4. Single-event escalation. Events waiting in an escalating window are
    // left to their group or to expiry; duplicates defer to their parent.
    let fallback = correlation.is_none() && !claimed_for_incident && event.event_type.escalates();
    if incident_id.is_none()
      && event.incident_id.is_none()
      && event.status != EventStatus::Suppressed
      && !event.is_duplicate()
      && (fallback || rules::incident_requested(&pass.records))
    {
      let request = IncidentRequest::for_event(&event, &self.reporter);
      incident_id = self.escalate(&request);
    }
    if let Some(id) = &incident_id {
      event.record_incident(id);
    }

    // 5. Commit.
    if let Some(placement) = &placement {
      self.correlation.commit(placement);
    }
    self.rules.mark_triggered(&pass.matched, now);
    event.updated_at = now;
    {
      let mut store = shared.store.write();
      dedup::link_to_parent(&event, &mut store);
      if let Some(result) = &correlation {
        newly_correlated += mark_members(result, &event, incident_id.as_deref(), &mut store, now);
      }
      store.insert(event.clone());
    }
    self.dedup.remember(&event);
    {
      let mut stats = shared.stats.write();
      stats.record_processed(&event);
      stats.record_correlated(newly_correlated);
      if incident_id.is_some() {
        stats.record_incident();
      }
    }

    debug!(
      event_id = %event.id,
      status = ?event.status,
      actions = pass.records.len(),
      correlated = correlation.is_some(),
      incident = ?incident_id,
      "event processed"
    );

    Ok(ProcessOutcome {
      event,
      duplicate_of,
      actions: pass.records,
      correlation,
      incident_id,
    })
  }

  /// Escalate events that aged out of their windows, then drop expired
  /// window and duplicate-index entries. Returns the number of incidents
  /// created.
  pub fn sweep(&mut self, now: DateTime<Utc>, shared: &Shared) -> usize {
    let expired = self.correlation.expired(now);
    let created = self.escalate_expired(&expired, shared);
    self.correlation.purge_expired(now);
    self.dedup.purge_expired(now);
    created
  }

  /// Single-event escalation for critical events that waited in an
  /// escalating window that never filled. Each incident is recorded as soon
  /// as it is created, so a repeated call skips events already handled.
  fn escalate_expired(&self, ids: &[EventId], shared: &Shared) -> usize {
    let mut created = 0;
    for id in ids {
      let Some(candidate) = shared.store.read().get(id).cloned() else {
        continue;
      };
      if !escalates_alone(&candidate) {
        continue;
      }
      let request = IncidentRequest::for_event(&candidate, &self.reporter);
      let Some(incident_id) = self.escalate(&request) else {
        continue;
      };
      if let Some(stored) = shared.store.write().get_mut(id) {
        stored.record_incident(&incident_id);
        stored.updated_at = Utc::now();
      }
      shared.stats.write().record_incident();
      created += 1;
    }
    created
  }

  /// Snapshots of the group's members, the current event included.
  fn members(&self, result: &CorrelationResult, event: &Event, shared: &Shared) -> Vec<Event> {
    let store = shared.store.read();
    let mut members = Vec::with_capacity(result.event_ids.len());
    for id in &result.event_ids {
      if *id == event.id {
        members.push(event.clone());
        continue;
      }
      match store.get(id) {
        Some(member) => members.push(member.clone()),
        None => warn!(
          correlation_id = %result.correlation_id,
          member = %id,
          "correlated event not found in store"
        ),
      }
    }
    members
  }

  /// Hand a request to the incident collaborator; failures leave the events
  /// without an incident so an external retry can resubmit them.
  fn escalate(&self, request: &IncidentRequest) -> Option<String> {
    match self.sink.create_incident(request) {
      Ok(id) => {
        info!(incident_id = %id, events = ?request.source_event_ids, "incident created");
        Some(id)
      }
      Err(e) => {
        warn!(error = %e, events = ?request.source_event_ids, "incident creation failed");
        None
      }
    }
  }
}

/// Attach the stored members to the new group and its incident. Returns how
/// many joined the group now.
fn mark_members(
  result: &CorrelationResult,
  event: &Event,
  incident_id: Option<&str>,
  store: &mut EventStore,
  now: DateTime<Utc>,
) -> usize {
  let mut marked = 0;
  for id in result.event_ids.iter().filter(|id| **id != event.id) {
    let Some(member) = store.get_mut(id) else {
      continue;
    };
    if member.join_correlation(&result.correlation_id) {
      marked += 1;
    }
    if let Some(incident_id) = incident_id {
      member.record_incident(incident_id);
    }
    member.updated_at = now;
  }
  marked
}

/// Critical or exception events that nothing else has escalated.
fn escalates_alone(event: &Event) -> bool {
  event.event_type.escalates()
    && event.status.is_open()
    && event.status != EventStatus::Suppressed
    && !event.is_duplicate()
    && event.correlation_id.is_none()
    && event.incident_id.is_none()
}
