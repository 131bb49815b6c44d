//! Ordered, declarative rule evaluation.
//!
//! A rule matches when every condition category it names is satisfied; empty
//! categories mean "don't care". Matching rules apply their actions in list
//! order, and rules are evaluated in ascending `priority` so the action log
//! reflects that order. A failing action is logged in place and evaluation
//! carries on with the next action and the next rule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::error::ActionError;
use crate::types::{Event, EventSource, EventStatus, EventType, Priority};

/// Declarative match predicate shared by rules and correlation definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Conditions {
  pub event_types: Vec<EventType>,
  pub sources: Vec<EventSource>,
  pub configuration_items: Vec<String>,
  pub attributes: BTreeMap<String, String>,
  pub tags: BTreeSet<String>,
}

impl Conditions {
  pub fn matches(&self, event: &Event) -> bool {
    let type_ok = self.event_types.is_empty() || self.event_types.contains(&event.event_type);
    let source_ok = self.sources.is_empty() || self.sources.contains(&event.source);
    let item_ok = self.configuration_items.is_empty()
      || event
        .configuration_item
        .as_ref()
        .is_some_and(|ci| self.configuration_items.contains(ci));
    let attrs_ok = self
      .attributes
      .iter()
      .all(|(key, want)| event.attributes.get(key) == Some(want));
    let tags_ok = self.tags.is_subset(&event.tags);

    type_ok && source_ok && item_ok && attrs_ok && tags_ok
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
  SetPriority(Priority),
  Assign(String),
  AddTag(String),
  /// Join a named correlation group without going through the correlation engine.
  MarkCorrelated(String),
  RequestIncident,
  Suppress,
  Escalate,
}

fn default_rule_priority() -> i32 {
  100
}

fn default_enabled() -> bool {
  true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
  pub id: String,
  pub name: String,
  /// Lower values are evaluated first.
  #[serde(default = "default_rule_priority")]
  pub priority: i32,
  #[serde(default = "default_enabled")]
  pub enabled: bool,
  #[serde(default)]
  pub conditions: Conditions,
  #[serde(default)]
  pub actions: Vec<RuleAction>,
  #[serde(skip)]
  pub last_triggered: Option<DateTime<Utc>>,
  #[serde(skip)]
  pub trigger_count: u64,
}

impl Rule {
  pub fn new(id: impl Into<String>, name: impl Into<String>, priority: i32) -> Self {
    Self {
      id: id.into(),
      name: name.into(),
      priority,
      enabled: true,
      conditions: Conditions::default(),
      actions: Vec::new(),
      last_triggered: None,
      trigger_count: 0,
    }
  }

  pub fn when(mut self, conditions: Conditions) -> Self {
    self.conditions = conditions;
    self
  }

  pub fn then(mut self, action: RuleAction) -> Self {
    self.actions.push(action);
    self
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
  Applied,
  Failed(String),
}

/// One entry of the audit log produced by a rule pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRecord {
  pub rule_id: String,
  pub action: RuleAction,
  pub outcome: ActionOutcome,
}

impl ActionRecord {
  pub fn applied(&self) -> bool {
    self.outcome == ActionOutcome::Applied
  }
}

/// True if any rule successfully asked for an incident.
pub fn incident_requested(records: &[ActionRecord]) -> bool {
  records
    .iter()
    .any(|r| r.applied() && r.action == RuleAction::RequestIncident)
}

/// Result of one rule pass: the action log and the ids of matching rules.
#[derive(Debug, Clone, Default)]
pub struct RulePass {
  pub records: Vec<ActionRecord>,
  pub matched: Vec<String>,
}

/// Central dispatcher for rule actions.
fn apply(action: &RuleAction, event: &mut Event) -> Result<(), ActionError> {
  match action {
    RuleAction::SetPriority(priority) => {
      if !event.status.allows_mutation() {
        return Err(ActionError::Locked(event.status));
      }
      event.priority = *priority;
    }
    RuleAction::Assign(assignee) => {
      if assignee.trim().is_empty() {
        return Err(ActionError::EmptyAssignee);
      }
      event.assigned_to = Some(assignee.clone());
    }
    RuleAction::AddTag(tag) => {
      if !event.status.allows_mutation() {
        return Err(ActionError::Locked(event.status));
      }
      event.tags.insert(tag.clone());
    }
    RuleAction::MarkCorrelated(group) => {
      if let Some(existing) = &event.correlation_id {
        return Err(ActionError::AlreadyCorrelated(existing.clone()));
      }
      event.join_correlation(group);
    }
    RuleAction::RequestIncident => {
      if let Some(existing) = &event.incident_id {
        return Err(ActionError::AlreadyEscalated(existing.clone()));
      }
    }
    RuleAction::Suppress => {
      if event.status != EventStatus::New {
        return Err(ActionError::Locked(event.status));
      }
      event.status = EventStatus::Suppressed;
    }
    RuleAction::Escalate => {
      event.escalation_level += 1;
    }
  }
  Ok(())
}

/// Holds the rule list in evaluation order.
#[derive(Debug, Default)]
pub struct RuleEngine {
  rules: Vec<Rule>,
}

impl RuleEngine {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert after every rule with the same or lower priority, so rules of
  /// equal priority keep insertion order.
  pub fn add_rule(&mut self, rule: Rule) {
    let at = self.rules.partition_point(|r| r.priority <= rule.priority);
    self.rules.insert(at, rule);
  }

  pub fn remove_rule(&mut self, id: &str) -> bool {
    let before = self.rules.len();
    self.rules.retain(|r| r.id != id);
    self.rules.len() != before
  }

  pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
    match self.rules.iter_mut().find(|r| r.id == id) {
      Some(rule) => {
        rule.enabled = enabled;
        true
      }
      None => false,
    }
  }

  pub fn rules(&self) -> &[Rule] {
    &self.rules
  }

  /// Run every enabled rule against the event and return the action log.
  pub fn evaluate(&mut self, event: &mut Event, now: DateTime<Utc>) -> Vec<ActionRecord> {
    let pass = self.apply_to(event);
    self.mark_triggered(&pass.matched, now);
    pass.records
  }

  /// Apply matching rules to the event without touching trigger counters.
  pub fn apply_to(&self, event: &mut Event) -> RulePass {
    let mut pass = RulePass::default();

    for rule in self.rules.iter().filter(|r| r.enabled) {
      if !rule.conditions.matches(event) {
        continue;
      }
      pass.matched.push(rule.id.clone());
      debug!(event_id = %event.id, rule = %rule.id, "rule matched");

      for action in &rule.actions {
        let outcome = match apply(action, event) {
          Ok(()) => ActionOutcome::Applied,
          Err(e) => {
            warn!(event_id = %event.id, rule = %rule.id, action = ?action, error = %e, "rule action failed");
            ActionOutcome::Failed(e.to_string())
          }
        };
        pass.records.push(ActionRecord {
          rule_id: rule.id.clone(),
          action: action.clone(),
          outcome,
        });
      }
    }

    pass
  }

  pub fn mark_triggered(&mut self, rule_ids: &[String], now: DateTime<Utc>) {
    for rule in self.rules.iter_mut().filter(|r| rule_ids.contains(&r.id)) {
      rule.trigger_count += 1;
      rule.last_triggered = Some(now);
    }
  }
}
