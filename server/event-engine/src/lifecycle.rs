//! Human-driven lifecycle transitions.
//!
//! `new → acknowledged → in_progress → resolved → closed`. Correlated events
//! are still open and follow the same path as `new` ones; suppressed events
//! are terminal. Each transition returns `false` and leaves the event
//! untouched when its current status does not permit the move.

use chrono::{DateTime, Utc};

use crate::types::{Event, EventStatus};

pub fn acknowledge(event: &mut Event, actor: &str, now: DateTime<Utc>) -> bool {
  if !matches!(event.status, EventStatus::New | EventStatus::Correlated) {
    return false;
  }
  event.status = EventStatus::Acknowledged;
  event.acknowledged_at = Some(now);
  event.acknowledged_by = Some(actor.to_string());
  event.updated_at = now;
  true
}

pub fn start_work(event: &mut Event, actor: &str, now: DateTime<Utc>) -> bool {
  if event.status != EventStatus::Acknowledged {
    return false;
  }
  event.status = EventStatus::InProgress;
  if event.assigned_to.is_none() {
    event.assigned_to = Some(actor.to_string());
  }
  event.updated_at = now;
  true
}

pub fn resolve(event: &mut Event, actor: &str, notes: Option<&str>, now: DateTime<Utc>) -> bool {
  if !matches!(
    event.status,
    EventStatus::New | EventStatus::Acknowledged | EventStatus::InProgress | EventStatus::Correlated
  ) {
    return false;
  }
  event.status = EventStatus::Resolved;
  event.resolved_at = Some(now);
  event.resolved_by = Some(actor.to_string());
  if let Some(notes) = notes {
    event.resolution_notes = Some(notes.to_string());
  }
  event.updated_at = now;
  true
}

pub fn close(event: &mut Event, actor: &str, notes: Option<&str>, now: DateTime<Utc>) -> bool {
  if event.status != EventStatus::Resolved {
    return false;
  }
  event.status = EventStatus::Closed;
  event.closed_at = Some(now);
  event.closed_by = Some(actor.to_string());
  if let Some(notes) = notes {
    match &mut event.resolution_notes {
      Some(existing) => {
        existing.push('\n');
        existing.push_str(notes);
      }
      None => event.resolution_notes = Some(notes.to_string()),
    }
  }
  event.updated_at = now;
  true
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::normalize::normalize;
  use crate::types::NewEvent;

  fn fresh() -> Event {
    normalize(&NewEvent::new("disk full", "zabbix"), Utc::now()).unwrap()
  }

  #[test]
  fn happy_path() {
    let mut e = fresh();
    let now = Utc::now();
    assert!(acknowledge(&mut e, "alice", now));
    assert!(start_work(&mut e, "alice", now));
    assert!(resolve(&mut e, "alice", Some("freed space"), now));
    assert!(close(&mut e, "bob", Some("verified"), now));
    assert_eq!(e.status, EventStatus::Closed);
    assert_eq!(e.acknowledged_by.as_deref(), Some("alice"));
    assert_eq!(e.assigned_to.as_deref(), Some("alice"));
    assert_eq!(e.closed_by.as_deref(), Some("bob"));
    assert_eq!(e.resolution_notes.as_deref(), Some("freed space\nverified"));
  }

  #[test]
  fn acknowledge_twice_fails_second_time() {
    let mut e = fresh();
    assert!(acknowledge(&mut e, "alice", Utc::now()));
    assert!(!acknowledge(&mut e, "bob", Utc::now()));
    assert_eq!(e.acknowledged_by.as_deref(), Some("alice"));
  }

  #[test]
  fn close_requires_resolved() {
    let mut e = fresh();
    assert!(!close(&mut e, "alice", None, Utc::now()));
    assert!(acknowledge(&mut e, "alice", Utc::now()));
    assert!(!close(&mut e, "alice", None, Utc::now()));
    assert_eq!(e.status, EventStatus::Acknowledged);
  }

  #[test]
  fn correlated_events_can_be_worked() {
    let mut e = fresh();
    e.join_correlation("corr-1");
    assert!(acknowledge(&mut e, "alice", Utc::now()));

    let mut other = fresh();
    other.join_correlation("corr-1");
    assert!(resolve(&mut other, "alice", None, Utc::now()));
  }

  #[test]
  fn suppressed_is_terminal() {
    let mut e = fresh();
    e.status = EventStatus::Suppressed;
    assert!(!acknowledge(&mut e, "alice", Utc::now()));
    assert!(!resolve(&mut e, "alice", None, Utc::now()));
    assert!(!close(&mut e, "alice", None, Utc::now()));
  }
}
