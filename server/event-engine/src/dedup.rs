//! Short-lookback duplicate detection.
//!
//! Events are indexed by the fingerprint of (title, configuration item). A new
//! event is a duplicate when an open event with the same fingerprint was
//! created within the lookback window; the earliest such event becomes its
//! parent. Duplicates are still evaluated by rules and correlation.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::debug;

use crate::error::EngineError;
use crate::fingerprint::{self, Fingerprint};
use crate::store::EventStore;
use crate::types::{Event, EventId, DUPLICATE_TAG};

#[derive(Debug)]
pub struct DuplicateDetector {
  lookback: Duration,
  index: HashMap<Fingerprint, Vec<(EventId, DateTime<Utc>)>>,
}

impl DuplicateDetector {
  pub fn new(lookback_secs: u64) -> Self {
    Self {
      lookback: Duration::seconds(lookback_secs as i64),
      index: HashMap::new(),
    }
  }

  /// Mark `event` as a duplicate of an open stored event. Returns the parent
  /// id when one was found; the parent side of the link is written later by
  /// `link_to_parent`, once the event is committed.
  pub fn check(&mut self, event: &mut Event, store: &EventStore) -> Result<Option<EventId>, EngineError> {
    let fp = fingerprint::compute(event);
    let cutoff = event.created_at - self.lookback;

    let Some(candidates) = self.index.get_mut(&fp) else {
      return Ok(None);
    };
    candidates.retain(|(_, created)| *created >= cutoff);

    let mut parent_id = None;
    for (id, _) in candidates.iter() {
      if *id == event.id {
        continue;
      }
      let candidate = store
        .get(id)
        .ok_or_else(|| EngineError::Inconsistent(format!("indexed event {} missing from store", id)))?;
      if candidate.status.is_open() {
        parent_id = Some(id.clone());
        break;
      }
    }
    if candidates.is_empty() {
      self.index.remove(&fp);
    }

    let Some(parent_id) = parent_id else {
      return Ok(None);
    };
    event.tags.insert(DUPLICATE_TAG.to_string());
    event.parent_event_id = Some(parent_id.clone());
    debug!(event_id = %event.id, parent = %parent_id, "duplicate event");
    Ok(Some(parent_id))
  }

  /// Index a stored event so later repeats can find it.
  pub fn remember(&mut self, event: &Event) {
    let entry = self.index.entry(fingerprint::compute(event)).or_default();
    if !entry.iter().any(|(id, _)| *id == event.id) {
      entry.push((event.id.clone(), event.created_at));
    }
  }

  /// Forget index entries older than the lookback, dropping fingerprints
  /// that have no entries left.
  pub fn purge_expired(&mut self, now: DateTime<Utc>) {
    let cutoff = now - self.lookback;
    self.index.retain(|_, entries| {
      entries.retain(|(_, created)| *created >= cutoff);
      !entries.is_empty()
    });
  }

  /// Number of fingerprints currently indexed.
  pub fn indexed(&self) -> usize {
    self.index.len()
  }
}

/// Append `event` to its parent's related events, once.
pub fn link_to_parent(event: &Event, store: &mut EventStore) {
  let Some(parent_id) = &event.parent_event_id else {
    return;
  };
  if let Some(parent) = store.get_mut(parent_id) {
    if !parent.related_events.contains(&event.id) {
      parent.related_events.push(event.id.clone());
    }
  }
}
