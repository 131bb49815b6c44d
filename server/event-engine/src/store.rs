//! In-memory event store keyed by id, iterated in insertion order.

use std::collections::HashMap;

use crate::types::{Event, EventId, EventStatus};

#[derive(Debug, Default)]
pub struct EventStore {
  events: HashMap<EventId, Event>,
  order: Vec<EventId>,
}

impl EventStore {
  pub fn len(&self) -> usize {
    self.events.len()
  }

  pub fn is_empty(&self) -> bool {
    self.events.is_empty()
  }

  pub fn contains(&self, id: &str) -> bool {
    self.events.contains_key(id)
  }

  pub fn get(&self, id: &str) -> Option<&Event> {
    self.events.get(id)
  }

  pub fn get_mut(&mut self, id: &str) -> Option<&mut Event> {
    self.events.get_mut(id)
  }

  /// Insert or replace an event. Replacing keeps the original position.
  pub fn insert(&mut self, event: Event) {
    if !self.events.contains_key(&event.id) {
      self.order.push(event.id.clone());
    }
    self.events.insert(event.id.clone(), event);
  }

  pub fn iter(&self) -> impl Iterator<Item = &Event> {
    self.order.iter().filter_map(|id| self.events.get(id))
  }

  pub fn by_status(&self, status: EventStatus) -> Vec<Event> {
    self.iter().filter(|e| e.status == status).cloned().collect()
  }

  pub fn by_correlation(&self, correlation_id: &str) -> Vec<Event> {
    self
      .iter()
      .filter(|e| e.correlation_id.as_deref() == Some(correlation_id))
      .cloned()
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::normalize::normalize;
  use crate::types::NewEvent;
  use chrono::Utc;

  #[test]
  fn replace_keeps_insertion_order() {
    let mut store = EventStore::default();
    let a = normalize(&NewEvent::new("a", "x"), Utc::now()).unwrap();
    let b = normalize(&NewEvent::new("b", "x"), Utc::now()).unwrap();
    store.insert(a.clone());
    store.insert(b.clone());

    let mut a2 = a.clone();
    a2.status = EventStatus::Correlated;
    a2.correlation_id = Some("c-1".into());
    store.insert(a2);

    assert_eq!(store.len(), 2);
    let titles: Vec<&str> = store.iter().map(|e| e.title.as_str()).collect();
    assert_eq!(titles, vec!["a", "b"]);
    assert_eq!(store.by_status(EventStatus::Correlated).len(), 1);
    assert_eq!(store.by_correlation("c-1")[0].id, a.id);
    assert!(store.by_correlation("c-2").is_empty());
  }
}
