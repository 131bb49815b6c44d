//! Stable fingerprint used to index events for duplicate detection.

use crate::types::Event;

/// A stable hex string identifying events that report the same condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub String);

/// Compute the duplicate fingerprint of an event.
///
/// Key components: title + configuration item (absent item hashes as its own
/// bucket, distinct from an empty string). Uses blake3 for a fast,
/// deterministic hash.
pub fn compute(event: &Event) -> Fingerprint {
  let mut hasher = blake3::Hasher::new();
  hasher.update(event.title.as_bytes());
  hasher.update(b"|");
  match &event.configuration_item {
    Some(ci) => {
      hasher.update(b"ci:");
      hasher.update(ci.as_bytes());
    }
    None => {
      hasher.update(b"-");
    }
  }

  let hex = hasher.finalize().to_hex();
  Fingerprint(hex[..32].to_string())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::normalize::normalize;
  use crate::types::NewEvent;
  use chrono::Utc;

  fn make_event(title: &str, ci: Option<&str>, kind: &str) -> Event {
    let mut raw = NewEvent::new(title, "nagios").with_type(kind);
    if let Some(ci) = ci {
      raw = raw.with_item(ci);
    }
    normalize(&raw, Utc::now()).unwrap()
  }

  #[test]
  fn same_title_and_item_same_fingerprint() {
    let e1 = make_event("DB timeout", Some("SRV-01"), "critical");
    let e2 = make_event("DB timeout", Some("SRV-01"), "warning");
    assert_eq!(compute(&e1), compute(&e2));
  }

  #[test]
  fn different_item_different_fingerprint() {
    let e1 = make_event("DB timeout", Some("SRV-01"), "critical");
    let e2 = make_event("DB timeout", Some("SRV-02"), "critical");
    assert_ne!(compute(&e1), compute(&e2));
  }

  #[test]
  fn missing_item_is_its_own_bucket() {
    let e1 = make_event("DB timeout", None, "critical");
    let e2 = make_event("DB timeout", Some("-"), "critical");
    assert_ne!(compute(&e1), compute(&e2));
  }

  #[test]
  fn fingerprint_is_32_hex_chars() {
    let fp = compute(&make_event("DB timeout", None, "alert"));
    assert_eq!(fp.0.len(), 32);
    assert!(fp.0.chars().all(|c| c.is_ascii_hexdigit()));
  }
}
