use std::collections::BTreeMap;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::structure::{cache_change::CacheChange, guid::GUID, sequence_number::SequenceNumber};

/// Change store of one endpoint, ordered by (writer GUID, sequence number).
///
/// The key doubles as the uniqueness guarantee: a history can never hold two
/// changes with the same writer and sequence number. Capacity is bounded;
/// insertion into a full history fails and the caller drops the sample.
#[derive(Debug)]
pub struct History {
  changes: BTreeMap<(GUID, SequenceNumber), CacheChange>,
  max_changes: usize,
}

impl History {
  pub fn with_capacity(max_changes: usize) -> Self {
    Self {
      changes: BTreeMap::new(),
      max_changes,
    }
  }

  pub fn len(&self) -> usize {
    self.changes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.changes.is_empty()
  }

  /// Insert a change. `false` when the history is full or already holds a
  /// change with the same (writer, sequence number) identity.
  pub fn add_change(&mut self, change: CacheChange) -> bool {
    let key = (change.writer_guid, change.sequence_number);
    if self.changes.contains_key(&key) {
      return false;
    }
    if self.changes.len() >= self.max_changes {
      warn!(
        "history full ({} changes), dropping {:?} from {:?}",
        self.max_changes, change.sequence_number, change.writer_guid
      );
      return false;
    }
    self.changes.insert(key, change);
    true
  }

  pub fn get(&self, writer_guid: GUID, sn: SequenceNumber) -> Option<&CacheChange> {
    self.changes.get(&(writer_guid, sn))
  }

  pub fn get_mut(&mut self, writer_guid: GUID, sn: SequenceNumber) -> Option<&mut CacheChange> {
    self.changes.get_mut(&(writer_guid, sn))
  }

  pub fn remove_change(&mut self, writer_guid: GUID, sn: SequenceNumber) -> Option<CacheChange> {
    self.changes.remove(&(writer_guid, sn))
  }

  /// Remove every change written by `writer_guid`, returning them so the
  /// caller can release payloads.
  pub fn remove_changes_with_guid(&mut self, writer_guid: GUID) -> Vec<CacheChange> {
    let keys: Vec<_> = self
      .changes
      .range((writer_guid, SequenceNumber::zero())..=(writer_guid, SequenceNumber::new(i64::MAX)))
      .map(|(k, _)| *k)
      .collect();
    keys
      .iter()
      .filter_map(|k| self.changes.remove(k))
      .collect()
  }

  /// The minimum (oldest by key order) change in the history.
  pub fn min_change(&self) -> Option<&CacheChange> {
    self.changes.values().next()
  }

  pub fn changes(&self) -> impl Iterator<Item = &CacheChange> {
    self.changes.values()
  }

  pub fn changes_mut(&mut self) -> impl Iterator<Item = &mut CacheChange> {
    self.changes.values_mut()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::structure::{
    cache_change::ChangeKind,
    guid::{EntityId, GuidPrefix},
  };

  fn writer(n: u8) -> GUID {
    GUID::new(
      GuidPrefix::new([n; 12]),
      EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER,
    )
  }

  fn change(w: GUID, sn: i64) -> CacheChange {
    CacheChange::new(w, SequenceNumber::new(sn), ChangeKind::Alive)
  }

  #[test]
  fn duplicate_identity_is_rejected() {
    let mut history = History::with_capacity(8);
    assert!(history.add_change(change(writer(1), 1)));
    assert!(!history.add_change(change(writer(1), 1)));
    assert!(history.add_change(change(writer(2), 1)));
    assert_eq!(history.len(), 2);
  }

  #[test]
  fn capacity_is_enforced() {
    let mut history = History::with_capacity(2);
    assert!(history.add_change(change(writer(1), 1)));
    assert!(history.add_change(change(writer(1), 2)));
    assert!(!history.add_change(change(writer(1), 3)));
  }

  #[test]
  fn remove_changes_with_guid_removes_only_that_writer() {
    let mut history = History::with_capacity(8);
    history.add_change(change(writer(1), 1));
    history.add_change(change(writer(1), 2));
    history.add_change(change(writer(2), 7));

    let removed = history.remove_changes_with_guid(writer(1));
    assert_eq!(removed.len(), 2);
    assert_eq!(history.len(), 1);
    assert!(history.get(writer(2), SequenceNumber::new(7)).is_some());
  }

  #[test]
  fn min_change_is_lowest_sequence_for_single_writer() {
    let mut history = History::with_capacity(8);
    history.add_change(change(writer(1), 5));
    history.add_change(change(writer(1), 2));
    assert_eq!(
      history.min_change().unwrap().sequence_number,
      SequenceNumber::new(2)
    );
  }
}
