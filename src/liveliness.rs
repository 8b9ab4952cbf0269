use std::{
  collections::{BTreeMap, BTreeSet},
  sync::{Arc, Mutex},
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  discovery::participant_data::ParticipantProxyData,
  structure::{duration::Duration, guid::{GuidPrefix, GUID}, qos::LivelinessKind, time::Timestamp},
};

#[derive(Debug)]
struct WriterLiveliness {
  kind: LivelinessKind,
  lease_duration: Duration,
  last_assertion: Timestamp,
  alive: bool,
}

/// Per-writer liveliness bookkeeping of the subscribing side, driven by the
/// readers: writers are registered on match, removed on unmatch, and
/// asserted on every accepted sample.
///
/// Readers call in with their own lock released; the manager lock is always
/// the innermost one.
#[derive(Debug, Default)]
pub struct LivelinessManager {
  writers: BTreeMap<GUID, WriterLiveliness>,
}

impl LivelinessManager {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_writer(&mut self, guid: GUID, kind: LivelinessKind, lease_duration: Duration) {
    self.writers.entry(guid).or_insert(WriterLiveliness {
      kind,
      lease_duration,
      last_assertion: Timestamp::now(),
      alive: true,
    });
  }

  pub fn remove_writer(&mut self, guid: GUID, _kind: LivelinessKind, _lease: Duration) -> bool {
    self.writers.remove(&guid).is_some()
  }

  pub fn assert_liveliness(&mut self, guid: GUID, kind: LivelinessKind, lease_duration: Duration) {
    match self.writers.get_mut(&guid) {
      Some(writer) => {
        writer.kind = kind;
        writer.lease_duration = lease_duration;
        writer.last_assertion = Timestamp::now();
        writer.alive = true;
      }
      None => trace!("liveliness asserted for unregistered writer {:?}", guid),
    }
  }

  pub fn contains_writer(&self, guid: GUID) -> bool {
    self.writers.contains_key(&guid)
  }

  pub fn is_alive(&self, guid: GUID) -> bool {
    self.writers.get(&guid).map_or(false, |w| w.alive)
  }

  /// Mark writers whose lease ran out as not alive and return them.
  pub fn check_expirations(&mut self, now: Timestamp) -> Vec<GUID> {
    let mut expired = Vec::new();
    for (guid, writer) in self.writers.iter_mut() {
      if !writer.alive || writer.lease_duration.is_infinite() {
        continue;
      }
      if now.duration_since(writer.last_assertion) > writer.lease_duration {
        writer.alive = false;
        expired.push(*guid);
      }
    }
    expired
  }
}

/// Writer Liveliness Protocol endpoint bundle as seen by the discovery
/// engine: the engine notifies it of admitted participants, readers feed its
/// sub-liveliness manager.
#[derive(Debug, Default)]
pub struct Wlp {
  pub sub_liveliness_manager: Arc<Mutex<LivelinessManager>>,
  assigned_participants: Mutex<BTreeSet<GuidPrefix>>,
}

impl Wlp {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn assign_remote_endpoints(&self, proxy: &ParticipantProxyData) {
    let mut assigned = self
      .assigned_participants
      .lock()
      .unwrap_or_else(|p| p.into_inner());
    if assigned.insert(proxy.guid.prefix) {
      debug!("WLP endpoints assigned for {:?}", proxy.guid.prefix);
    }
  }

  pub fn remove_remote_endpoints(&self, proxy: &ParticipantProxyData) {
    self
      .assigned_participants
      .lock()
      .unwrap_or_else(|p| p.into_inner())
      .remove(&proxy.guid.prefix);
  }

  pub fn is_assigned(&self, prefix: GuidPrefix) -> bool {
    self
      .assigned_participants
      .lock()
      .unwrap_or_else(|p| p.into_inner())
      .contains(&prefix)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::structure::guid::{EntityId, GuidPrefix};

  fn guid(n: u8) -> GUID {
    GUID::new(GuidPrefix::new([n; 12]), EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER)
  }

  #[test]
  fn add_assert_remove_cycle() {
    let mut manager = LivelinessManager::new();
    let w = guid(1);
    manager.add_writer(w, LivelinessKind::Automatic, Duration::from_secs(1));
    assert!(manager.contains_writer(w));
    assert!(manager.is_alive(w));

    manager.assert_liveliness(w, LivelinessKind::Automatic, Duration::from_secs(1));
    assert!(manager.is_alive(w));

    assert!(manager.remove_writer(w, LivelinessKind::Automatic, Duration::from_secs(1)));
    assert!(!manager.contains_writer(w));
  }

  #[test]
  fn expiration_marks_not_alive() {
    let mut manager = LivelinessManager::new();
    let w = guid(1);
    manager.add_writer(w, LivelinessKind::Automatic, Duration::from_secs(1));

    let later = Timestamp::now() + Duration::from_secs(5);
    let expired = manager.check_expirations(later);
    assert_eq!(expired, vec![w]);
    assert!(!manager.is_alive(w));

    // an infinite lease never expires
    let w2 = guid(2);
    manager.add_writer(w2, LivelinessKind::Automatic, Duration::INFINITE);
    assert!(manager.check_expirations(later + Duration::from_secs(1000)).is_empty());
  }
}
