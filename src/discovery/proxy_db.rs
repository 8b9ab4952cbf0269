use std::collections::BTreeMap;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  discovery::participant_data::ParticipantProxyData,
  structure::{guid::GuidPrefix, time::Timestamp},
};

#[derive(Debug)]
struct ProxyEntry {
  data: ParticipantProxyData,
  is_server: bool,
  /// Armed only for servers: clients assert their servers' liveliness,
  /// other clients' liveliness flows transitively through server data.
  lease_deadline: Option<Timestamp>,
}

/// Store of every discovered remote participant, keyed by GUID prefix.
///
/// Guarded by the engine lock; the engine refreshes the `RemoteServer`
/// proxy handles under the same lock whenever entries come and go.
#[derive(Debug, Default)]
pub struct ProxyDb {
  participants: BTreeMap<GuidPrefix, ProxyEntry>,
}

impl ProxyDb {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.participants.len()
  }

  pub fn is_empty(&self) -> bool {
    self.participants.is_empty()
  }

  /// Insert a newly discovered participant. `None` when an entry for the
  /// GUID already exists (use `update` for those).
  pub fn admit(&mut self, data: ParticipantProxyData, is_server: bool) -> Option<GuidPrefix> {
    let prefix = data.guid.prefix;
    if self.participants.contains_key(&prefix) {
      debug!("participant {:?} already admitted", prefix);
      return None;
    }
    let lease_deadline =
      is_server.then(|| Timestamp::now() + data.lease_duration);
    self.participants.insert(
      prefix,
      ProxyEntry {
        data,
        is_server,
        lease_deadline,
      },
    );
    info!("admitted participant {:?} (server: {})", prefix, is_server);
    Some(prefix)
  }

  /// A fresher `DATA(p)` for a known participant: overwrite the announced
  /// fields, mark alive, and restart the lease if the entry is a server.
  pub fn update(&mut self, mut fresh: ParticipantProxyData) -> bool {
    let prefix = fresh.guid.prefix;
    match self.participants.get_mut(&prefix) {
      Some(entry) => {
        fresh.is_alive = true;
        entry.data = fresh;
        if entry.is_server {
          entry.lease_deadline = Some(Timestamp::now() + entry.data.lease_duration);
        }
        true
      }
      None => false,
    }
  }

  /// Refresh the lease of a server entry without new data, e.g. on any
  /// traffic proving the server alive.
  pub fn refresh_lease(&mut self, prefix: GuidPrefix) {
    if let Some(entry) = self.participants.get_mut(&prefix) {
      if entry.is_server {
        entry.lease_deadline = Some(Timestamp::now() + entry.data.lease_duration);
      }
    }
  }

  pub fn drop_participant(&mut self, prefix: GuidPrefix) -> Option<ParticipantProxyData> {
    self.participants.remove(&prefix).map(|entry| {
      info!("dropped participant {:?}", prefix);
      entry.data
    })
  }

  pub fn get(&self, prefix: GuidPrefix) -> Option<&ParticipantProxyData> {
    self.participants.get(&prefix).map(|e| &e.data)
  }

  pub fn is_server(&self, prefix: GuidPrefix) -> bool {
    self
      .participants
      .get(&prefix)
      .map_or(false, |e| e.is_server)
  }

  pub fn contains(&self, prefix: GuidPrefix) -> bool {
    self.participants.contains_key(&prefix)
  }

  /// Server entries whose lease ran out by `now`. Non-servers never expire
  /// here, so the invariant "a non-server proxy never owns a running lease
  /// timer" holds by construction.
  pub fn expired_leases(&self, now: Timestamp) -> Vec<GuidPrefix> {
    self
      .participants
      .iter()
      .filter(|(_, entry)| {
        entry
          .lease_deadline
          .map_or(false, |deadline| now > deadline)
      })
      .map(|(prefix, _)| *prefix)
      .collect()
  }

  /// Earliest armed lease deadline, for scheduling the next lease check.
  pub fn next_lease_deadline(&self) -> Option<Timestamp> {
    self
      .participants
      .values()
      .filter_map(|entry| entry.lease_deadline)
      .min()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::structure::{
    duration::Duration,
    guid::{EntityId, GuidPrefix, GUID},
  };

  fn data(n: u8, lease_secs: i32) -> ParticipantProxyData {
    let guid = GUID::new(GuidPrefix::new([n; 12]), EntityId::PARTICIPANT);
    let mut data = ParticipantProxyData::new(guid);
    data.lease_duration = Duration::from_secs(lease_secs);
    data
  }

  #[test]
  fn admit_is_unique_per_guid() {
    let mut db = ProxyDb::new();
    assert!(db.admit(data(1, 10), true).is_some());
    assert!(db.admit(data(1, 10), true).is_none());
    assert_eq!(db.len(), 1);
  }

  #[test]
  fn only_servers_get_a_lease() {
    let mut db = ProxyDb::new();
    db.admit(data(1, 1), true);
    db.admit(data(2, 1), false);

    let later = Timestamp::now() + Duration::from_secs(100);
    let expired = db.expired_leases(later);
    assert_eq!(expired, vec![GuidPrefix::new([1; 12])]);
  }

  #[test]
  fn update_restarts_server_lease() {
    let mut db = ProxyDb::new();
    db.admit(data(1, 1), true);

    // fresher data with a longer lease
    assert!(db.update(data(1, 1000)));
    let later = Timestamp::now() + Duration::from_secs(100);
    assert!(db.expired_leases(later).is_empty());
    assert!(db.get(GuidPrefix::new([1; 12])).unwrap().is_alive);
  }

  #[test]
  fn update_of_unknown_participant_fails() {
    let mut db = ProxyDb::new();
    assert!(!db.update(data(7, 10)));
  }

  #[test]
  fn drop_removes_entry() {
    let mut db = ProxyDb::new();
    db.admit(data(1, 10), false);
    assert!(db.drop_participant(GuidPrefix::new([1; 12])).is_some());
    assert!(db.is_empty());
    assert!(db.drop_participant(GuidPrefix::new([1; 12])).is_none());
  }
}
