use std::{
  collections::BTreeMap,
  sync::{Arc, Condvar, Mutex, MutexGuard},
  time::Duration as StdDuration,
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  liveliness::LivelinessManager,
  rtps::reader::{
    FragmentAssembly, ReaderConfig, ReaderCore, ReaderListener, RemoteWriterInfo, WriterProxyData,
    DataSharingListener,
  },
  structure::{
    cache_change::{CacheChange, ChangeKind},
    guid::GUID,
    history::History,
    payload_pool::PayloadPoolHandle,
    sequence_number::SequenceNumber,
    time::Timestamp,
  },
};

#[derive(Debug, Default, Clone, Copy)]
pub struct ReaderStats {
  pub samples_received: u64,
  pub bytes_received: u64,
}

struct ReaderState {
  matched_writers: Vec<RemoteWriterInfo>,
  /// Accept ALIVE data from unmatched writers. Flips to false on the first
  /// match, so only the very first server sample rides in on it.
  accept_from_unknown: bool,
  /// Writer GUID to persistence GUID of each currently matched writer.
  persistence_guids: BTreeMap<GUID, GUID>,
  /// Highest sequence number delivered to the listener, per persistence
  /// GUID. Survives unmatch-by-lease so a flapping writer cannot replay.
  last_notified: BTreeMap<GUID, SequenceNumber>,
  history: History,
  unread_count: usize,
  stats: ReaderStats,
}

impl ReaderState {
  fn persistence_guid_of(&self, writer_guid: GUID) -> GUID {
    self
      .persistence_guids
      .get(&writer_guid)
      .copied()
      .unwrap_or(writer_guid)
  }

  fn there_is_upper_record_of(&self, writer_guid: GUID, sn: SequenceNumber) -> bool {
    let pguid = self.persistence_guid_of(writer_guid);
    self
      .last_notified
      .get(&pguid)
      .map_or(false, |last| *last >= sn)
  }

  fn update_last_notified(&mut self, writer_guid: GUID, sn: SequenceNumber) {
    let pguid = self.persistence_guid_of(writer_guid);
    self.last_notified.insert(pguid, sn);
  }
}

/// Best-effort RTPS reader.
///
/// Tracks matched writers, suppresses stale and duplicate sequence numbers,
/// reassembles fragmented samples (one in flight per writer) and asserts
/// writer liveliness towards the WLP. Reliability submessages are accepted
/// and ignored.
pub struct StatelessReader {
  config: ReaderConfig,
  payload_pool: PayloadPoolHandle,
  liveliness: Option<Arc<Mutex<LivelinessManager>>>,
  listener: Option<Arc<dyn ReaderListener>>,
  datasharing_listener: DataSharingListener,
  state: Mutex<ReaderState>,
  new_notification: Condvar,
}

impl StatelessReader {
  pub fn new(
    config: ReaderConfig,
    payload_pool: PayloadPoolHandle,
    liveliness: Option<Arc<Mutex<LivelinessManager>>>,
    listener: Option<Arc<dyn ReaderListener>>,
  ) -> Self {
    let state = ReaderState {
      matched_writers: Vec::with_capacity(config.matched_writers_capacity),
      accept_from_unknown: true,
      persistence_guids: BTreeMap::new(),
      last_notified: BTreeMap::new(),
      history: History::with_capacity(config.history_capacity),
      unread_count: 0,
      stats: ReaderStats::default(),
    };
    let reader = Self {
      config,
      payload_pool,
      liveliness,
      listener,
      datasharing_listener: DataSharingListener::default(),
      state: Mutex::new(state),
      new_notification: Condvar::new(),
    };
    reader.datasharing_listener.start();
    reader
  }

  fn lock_state(&self) -> MutexGuard<'_, ReaderState> {
    self
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Admission predicate: ALIVE data from anyone while no writer has ever
  /// been matched, anything from the trusted entity id, anything from a
  /// matched writer.
  fn accept_message_from(&self, state: &ReaderState, writer_guid: GUID, kind: ChangeKind) -> bool {
    if kind == ChangeKind::Alive {
      if state.accept_from_unknown {
        return true;
      }
      if Some(writer_guid.entity_id) == self.config.trusted_writer_entity_id {
        return true;
      }
    }
    state.matched_writers.iter().any(|w| w.guid == writer_guid)
  }

  /// Locked phase of ingestion: staleness gate, history insertion,
  /// bookkeeping and listener notification. Liveliness assertion is left to
  /// the caller, to run with the lock released.
  fn change_received(&self, state: &mut ReaderState, mut change: CacheChange) -> bool {
    if state.there_is_upper_record_of(change.writer_guid, change.sequence_number) {
      // stale or duplicate, drop silently
      change.release_payload();
      return false;
    }

    change.reception_timestamp = Some(Timestamp::now());
    let payload_length = change.payload.len();
    let writer_guid = change.writer_guid;
    let sequence_number = change.sequence_number;

    let notified_copy = change.clone();
    if !state.history.add_change(change) {
      let mut dropped = notified_copy;
      dropped.release_payload();
      return false;
    }

    state.update_last_notified(writer_guid, sequence_number);
    state.unread_count += 1;
    state.stats.samples_received += 1;
    state.stats.bytes_received += payload_length as u64;

    if let Some(listener) = &self.listener {
      listener.on_new_cache_change(self.config.guid, &notified_copy);
    }
    self.new_notification.notify_all();
    true
  }

  fn assert_writer_liveliness(&self, writer_guid: GUID) {
    if self.config.liveliness_lease_duration.is_infinite() {
      return;
    }
    match &self.liveliness {
      Some(manager) => {
        let mut manager = manager.lock().unwrap_or_else(|p| p.into_inner());
        manager.assert_liveliness(
          writer_guid,
          self.config.liveliness_kind,
          self.config.liveliness_lease_duration,
        );
      }
      None => error!("finite liveliness lease duration but WLP not enabled"),
    }
  }

  pub fn unread_count(&self) -> usize {
    self.lock_state().unread_count
  }

  pub fn stats(&self) -> ReaderStats {
    self.lock_state().stats
  }

  pub fn writer_has_manual_liveliness(&self, writer_guid: GUID) -> bool {
    self
      .lock_state()
      .matched_writers
      .iter()
      .find(|w| w.guid == writer_guid)
      .map_or(false, |w| w.has_manual_topic_liveliness)
  }

  /// Block until an unread sample is available or the timeout elapses.
  pub fn wait_for_unread(&self, timeout: StdDuration) -> bool {
    let state = self.lock_state();
    if state.unread_count > 0 {
      return true;
    }
    let (state, _timeout_result) = self
      .new_notification
      .wait_timeout(state, timeout)
      .unwrap_or_else(|p| p.into_inner());
    state.unread_count > 0
  }
}

impl ReaderCore for StatelessReader {
  fn guid(&self) -> GUID {
    self.config.guid
  }

  fn matched_writer_add(&self, wdata: &WriterProxyData) -> bool {
    let mut state = self.lock_state();
    if state.matched_writers.iter().any(|w| w.guid == wdata.guid) {
      warn!("attempting to add existing writer {:?}", wdata.guid);
      return false;
    }
    if state.matched_writers.len() >= self.config.matched_writers_capacity {
      warn!(
        "no space to add writer {:?} to reader {:?}",
        wdata.guid, self.config.guid
      );
      return false;
    }

    let info = RemoteWriterInfo::from_proxy(wdata);
    state.persistence_guids.insert(info.guid, info.persistence_guid);
    state.matched_writers.push(info);
    state.accept_from_unknown = false;
    drop(state);

    if !self.config.liveliness_lease_duration.is_infinite() {
      match &self.liveliness {
        Some(manager) => {
          manager
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .add_writer(
              wdata.guid,
              self.config.liveliness_kind,
              self.config.liveliness_lease_duration,
            );
        }
        None => error!("finite liveliness lease duration but WLP not enabled"),
      }
    }

    debug!(
      "writer {:?} added to reader {:?}",
      wdata.guid, self.config.guid
    );
    true
  }

  fn matched_writer_remove(&self, writer_guid: GUID, removed_by_lease: bool) -> bool {
    let mut state = self.lock_state();

    // purge every change of the unmatched writer from the history
    for mut change in state.history.remove_changes_with_guid(writer_guid) {
      if !change.is_read {
        state.unread_count = state.unread_count.saturating_sub(1);
      }
      change.release_payload();
    }

    let position = state
      .matched_writers
      .iter()
      .position(|w| w.guid == writer_guid);
    let found = match position {
      None => false,
      Some(index) => {
        let info = state.matched_writers.remove(index);
        if let Some(assembly) = info.fragmented_change {
          self.payload_pool.release(assembly.into_buffer().freeze());
        }
        state.persistence_guids.remove(&writer_guid);
        if !removed_by_lease {
          // the writer went away on purpose: a successor with the same
          // persistence GUID starts a fresh numbering, so forget ours
          state.last_notified.remove(&info.persistence_guid);
        }
        true
      }
    };
    drop(state);

    if !self.config.liveliness_lease_duration.is_infinite() {
      match &self.liveliness {
        Some(manager) => {
          manager
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove_writer(
              writer_guid,
              self.config.liveliness_kind,
              self.config.liveliness_lease_duration,
            );
        }
        None => error!("finite liveliness lease duration but WLP not enabled"),
      }
    }

    if found {
      debug!(
        "writer {:?} removed from reader {:?}",
        writer_guid, self.config.guid
      );
    }
    found
  }

  fn matched_writer_is_matched(&self, writer_guid: GUID) -> bool {
    self
      .lock_state()
      .matched_writers
      .iter()
      .any(|w| w.guid == writer_guid)
  }

  fn process_data(&self, mut change: CacheChange) -> bool {
    let mut state = self.lock_state();
    if !self.accept_message_from(&state, change.writer_guid, change.kind) {
      trace!(
        "reader {:?} dropping data from unmatched writer {:?}",
        self.config.guid,
        change.writer_guid
      );
      return true;
    }

    let writer_guid = change.writer_guid;
    let is_datasharing = state
      .matched_writers
      .iter()
      .any(|w| w.guid == writer_guid && w.is_datasharing);

    // A data-sharing payload already lives in a shared pool: adopt it
    // without a copy and keep its owner so release goes back to the right
    // place. Everything else is copied through our own pool.
    if !(is_datasharing && change.payload_owner.is_some()) {
      match self.payload_pool.get_payload(&change.payload) {
        Some(copied) => {
          change.payload = copied;
          change.payload_owner = Some(self.payload_pool.clone());
        }
        None => {
          error!(
            "problem reserving payload of {} bytes in reader {:?}",
            change.payload.len(),
            self.config.guid
          );
          return false;
        }
      }
    }

    if !self.change_received(&mut state, change) {
      return false;
    }

    drop(state); // avoid AB/BA deadlock with the liveliness manager
    self.assert_writer_liveliness(writer_guid);
    true
  }

  fn process_data_frag(
    &self,
    change: CacheChange,
    sample_size: u32,
    fragment_starting_num: u32,
    fragments_in_submessage: u16,
  ) -> bool {
    let writer_guid = change.writer_guid;
    let mut state = self.lock_state();

    let index = match state
      .matched_writers
      .iter()
      .position(|w| w.guid == writer_guid)
    {
      Some(index) => index,
      None => {
        warn!(
          "reader {:?} received DATA_FRAG from unknown writer {:?}",
          self.config.guid, writer_guid
        );
        return true;
      }
    };
    // data-sharing writers never fragment
    debug_assert!(!state.matched_writers[index].is_datasharing);

    if !state.there_is_upper_record_of(writer_guid, change.sequence_number) {
      let fragment_size = change
        .fragment_size
        .unwrap_or_else(|| change.payload.len().min(u16::MAX as usize) as u16);

      let mut work = state.matched_writers[index].fragmented_change.take();

      if let Some(pending) = &work {
        if pending.sequence_number() > change.sequence_number {
          // already reassembling something newer, drop this fragment
          state.matched_writers[index].fragmented_change = work;
          drop(state);
          self.assert_writer_liveliness(writer_guid);
          return true;
        }
      }

      if let Some(mut pending) = work.take() {
        if pending.sequence_number() < change.sequence_number {
          // pending sample is superseded
          if sample_size as usize <= pending.buffer_capacity() {
            pending.reset(&change, sample_size, fragment_size);
            work = Some(pending);
          } else {
            self.payload_pool.release(pending.into_buffer().freeze());
          }
        } else {
          work = Some(pending);
        }
      }

      if work.is_none() {
        match self.payload_pool.reserve(sample_size as usize) {
          Some(buffer) => {
            work = Some(FragmentAssembly::new(buffer, &change, sample_size, fragment_size));
          }
          None => {
            error!(
              "problem reserving {} bytes for fragmented change in reader {:?}",
              sample_size, self.config.guid
            );
          }
        }
      }

      if let Some(mut assembly) = work {
        if assembly.apply(&change.payload, fragment_starting_num, fragments_in_submessage) {
          let completed = assembly.into_change(self.payload_pool.clone());
          // same insertion path as complete DATA
          self.change_received(&mut state, completed);
        } else {
          state.matched_writers[index].fragmented_change = Some(assembly);
        }
      }
    }

    drop(state);
    self.assert_writer_liveliness(writer_guid);
    true
  }

  fn process_heartbeat(
    &self,
    _writer_guid: GUID,
    _count: i32,
    _first_sn: SequenceNumber,
    _last_sn: SequenceNumber,
    _final_flag: bool,
    _liveliness_flag: bool,
  ) -> bool {
    // no reliability: heartbeats are accepted and ignored
    true
  }

  fn process_gap(
    &self,
    _writer_guid: GUID,
    _gap_start: SequenceNumber,
    _gap_list: &[SequenceNumber],
  ) -> bool {
    true
  }

  fn next_unread(&self) -> Option<CacheChange> {
    self
      .lock_state()
      .history
      .changes()
      .find(|c| !c.is_read)
      .cloned()
  }

  fn end_access(&self, change: &CacheChange, mark_as_read: bool) {
    let mut state = self.lock_state();
    let mut became_read = false;
    if let Some(stored) = state
      .history
      .get_mut(change.writer_guid, change.sequence_number)
    {
      if mark_as_read && !stored.is_read {
        stored.is_read = true;
        became_read = true;
      }
    }
    if became_read {
      state.unread_count = state.unread_count.saturating_sub(1);
    }
  }
}

impl Drop for StatelessReader {
  fn drop(&mut self) {
    // the data-sharing listener must be stopped before pooled resources go
    // away, so no notification races the teardown
    self.datasharing_listener.stop();

    let mut state = self.lock_state();
    for change in state.history.changes_mut() {
      change.release_payload();
    }
    for writer in state.matched_writers.drain(..) {
      if let Some(assembly) = writer.fragmented_change {
        self.payload_pool.release(assembly.into_buffer().freeze());
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use bytes::Bytes;

  use super::*;
  use crate::structure::{
    duration::Duration,
    guid::{EntityId, GuidPrefix},
    payload_pool::BytesPool,
    qos::LivelinessKind,
  };

  fn reader_guid() -> GUID {
    GUID::new(GuidPrefix::new([9; 12]), EntityId::SPDP_BUILTIN_PARTICIPANT_READER)
  }

  fn writer_guid(n: u8) -> GUID {
    GUID::new(GuidPrefix::new([n; 12]), EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER)
  }

  fn user_writer_guid(n: u8) -> GUID {
    GUID::new(
      GuidPrefix::new([n; 12]),
      EntityId {
        entity_key: [0, 0, 5],
        entity_kind: crate::structure::guid::entity_kind::WRITER_WITH_KEY_USER_DEFINED,
      },
    )
  }

  fn proxy(guid: GUID) -> WriterProxyData {
    WriterProxyData {
      guid,
      ..WriterProxyData::default()
    }
  }

  fn data(writer: GUID, sn: i64) -> CacheChange {
    let mut change = CacheChange::new(writer, SequenceNumber::new(sn), ChangeKind::Alive);
    change.payload = Bytes::from_static(&[0, 1, 0, 0, 42]);
    change
  }

  fn plain_reader() -> StatelessReader {
    StatelessReader::new(
      ReaderConfig::new(reader_guid()),
      BytesPool::new("reader", 64),
      None,
      None,
    )
  }

  #[test]
  fn match_writer_is_idempotent() {
    let reader = plain_reader();
    let wdata = proxy(writer_guid(1));
    assert!(reader.matched_writer_add(&wdata));
    for _ in 0..4 {
      assert!(!reader.matched_writer_add(&wdata));
    }
    assert!(reader.matched_writer_is_matched(wdata.guid));
  }

  #[test]
  fn capacity_limits_matched_writers() {
    let mut config = ReaderConfig::new(reader_guid());
    config.matched_writers_capacity = 1;
    let reader = StatelessReader::new(config, BytesPool::new("reader", 64), None, None);
    assert!(reader.matched_writer_add(&proxy(writer_guid(1))));
    assert!(!reader.matched_writer_add(&proxy(writer_guid(2))));
  }

  #[test]
  fn stale_sequence_numbers_are_dropped() {
    let reader = plain_reader();
    let w = writer_guid(1);
    reader.matched_writer_add(&proxy(w));

    assert!(reader.process_data(data(w, 2)));
    assert_eq!(reader.unread_count(), 1);
    // same and lower sequence numbers never reach the history again
    assert!(!reader.process_data(data(w, 2)));
    assert!(!reader.process_data(data(w, 1)));
    assert_eq!(reader.unread_count(), 1);
    // higher passes
    assert!(reader.process_data(data(w, 3)));
    assert_eq!(reader.unread_count(), 2);
  }

  #[test]
  fn unknown_writer_guard() {
    let mut config = ReaderConfig::new(reader_guid());
    config.trusted_writer_entity_id = Some(EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER);
    let reader = StatelessReader::new(config, BytesPool::new("reader", 64), None, None);
    // flip accept_from_unknown off
    reader.matched_writer_add(&proxy(writer_guid(1)));

    // trusted entity id passes even without a match
    assert!(reader.process_data(data(writer_guid(2), 1)));
    assert_eq!(reader.unread_count(), 1);

    // user-topic writer without a match is dropped without an error
    assert!(reader.process_data(data(user_writer_guid(3), 1)));
    assert_eq!(reader.unread_count(), 1);
  }

  #[test]
  fn accept_from_unknown_admits_first_sample_only_before_any_match() {
    let reader = plain_reader();
    // nothing matched yet: ALIVE data is let in
    assert!(reader.process_data(data(user_writer_guid(3), 1)));
    assert_eq!(reader.unread_count(), 1);

    reader.matched_writer_add(&proxy(writer_guid(1)));
    // the flag is now off
    assert!(reader.process_data(data(user_writer_guid(4), 1)));
    assert_eq!(reader.unread_count(), 1);
  }

  #[test]
  fn unmatch_purges_history_and_liveliness() {
    let liveliness = Arc::new(Mutex::new(LivelinessManager::new()));
    let mut config = ReaderConfig::new(reader_guid());
    config.liveliness_kind = LivelinessKind::Automatic;
    config.liveliness_lease_duration = Duration::from_secs(5);
    let reader = StatelessReader::new(
      config,
      BytesPool::new("reader", 64),
      Some(liveliness.clone()),
      None,
    );

    let w = writer_guid(1);
    reader.matched_writer_add(&proxy(w));
    assert!(liveliness.lock().unwrap().contains_writer(w));

    reader.process_data(data(w, 1));
    reader.process_data(data(w, 2));
    assert_eq!(reader.unread_count(), 2);

    assert!(reader.matched_writer_remove(w, false));
    assert_eq!(reader.unread_count(), 0);
    assert!(reader.next_unread().is_none());
    assert!(!liveliness.lock().unwrap().contains_writer(w));
    assert!(!reader.matched_writer_remove(w, false));
  }

  #[test]
  fn lease_removal_keeps_last_notified_plain_removal_resets_it() {
    let reader = plain_reader();
    let w = writer_guid(1);
    reader.matched_writer_add(&proxy(w));
    reader.process_data(data(w, 5));

    // removed by lease: high-water mark survives the rematch
    reader.matched_writer_remove(w, true);
    reader.matched_writer_add(&proxy(w));
    assert!(!reader.process_data(data(w, 5)));

    // removed on purpose: successor starts over and is accepted
    reader.matched_writer_remove(w, false);
    reader.matched_writer_add(&proxy(w));
    assert!(reader.process_data(data(w, 1)));
  }

  #[test]
  fn fragment_reassembly_delivers_single_complete_change() {
    let listener_hits = Arc::new(Mutex::new(Vec::<usize>::new()));
    struct Recorder(Arc<Mutex<Vec<usize>>>);
    impl ReaderListener for Recorder {
      fn on_new_cache_change(&self, _reader: GUID, change: &CacheChange) {
        self.0.lock().unwrap().push(change.payload.len());
      }
    }

    let reader = StatelessReader::new(
      ReaderConfig::new(reader_guid()),
      BytesPool::new("reader", 64),
      None,
      Some(Arc::new(Recorder(listener_hits.clone()))),
    );
    let w = writer_guid(1);
    reader.matched_writer_add(&proxy(w));

    let frag = |payload: &'static [u8], start: u32| {
      let mut change = CacheChange::new(w, SequenceNumber::new(1), ChangeKind::Alive);
      change.payload = Bytes::from_static(payload);
      change.fragment_size = Some(4);
      reader.process_data_frag(change, 10, start, 1)
    };

    // out of order: 3, 1, 2
    assert!(frag(&[8, 9], 3));
    assert!(frag(&[0, 1, 2, 3], 1));
    assert!(listener_hits.lock().unwrap().is_empty()); // nothing partial leaks out
    assert!(frag(&[4, 5, 6, 7], 2));

    let delivered = listener_hits.lock().unwrap();
    assert_eq!(delivered.as_slice(), &[10]);
    assert_eq!(reader.unread_count(), 1);
  }

  #[test]
  fn newer_fragmented_sample_supersedes_pending_one() {
    let reader = plain_reader();
    let w = writer_guid(1);
    reader.matched_writer_add(&proxy(w));

    let frag = |sn: i64, payload: &'static [u8], start: u32, size: u32| {
      let mut change = CacheChange::new(w, SequenceNumber::new(sn), ChangeKind::Alive);
      change.payload = Bytes::from_static(payload);
      change.fragment_size = Some(4);
      reader.process_data_frag(change, size, start, 1)
    };

    // start sample 1, then abandon it for sample 2
    assert!(frag(1, &[1, 1, 1, 1], 1, 8));
    assert!(frag(2, &[2, 2, 2, 2], 1, 8));
    // an old fragment of sample 1 is now silently dropped
    assert!(frag(1, &[1, 1, 1, 1], 2, 8));
    assert_eq!(reader.unread_count(), 0);
    // completing sample 2 delivers it
    assert!(frag(2, &[3, 3, 3, 3], 2, 8));
    assert_eq!(reader.unread_count(), 1);
    let change = reader.next_unread().unwrap();
    assert_eq!(change.sequence_number, SequenceNumber::new(2));
    assert_eq!(&change.payload[..], &[2, 2, 2, 2, 3, 3, 3, 3]);
  }

  #[test]
  fn oversized_fragmented_sample_is_refused_but_reader_recovers() {
    let pool = BytesPool::with_max_payload("reader", 64, 16);
    let reader = StatelessReader::new(ReaderConfig::new(reader_guid()), pool, None, None);
    let w = writer_guid(1);
    reader.matched_writer_add(&proxy(w));

    let mut change = CacheChange::new(w, SequenceNumber::new(1), ChangeKind::Alive);
    change.payload = Bytes::from_static(&[0; 8]);
    change.fragment_size = Some(8);
    // sample_size exceeds the pool's payload bound: no assembly is kept
    assert!(reader.process_data_frag(change, 1000, 1, 1));
    assert_eq!(reader.unread_count(), 0);

    // later samples from the same writer still work
    assert!(reader.process_data(data(w, 2)));
    assert_eq!(reader.unread_count(), 1);
  }

  #[test]
  fn end_access_marks_read_and_decrements_unread() {
    let reader = plain_reader();
    let w = writer_guid(1);
    reader.matched_writer_add(&proxy(w));
    reader.process_data(data(w, 1));

    let change = reader.next_unread().unwrap();
    reader.end_access(&change, true);
    assert_eq!(reader.unread_count(), 0);
    assert!(reader.next_unread().is_none());
  }

  #[test]
  fn heartbeat_and_gap_are_ignored() {
    let reader = plain_reader();
    let w = writer_guid(1);
    reader.matched_writer_add(&proxy(w));
    assert!(reader.process_heartbeat(w, 1, SequenceNumber::new(1), SequenceNumber::new(5), false, false));
    assert!(reader.process_gap(w, SequenceNumber::new(1), &[SequenceNumber::new(2)]));
    assert_eq!(reader.unread_count(), 0);
  }
}
