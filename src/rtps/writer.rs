use std::{
  collections::{BTreeMap, BTreeSet},
  sync::{Arc, Mutex, MutexGuard},
  time::Duration as StdDuration,
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use speedy::Endianness;

use crate::{
  network::udp_sender::UdpSender,
  rtps::{
    constant::{NACK_RESPONSE_DELAY, NACK_SUPPRESSION_DURATION, PDP_HEARTBEAT_PERIOD},
    message::MessageBuilder,
    reader::ReaderProxyData,
  },
  structure::{
    cache_change::{CacheChange, ChangeKind},
    guid::{EntityId, GUID},
    history::History,
    locator::Locator,
    qos::{DurabilityKind, ReliabilityKind, TopicKind},
    sequence_number::SequenceNumber,
    time::Timestamp,
  },
};

/// Construction parameters of the reliable metatraffic writer.
#[derive(Clone, Debug)]
pub struct WriterConfig {
  pub guid: GUID,
  pub topic_kind: TopicKind,
  pub reliability: ReliabilityKind,
  pub durability: DurabilityKind,
  pub heartbeat_period: StdDuration,
  pub nack_response_delay: StdDuration,
  pub nack_suppression_duration: StdDuration,
  /// Set when a flow-control throughput controller is configured; sample
  /// transmission is then deferred to the asynchronous sender thread instead
  /// of happening inline on `add_change`.
  pub asynchronous: bool,
  pub history_capacity: usize,
}

impl WriterConfig {
  pub fn pdp(guid: GUID) -> Self {
    Self {
      guid,
      topic_kind: TopicKind::WithKey,
      reliability: ReliabilityKind::Reliable,
      durability: DurabilityKind::TransientLocal,
      heartbeat_period: PDP_HEARTBEAT_PERIOD,
      nack_response_delay: NACK_RESPONSE_DELAY,
      nack_suppression_duration: NACK_SUPPRESSION_DURATION,
      asynchronous: false,
      history_capacity: crate::rtps::constant::PDP_INITIAL_RESERVED_CACHES,
    }
  }
}

/// What the writer knows about one matched remote reader.
#[derive(Debug)]
struct ReaderProxyState {
  proxy: ReaderProxyData,
  /// The reader has positively acknowledged everything before this.
  all_acked_before: SequenceNumber,
  /// Samples to (re)send to this reader.
  unsent_changes: BTreeSet<SequenceNumber>,
}

impl ReaderProxyState {
  fn new(proxy: &ReaderProxyData) -> Self {
    Self {
      proxy: proxy.clone(),
      all_acked_before: SequenceNumber::new(1),
      unsent_changes: BTreeSet::new(),
    }
  }
}

pub struct WriterState {
  history: History,
  last_change_sequence_number: SequenceNumber,
  readers: BTreeMap<GUID, ReaderProxyState>,
  heartbeat_count: i32,
}

/// Reliable RTPS writer for PDP metatraffic: TRANSIENT_LOCAL, WITH_KEY,
/// acknowledgement-tracking per matched reader.
///
/// The writer owns its own mutex, independent of the PDP engine's. Lock
/// ordering rule: when both are needed, the writer lock is taken first (see
/// `PdpClient::announce_participant_state`). `lock()` hands out a guard so
/// callers can keep the writer locked across several operations.
pub struct StatefulWriter {
  config: WriterConfig,
  endianness: Endianness,
  udp_sender: Arc<UdpSender>,
  state: Mutex<WriterState>,
}

impl StatefulWriter {
  pub fn new(config: WriterConfig, udp_sender: Arc<UdpSender>) -> Self {
    let state = WriterState {
      history: History::with_capacity(config.history_capacity),
      last_change_sequence_number: SequenceNumber::zero(),
      readers: BTreeMap::new(),
      heartbeat_count: 0,
    };
    Self {
      config,
      endianness: Endianness::LittleEndian,
      udp_sender,
      state: Mutex::new(state),
    }
  }

  pub fn guid(&self) -> GUID {
    self.config.guid
  }

  pub fn is_asynchronous(&self) -> bool {
    self.config.asynchronous
  }

  pub fn heartbeat_period(&self) -> StdDuration {
    self.config.heartbeat_period
  }

  pub fn lock(&self) -> WriterGuard<'_> {
    WriterGuard {
      writer: self,
      state: self
        .state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner()),
    }
  }

  // Convenience wrappers over a short-lived guard.

  pub fn matched_reader_add(&self, rdata: &ReaderProxyData) -> bool {
    self.lock().matched_reader_add(rdata)
  }

  pub fn matched_reader_remove(&self, reader_guid: GUID) -> bool {
    self.lock().matched_reader_remove(reader_guid)
  }

  pub fn matched_reader_is_matched(&self, reader_guid: GUID) -> bool {
    self.lock().matched_reader_is_matched(reader_guid)
  }

  pub fn is_acked_by_all(&self, change: &CacheChange) -> bool {
    self.lock().is_acked_by_all(change)
  }

  pub fn min_change(&self) -> Option<CacheChange> {
    self.lock().min_change()
  }

  pub fn handle_ack_nack(
    &self,
    reader_guid: GUID,
    base: SequenceNumber,
    requested: &[SequenceNumber],
  ) {
    self.lock().handle_ack_nack(reader_guid, base, requested);
  }

  pub fn handle_heartbeat_tick(&self) {
    self.lock().handle_heartbeat_tick();
  }
}

pub struct WriterGuard<'a> {
  writer: &'a StatefulWriter,
  state: MutexGuard<'a, WriterState>,
}

impl WriterGuard<'_> {
  /// Sequence number the next change will carry.
  pub fn next_sequence_number(&self) -> SequenceNumber {
    self.state.last_change_sequence_number.plus_1()
  }

  /// Allocate a new change with the next sequence number. The sequence
  /// number is consumed whether or not the change ends up in the history;
  /// disposal samples go out through the direct-send path without ever
  /// being stored.
  pub fn new_change(&mut self, kind: ChangeKind, instance_key: [u8; 16]) -> CacheChange {
    let sn = self.state.last_change_sequence_number.plus_1();
    self.state.last_change_sequence_number = sn;
    let mut change = CacheChange::new(self.writer.config.guid, sn, kind);
    change.instance_key = instance_key;
    change.source_timestamp = Some(Timestamp::now());
    change
  }

  /// Replace any previous change of this instance and append the new one.
  /// With a single local participant this keeps the sample as both the
  /// minimum and only change of the history.
  pub fn add_change(&mut self, change: CacheChange) -> bool {
    let key = change.instance_key;
    let stale: Vec<(GUID, SequenceNumber)> = self
      .state
      .history
      .changes()
      .filter(|c| c.instance_key == key)
      .map(|c| (c.writer_guid, c.sequence_number))
      .collect();
    for (guid, sn) in stale {
      self.state.history.remove_change(guid, sn);
    }

    let sequence_number = change.sequence_number;
    if !self.state.history.add_change(change) {
      error!(
        "writer {:?} failed to store change {:?}",
        self.writer.config.guid, sequence_number
      );
      return false;
    }

    for reader in self.state.readers.values_mut() {
      reader.unsent_changes.insert(sequence_number);
    }

    if !self.writer.config.asynchronous {
      self.flush_unsent();
    }
    true
  }

  /// True iff every currently matched reader has acknowledged `change`.
  pub fn is_acked_by_all(&self, change: &CacheChange) -> bool {
    self
      .state
      .readers
      .values()
      .all(|r| r.all_acked_before > change.sequence_number)
  }

  pub fn min_change(&self) -> Option<CacheChange> {
    self.state.history.min_change().cloned()
  }

  pub fn matched_reader_add(&mut self, rdata: &ReaderProxyData) -> bool {
    if self.state.readers.contains_key(&rdata.guid) {
      warn!("attempting to add existing reader {:?}", rdata.guid);
      return false;
    }
    let mut reader = ReaderProxyState::new(rdata);
    // a freshly matched reader has seen nothing: everything in the history
    // is unsent towards it
    for change in self.state.history.changes() {
      reader.unsent_changes.insert(change.sequence_number);
    }
    self.state.readers.insert(rdata.guid, reader);
    debug!(
      "reader {:?} matched to writer {:?}",
      rdata.guid, self.writer.config.guid
    );
    if !self.writer.config.asynchronous {
      self.flush_unsent();
    }
    true
  }

  pub fn matched_reader_remove(&mut self, reader_guid: GUID) -> bool {
    let removed = self.state.readers.remove(&reader_guid).is_some();
    if removed {
      debug!(
        "reader {:?} unmatched from writer {:?}",
        reader_guid, self.writer.config.guid
      );
    }
    removed
  }

  pub fn matched_reader_is_matched(&self, reader_guid: GUID) -> bool {
    self.state.readers.contains_key(&reader_guid)
  }

  /// ACKNACK from a matched reader: advance its acknowledgement state and
  /// queue requested samples for repair.
  pub fn handle_ack_nack(
    &mut self,
    reader_guid: GUID,
    base: SequenceNumber,
    requested: &[SequenceNumber],
  ) {
    let last_available = self.state.last_change_sequence_number;
    let reader = match self.state.readers.get_mut(&reader_guid) {
      Some(reader) => reader,
      None => {
        debug!("ACKNACK from unmatched reader {:?}", reader_guid);
        return;
      }
    };

    if base < reader.all_acked_before {
      error!(
        "all_acked_before updated backwards! old={:?} new={:?}",
        reader.all_acked_before, base
      );
    }
    reader.all_acked_before = base;
    reader.unsent_changes = reader.unsent_changes.split_off(&base);
    for sn in requested {
      if *sn > last_available {
        warn!(
          "reader {:?} requests {:?} but last available is {:?}",
          reader_guid, sn, last_available
        );
        continue;
      }
      reader.unsent_changes.insert(*sn);
    }

    if !self.writer.config.asynchronous {
      self.flush_unsent();
    }
  }

  /// Periodic heartbeat: announce history bounds to readers that have not
  /// acknowledged everything yet.
  pub fn handle_heartbeat_tick(&mut self) {
    let first_sn = self
      .state
      .history
      .min_change()
      .map(|c| c.sequence_number)
      .unwrap_or_else(|| self.state.last_change_sequence_number.plus_1());
    let last_sn = self.state.last_change_sequence_number;

    if self
      .state
      .readers
      .values()
      .all(|r| last_sn < r.all_acked_before)
    {
      trace!("heartbeat tick: all readers have all available data");
      return;
    }

    self.state.heartbeat_count += 1;
    let message = MessageBuilder::new()
      .heartbeat_msg(
        self.writer.config.guid.entity_id,
        EntityId::UNKNOWN,
        first_sn,
        last_sn,
        self.state.heartbeat_count,
        self.writer.endianness,
        false, // request acknowledgement
        false,
      )
      .add_header_and_build(self.writer.config.guid.prefix);

    match message.write_to_vec() {
      Ok(bytes) => {
        for reader in self.state.readers.values() {
          self
            .writer
            .udp_sender
            .send_to_locators(&bytes, reader_locators(&reader.proxy));
        }
      }
      Err(e) => error!("failed to serialize HEARTBEAT: {:?}", e),
    }
  }

  /// Push every queued change to its reader, with a piggybacked heartbeat.
  fn flush_unsent(&mut self) {
    let WriterState {
      history,
      readers,
      heartbeat_count,
      last_change_sequence_number,
    } = &mut *self.state;

    for reader in readers.values_mut() {
      if reader.unsent_changes.is_empty() {
        continue;
      }
      let pending: Vec<SequenceNumber> = reader.unsent_changes.iter().copied().collect();
      for sn in pending {
        let change = match history.get(self.writer.config.guid, sn) {
          Some(change) => change,
          None => {
            // sample is gone from the history, nothing to repair with
            trace!("change {:?} requested but no longer in history", sn);
            reader.unsent_changes.remove(&sn);
            continue;
          }
        };

        *heartbeat_count += 1;
        let first_sn = history
          .min_change()
          .map(|c| c.sequence_number)
          .unwrap_or(sn);
        let message = MessageBuilder::new()
          .dst_submessage(self.writer.endianness, reader.proxy.guid.prefix)
          .data_msg(
            change,
            reader.proxy.guid.entity_id,
            self.writer.config.guid,
            self.writer.endianness,
          )
          .heartbeat_msg(
            self.writer.config.guid.entity_id,
            reader.proxy.guid.entity_id,
            first_sn,
            *last_change_sequence_number,
            *heartbeat_count,
            self.writer.endianness,
            false,
            false,
          )
          .add_header_and_build(self.writer.config.guid.prefix);

        match message.write_to_vec() {
          Ok(bytes) => {
            self
              .writer
              .udp_sender
              .send_to_locators(&bytes, reader_locators(&reader.proxy));
          }
          Err(e) => error!("failed to serialize DATA: {:?}", e),
        }
        reader.unsent_changes.remove(&sn);
      }
    }
  }
}

fn reader_locators(proxy: &ReaderProxyData) -> &[Locator] {
  if proxy.unicast_locators.is_empty() {
    &proxy.multicast_locators
  } else {
    &proxy.unicast_locators
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::structure::guid::GuidPrefix;

  fn writer() -> StatefulWriter {
    let guid = GUID::new(
      GuidPrefix::new([5; 12]),
      EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER,
    );
    StatefulWriter::new(
      WriterConfig::pdp(guid),
      Arc::new(UdpSender::new().expect("bind UDP sender")),
    )
  }

  fn reader_proxy(n: u8) -> ReaderProxyData {
    ReaderProxyData {
      guid: GUID::new(
        GuidPrefix::new([n; 12]),
        EntityId::SPDP_BUILTIN_PARTICIPANT_READER,
      ),
      reliability: ReliabilityKind::Reliable,
      durability: DurabilityKind::TransientLocal,
      unicast_locators: vec![Locator::udp_v4("127.0.0.1".parse().unwrap(), 17717)],
      ..ReaderProxyData::default()
    }
  }

  #[test]
  fn sequence_numbers_are_allocated_in_order() {
    let w = writer();
    let mut guard = w.lock();
    assert_eq!(guard.next_sequence_number(), SequenceNumber::new(1));
    let c1 = guard.new_change(ChangeKind::Alive, [1; 16]);
    let c2 = guard.new_change(ChangeKind::Alive, [1; 16]);
    assert_eq!(c1.sequence_number, SequenceNumber::new(1));
    assert_eq!(c2.sequence_number, SequenceNumber::new(2));
  }

  #[test]
  fn own_sample_stays_minimum_change() {
    let w = writer();
    let mut guard = w.lock();
    let c1 = guard.new_change(ChangeKind::Alive, [1; 16]);
    assert!(guard.add_change(c1));
    let c2 = guard.new_change(ChangeKind::Alive, [1; 16]);
    assert!(guard.add_change(c2));
    // the replacement is now the minimum (and only) change
    let min = guard.min_change().unwrap();
    assert_eq!(min.sequence_number, SequenceNumber::new(2));
  }

  #[test]
  fn acked_by_all_requires_every_matched_reader() {
    let w = writer();
    let r1 = reader_proxy(1);
    let r2 = reader_proxy(2);
    let mut guard = w.lock();
    guard.matched_reader_add(&r1);
    guard.matched_reader_add(&r2);

    let change = guard.new_change(ChangeKind::Alive, [1; 16]);
    let sn = change.sequence_number;
    guard.add_change(change);
    assert!(!guard.is_acked_by_all(&guard.min_change().unwrap()));

    guard.handle_ack_nack(r1.guid, sn.plus_1(), &[]);
    assert!(!guard.is_acked_by_all(&guard.min_change().unwrap()));
    guard.handle_ack_nack(r2.guid, sn.plus_1(), &[]);
    assert!(guard.is_acked_by_all(&guard.min_change().unwrap()));
  }

  #[test]
  fn unmatching_a_reader_discards_its_ack_state() {
    let w = writer();
    let r1 = reader_proxy(1);
    w.matched_reader_add(&r1);
    {
      let mut guard = w.lock();
      let change = guard.new_change(ChangeKind::Alive, [1; 16]);
      guard.add_change(change);
    }
    assert!(!w.is_acked_by_all(&w.min_change().unwrap()));

    assert!(w.matched_reader_remove(r1.guid));
    assert!(!w.matched_reader_is_matched(r1.guid));
    // no readers matched: trivially acked
    assert!(w.is_acked_by_all(&w.min_change().unwrap()));

    // rematch starts from a clean acknowledgement slate
    assert!(w.matched_reader_add(&r1));
    assert!(!w.is_acked_by_all(&w.min_change().unwrap()));
  }

  #[test]
  fn matched_reader_add_is_idempotent() {
    let w = writer();
    let r1 = reader_proxy(1);
    assert!(w.matched_reader_add(&r1));
    assert!(!w.matched_reader_add(&r1));
  }
}
