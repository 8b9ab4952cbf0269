use std::sync::atomic::{AtomicBool, Ordering};

use bytes::BytesMut;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  structure::{
    cache_change::CacheChange,
    duration::Duration,
    guid::{EntityId, GUID},
    locator::Locator,
    payload_pool::PayloadPool,
    qos::{DurabilityKind, LivelinessKind, ReliabilityKind, TopicKind},
    sequence_number::SequenceNumber,
  },
};

/// Callback target for samples a reader has accepted into its history.
///
/// Invoked with the reader lock held; implementations must not call back
/// into the reader, and anything heavier than a channel send belongs on the
/// receiving side of one.
pub trait ReaderListener: Send + Sync {
  fn on_new_cache_change(&self, reader_guid: GUID, change: &CacheChange);
}

/// Description of a remote writer handed to `matched_writer_add`.
///
/// The engine keeps one scratch instance per direction behind a short-lived
/// mutex and refills it for every match operation, so no long-lived
/// descriptor exists outside the reader.
#[derive(Clone, Debug)]
pub struct WriterProxyData {
  pub guid: GUID,
  pub persistence_guid: Option<GUID>,
  pub unicast_locators: Vec<Locator>,
  pub multicast_locators: Vec<Locator>,
  pub reliability: ReliabilityKind,
  pub durability: DurabilityKind,
  pub manual_by_topic_liveliness: bool,
  pub data_sharing: bool,
}

impl WriterProxyData {
  pub fn clear(&mut self) {
    *self = Self::default();
  }
}

impl Default for WriterProxyData {
  fn default() -> Self {
    Self {
      guid: GUID::UNKNOWN,
      persistence_guid: None,
      unicast_locators: Vec::new(),
      multicast_locators: Vec::new(),
      reliability: ReliabilityKind::BestEffort,
      durability: DurabilityKind::Volatile,
      manual_by_topic_liveliness: false,
      data_sharing: false,
    }
  }
}

/// Description of a remote reader handed to `matched_reader_add` on the
/// writer side.
#[derive(Clone, Debug)]
pub struct ReaderProxyData {
  pub guid: GUID,
  pub expects_inline_qos: bool,
  pub unicast_locators: Vec<Locator>,
  pub multicast_locators: Vec<Locator>,
  pub reliability: ReliabilityKind,
  pub durability: DurabilityKind,
}

impl ReaderProxyData {
  pub fn clear(&mut self) {
    *self = Self::default();
  }
}

impl Default for ReaderProxyData {
  fn default() -> Self {
    Self {
      guid: GUID::UNKNOWN,
      expects_inline_qos: false,
      unicast_locators: Vec::new(),
      multicast_locators: Vec::new(),
      reliability: ReliabilityKind::BestEffort,
      durability: DurabilityKind::Volatile,
    }
  }
}

/// Per-matched-writer record inside a reader.
#[derive(Debug)]
pub(crate) struct RemoteWriterInfo {
  pub guid: GUID,
  pub persistence_guid: GUID,
  pub has_manual_topic_liveliness: bool,
  pub is_datasharing: bool,
  /// At most one sample is reassembled per writer at a time.
  pub fragmented_change: Option<FragmentAssembly>,
}

impl RemoteWriterInfo {
  pub fn from_proxy(wdata: &WriterProxyData) -> Self {
    Self {
      guid: wdata.guid,
      persistence_guid: wdata.persistence_guid.unwrap_or(wdata.guid),
      has_manual_topic_liveliness: wdata.manual_by_topic_liveliness,
      is_datasharing: wdata.data_sharing,
      fragmented_change: None,
    }
  }
}

/// Reassembly state of one fragmented sample.
#[derive(Debug)]
pub(crate) struct FragmentAssembly {
  template: CacheChange,
  buffer: BytesMut,
  received: Vec<bool>,
  sample_size: u32,
  fragment_size: u16,
}

impl FragmentAssembly {
  pub fn new(
    mut buffer: BytesMut,
    incoming: &CacheChange,
    sample_size: u32,
    fragment_size: u16,
  ) -> Self {
    buffer.clear();
    buffer.resize(sample_size as usize, 0);
    let fragment_count = Self::fragment_count(sample_size, fragment_size);
    let mut template = CacheChange::new(incoming.writer_guid, incoming.sequence_number, incoming.kind);
    template.copy_not_payload(incoming);
    Self {
      template,
      buffer,
      received: vec![false; fragment_count],
      sample_size,
      fragment_size,
    }
  }

  fn fragment_count(sample_size: u32, fragment_size: u16) -> usize {
    let fragment_size = u32::from(fragment_size.max(1));
    ((sample_size + fragment_size - 1) / fragment_size) as usize
  }

  pub fn sequence_number(&self) -> SequenceNumber {
    self.template.sequence_number
  }

  pub fn buffer_capacity(&self) -> usize {
    self.buffer.capacity()
  }

  /// Re-target the buffer at a newer sample, dropping previous progress.
  /// Caller has checked that the new sample fits the existing buffer.
  pub fn reset(&mut self, incoming: &CacheChange, sample_size: u32, fragment_size: u16) {
    self.buffer.clear();
    self.buffer.resize(sample_size as usize, 0);
    self.received = vec![false; Self::fragment_count(sample_size, fragment_size)];
    self.sample_size = sample_size;
    self.fragment_size = fragment_size;
    self.template.copy_not_payload(incoming);
  }

  /// Apply the fragments of one DATA_FRAG submessage. Returns true when the
  /// sample is complete.
  pub fn apply(
    &mut self,
    fragment_payload: &[u8],
    fragment_starting_num: u32,
    fragments_in_submessage: u16,
  ) -> bool {
    let fragment_size = usize::from(self.fragment_size.max(1));
    for i in 0..usize::from(fragments_in_submessage) {
      // fragment numbering starts at 1
      let index = fragment_starting_num as usize - 1 + i;
      if index >= self.received.len() {
        warn!(
          "fragment {} out of range for sample of {} fragments",
          index + 1,
          self.received.len()
        );
        break;
      }
      let offset = index * fragment_size;
      let end = (offset + fragment_size).min(self.sample_size as usize);
      let src_start = i * fragment_size;
      let src_end = (src_start + (end - offset)).min(fragment_payload.len());
      if src_start >= fragment_payload.len() {
        break;
      }
      self.buffer[offset..offset + (src_end - src_start)]
        .copy_from_slice(&fragment_payload[src_start..src_end]);
      self.received[index] = true;
    }
    self.received.iter().all(|r| *r)
  }

  /// Consume the assembly into a complete change. The payload stays in the
  /// buffer reserved from `owner`.
  pub fn into_change(self, owner: std::sync::Arc<dyn PayloadPool>) -> CacheChange {
    let mut change = self.template;
    change.payload = self.buffer.freeze();
    change.payload_owner = Some(owner);
    change.fragment_size = Some(self.fragment_size);
    change
  }

  /// Give the underlying buffer back, e.g. for release to the pool.
  pub fn into_buffer(self) -> BytesMut {
    self.buffer
  }
}

/// Listener thread handle for data-sharing notifications. It must be stopped
/// before a reader's resources are torn down so no notification races the
/// destruction.
#[derive(Debug, Default)]
pub struct DataSharingListener {
  running: AtomicBool,
}

impl DataSharingListener {
  pub fn start(&self) {
    self.running.store(true, Ordering::Release);
  }

  pub fn stop(&self) {
    self.running.store(false, Ordering::Release);
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::Acquire)
  }
}

/// Construction parameters shared by both reader kinds.
#[derive(Clone, Debug)]
pub struct ReaderConfig {
  pub guid: GUID,
  pub topic_kind: TopicKind,
  pub reliability: ReliabilityKind,
  pub durability: DurabilityKind,
  pub expects_inline_qos: bool,
  /// Entity id accepted before any writer is matched, e.g. the well-known
  /// SPDP writer of a discovery server.
  pub trusted_writer_entity_id: Option<EntityId>,
  pub liveliness_kind: LivelinessKind,
  /// `Duration::INFINITE` disables liveliness tracking.
  pub liveliness_lease_duration: Duration,
  /// How long the transport waits before answering a heartbeat with an
  /// ACKNACK.
  pub heartbeat_response_delay: std::time::Duration,
  pub matched_writers_capacity: usize,
  pub history_capacity: usize,
}

impl ReaderConfig {
  pub fn new(guid: GUID) -> Self {
    Self {
      guid,
      topic_kind: TopicKind::WithKey,
      reliability: ReliabilityKind::BestEffort,
      durability: DurabilityKind::Volatile,
      expects_inline_qos: false,
      trusted_writer_entity_id: None,
      liveliness_kind: LivelinessKind::Automatic,
      liveliness_lease_duration: Duration::INFINITE,
      heartbeat_response_delay: crate::rtps::constant::PDP_HEARTBEAT_RESPONSE_DELAY,
      matched_writers_capacity: crate::rtps::constant::MATCHED_WRITERS_CAPACITY_DEFAULT,
      history_capacity: crate::rtps::constant::PDP_INITIAL_RESERVED_CACHES,
    }
  }
}

/// Capability interface shared by the stateless and stateful reader kinds.
/// The transport layer dispatches decoded submessages through this trait
/// without knowing the concrete reader behind it.
pub trait ReaderCore: Send + Sync {
  fn guid(&self) -> GUID;

  fn matched_writer_add(&self, wdata: &WriterProxyData) -> bool;
  fn matched_writer_remove(&self, writer_guid: GUID, removed_by_lease: bool) -> bool;
  fn matched_writer_is_matched(&self, writer_guid: GUID) -> bool;

  fn process_data(&self, change: CacheChange) -> bool;
  fn process_data_frag(
    &self,
    change: CacheChange,
    sample_size: u32,
    fragment_starting_num: u32,
    fragments_in_submessage: u16,
  ) -> bool;
  fn process_heartbeat(
    &self,
    writer_guid: GUID,
    count: i32,
    first_sn: SequenceNumber,
    last_sn: SequenceNumber,
    final_flag: bool,
    liveliness_flag: bool,
  ) -> bool;
  fn process_gap(
    &self,
    writer_guid: GUID,
    gap_start: SequenceNumber,
    gap_list: &[SequenceNumber],
  ) -> bool;

  fn next_unread(&self) -> Option<CacheChange>;
  fn end_access(&self, change: &CacheChange, mark_as_read: bool);
}

#[cfg(test)]
mod tests {
  use bytes::Bytes;

  use super::*;
  use crate::structure::{
    cache_change::ChangeKind,
    guid::GuidPrefix,
    payload_pool::BytesPool,
  };

  fn incoming(sn: i64, payload: &'static [u8], fragment_size: u16) -> CacheChange {
    let writer = GUID::new(
      GuidPrefix::new([1; 12]),
      EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER,
    );
    let mut change = CacheChange::new(writer, SequenceNumber::new(sn), ChangeKind::Alive);
    change.payload = Bytes::from_static(payload);
    change.fragment_size = Some(fragment_size);
    change
  }

  #[test]
  fn fragments_complete_in_any_order() {
    let pool = BytesPool::new("test", 4);
    // sample of 10 bytes in fragments of 4: 3 fragments
    let frag1 = incoming(1, &[0, 1, 2, 3], 4);
    let mut assembly = FragmentAssembly::new(pool.reserve(10).unwrap(), &frag1, 10, 4);

    assert!(!assembly.apply(&[8, 9], 3, 1));
    assert!(!assembly.apply(&[0, 1, 2, 3], 1, 1));
    assert!(assembly.apply(&[4, 5, 6, 7], 2, 1));

    let change = assembly.into_change(pool);
    assert_eq!(&change.payload[..], &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    assert_eq!(change.fragment_size, Some(4));
  }

  #[test]
  fn consecutive_fragments_in_one_submessage() {
    let pool = BytesPool::new("test", 4);
    let frag = incoming(1, &[], 2);
    let mut assembly = FragmentAssembly::new(pool.reserve(6).unwrap(), &frag, 6, 2);
    assert!(assembly.apply(&[1, 2, 3, 4, 5, 6], 1, 3));
    let change = assembly.into_change(pool);
    assert_eq!(&change.payload[..], &[1, 2, 3, 4, 5, 6]);
  }

  #[test]
  fn out_of_range_fragment_is_ignored() {
    let pool = BytesPool::new("test", 4);
    let frag = incoming(2, &[], 4);
    let mut assembly = FragmentAssembly::new(pool.reserve(4).unwrap(), &frag, 4, 4);
    assert!(!assembly.apply(&[9, 9, 9, 9], 5, 1));
    assert!(assembly.apply(&[1, 2, 3, 4], 1, 1));
  }
}
