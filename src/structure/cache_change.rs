use bytes::Bytes;

use crate::structure::{
  guid::GUID, payload_pool::PayloadPoolHandle, sequence_number::SequenceNumber, time::Timestamp,
};

/// Lifecycle state carried by a change, RTPS spec v2.3 Section 8.2.1.2.
#[derive(Copy, Clone, Debug, PartialOrd, PartialEq, Ord, Eq)]
pub enum ChangeKind {
  Alive,
  NotAliveDisposed,
  NotAliveUnregistered,
  NotAliveDisposedUnregistered,
}

/// One sample in a history: metadata plus a pool-owned serialized payload.
#[derive(Clone)]
pub struct CacheChange {
  pub writer_guid: GUID,
  pub sequence_number: SequenceNumber,
  pub kind: ChangeKind,
  /// RTPS key hash of the instance this change refers to.
  pub instance_key: [u8; 16],
  pub payload: Bytes,
  /// The pool that reserved `payload`. The same pool must release it;
  /// see [`crate::structure::payload_pool::PayloadPool`].
  pub payload_owner: Option<PayloadPoolHandle>,
  /// Set when the sample arrived via DATA_FRAG.
  pub fragment_size: Option<u16>,
  pub source_timestamp: Option<Timestamp>,
  pub reception_timestamp: Option<Timestamp>,
  pub is_read: bool,
}

impl CacheChange {
  pub fn new(writer_guid: GUID, sequence_number: SequenceNumber, kind: ChangeKind) -> Self {
    Self {
      writer_guid,
      sequence_number,
      kind,
      instance_key: [0; 16],
      payload: Bytes::new(),
      payload_owner: None,
      fragment_size: None,
      source_timestamp: None,
      reception_timestamp: None,
      is_read: false,
    }
  }

  pub fn with_payload(mut self, payload: Bytes, owner: Option<PayloadPoolHandle>) -> Self {
    self.payload = payload;
    self.payload_owner = owner;
    self
  }

  pub fn with_key(mut self, instance_key: [u8; 16]) -> Self {
    self.instance_key = instance_key;
    self
  }

  /// Copy metadata from another change, leaving payload storage alone.
  /// Used when adopting an incoming change into a pre-reserved buffer.
  pub fn copy_not_payload(&mut self, other: &Self) {
    self.writer_guid = other.writer_guid;
    self.sequence_number = other.sequence_number;
    self.kind = other.kind;
    self.instance_key = other.instance_key;
    self.fragment_size = other.fragment_size;
    self.source_timestamp = other.source_timestamp;
    self.reception_timestamp = other.reception_timestamp;
    self.is_read = false;
  }

  /// Return the payload to its owning pool, if any.
  pub fn release_payload(&mut self) {
    let payload = std::mem::take(&mut self.payload);
    if let Some(owner) = self.payload_owner.take() {
      owner.release(payload);
    }
  }
}

impl std::fmt::Debug for CacheChange {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CacheChange")
      .field("writer_guid", &self.writer_guid)
      .field("sequence_number", &self.sequence_number)
      .field("kind", &self.kind)
      .field("payload_len", &self.payload.len())
      .field("is_read", &self.is_read)
      .finish()
  }
}
