use std::{
  fmt,
  sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  },
};

use bytes::{Bytes, BytesMut};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

/// Allocator for serialized payload storage.
///
/// Producer and consumer exchange buffers through a pool without copying when
/// both sides share one (data-sharing). Every payload must be released back
/// to the pool that reserved it, so cache changes carry their owner handle.
pub trait PayloadPool: Send + Sync + fmt::Debug {
  /// Reserve a buffer of at least `size` bytes. `None` when the pool is
  /// exhausted.
  fn reserve(&self, size: usize) -> Option<BytesMut>;

  /// Copy `data` into pool-owned storage. `None` when the pool is exhausted.
  fn get_payload(&self, data: &[u8]) -> Option<Bytes> {
    let mut buffer = self.reserve(data.len())?;
    buffer.extend_from_slice(data);
    Some(buffer.freeze())
  }

  /// Return a payload's storage to the pool.
  fn release(&self, payload: Bytes);
}

/// Reference-counted pool handle as stored on a cache change.
pub type PayloadPoolHandle = Arc<dyn PayloadPool>;

/// Heap-backed pool with a bound on outstanding buffers. The bound models the
/// per-endpoint cache reservation: when it is hit, reservation fails and the
/// caller drops the sample.
pub struct BytesPool {
  name: &'static str,
  max_outstanding: usize,
  /// Largest payload this pool will reserve storage for.
  max_payload_size: usize,
  outstanding: AtomicUsize,
}

impl BytesPool {
  pub fn new(name: &'static str, max_outstanding: usize) -> Arc<Self> {
    Self::with_max_payload(name, max_outstanding, usize::MAX)
  }

  pub fn with_max_payload(
    name: &'static str,
    max_outstanding: usize,
    max_payload_size: usize,
  ) -> Arc<Self> {
    Arc::new(Self {
      name,
      max_outstanding,
      max_payload_size,
      outstanding: AtomicUsize::new(0),
    })
  }

  pub fn outstanding(&self) -> usize {
    self.outstanding.load(Ordering::Relaxed)
  }
}

impl PayloadPool for BytesPool {
  fn reserve(&self, size: usize) -> Option<BytesMut> {
    if size > self.max_payload_size {
      warn!(
        "payload pool {}: requested {} bytes, maximum is {}",
        self.name, size, self.max_payload_size
      );
      return None;
    }
    let previous = self.outstanding.fetch_add(1, Ordering::AcqRel);
    if previous >= self.max_outstanding {
      self.outstanding.fetch_sub(1, Ordering::AcqRel);
      warn!(
        "payload pool {} exhausted: {} buffers outstanding",
        self.name, previous
      );
      return None;
    }
    Some(BytesMut::with_capacity(size))
  }

  fn release(&self, payload: Bytes) {
    drop(payload);
    // saturating: release of a foreign payload must not underflow
    let _ = self
      .outstanding
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
  }
}

impl fmt::Debug for BytesPool {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BytesPool")
      .field("name", &self.name)
      .field("max_outstanding", &self.max_outstanding)
      .field("outstanding", &self.outstanding())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pool_bounds_outstanding_buffers() {
    let pool = BytesPool::new("test", 2);
    let a = pool.get_payload(b"aa").unwrap();
    let _b = pool.get_payload(b"bb").unwrap();
    assert!(pool.get_payload(b"cc").is_none());

    pool.release(a);
    assert!(pool.get_payload(b"cc").is_some());
  }

  #[test]
  fn get_payload_copies_data() {
    let pool = BytesPool::new("test", 8);
    let payload = pool.get_payload(&[1, 2, 3]).unwrap();
    assert_eq!(&payload[..], &[1, 2, 3]);
  }

  #[test]
  fn oversized_reservation_is_refused() {
    let pool = BytesPool::with_max_payload("test", 8, 16);
    assert!(pool.reserve(16).is_some());
    assert!(pool.reserve(17).is_none());
    // refusal does not consume a slot
    assert_eq!(pool.outstanding(), 1);
  }
}
