use std::{
  collections::{BTreeMap, BTreeSet},
  sync::{Arc, Mutex, MutexGuard},
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  messages::submessage::AckNackState,
  rtps::reader::{
    FragmentAssembly, ReaderConfig, ReaderCore, ReaderListener, WriterProxyData,
  },
  structure::{
    cache_change::CacheChange,
    guid::GUID,
    history::History,
    payload_pool::PayloadPoolHandle,
    sequence_number::SequenceNumber,
    time::Timestamp,
  },
};

/// Acknowledgement-tracking state of one matched writer.
#[derive(Debug)]
struct MatchedWriter {
  proxy: WriterProxyData,
  persistence_guid: GUID,
  /// Everything at or below this has been received or declared irrelevant.
  received_up_to: SequenceNumber,
  /// Received out of order, above `received_up_to`.
  received_above: BTreeSet<SequenceNumber>,
  /// Highest sequence number the writer has announced via HEARTBEAT.
  max_announced: SequenceNumber,
  /// Lowest sequence number still offered by the writer.
  min_available: SequenceNumber,
  acknack_count: i32,
  fragmented_change: Option<FragmentAssembly>,
}

impl MatchedWriter {
  fn new(proxy: &WriterProxyData) -> Self {
    Self {
      proxy: proxy.clone(),
      persistence_guid: proxy.persistence_guid.unwrap_or(proxy.guid),
      received_up_to: SequenceNumber::zero(),
      received_above: BTreeSet::new(),
      max_announced: SequenceNumber::zero(),
      min_available: SequenceNumber::new(1),
      acknack_count: 0,
      fragmented_change: None,
    }
  }

  fn mark_received(&mut self, sn: SequenceNumber) {
    if sn <= self.received_up_to {
      return;
    }
    self.received_above.insert(sn);
    while self.received_above.remove(&self.received_up_to.plus_1()) {
      self.received_up_to = self.received_up_to.plus_1();
    }
  }

  /// Sequence numbers announced by the writer but not yet received.
  fn missing_changes(&self) -> Vec<SequenceNumber> {
    let mut missing = Vec::new();
    let mut sn = self.received_up_to.plus_1();
    // nothing below min_available will ever arrive
    if sn < self.min_available {
      sn = self.min_available;
    }
    while sn <= self.max_announced {
      if !self.received_above.contains(&sn) {
        missing.push(sn);
      }
      sn = sn.plus_1();
    }
    missing
  }

  fn is_clean(&self) -> bool {
    self.missing_changes().is_empty()
  }
}

struct ReaderState {
  matched_writers: BTreeMap<GUID, MatchedWriter>,
  last_notified: BTreeMap<GUID, SequenceNumber>,
  history: History,
  unread_count: usize,
}

impl ReaderState {
  fn persistence_guid_of(&self, writer_guid: GUID) -> GUID {
    self
      .matched_writers
      .get(&writer_guid)
      .map(|w| w.persistence_guid)
      .unwrap_or(writer_guid)
  }

  fn there_is_upper_record_of(&self, writer_guid: GUID, sn: SequenceNumber) -> bool {
    let pguid = self.persistence_guid_of(writer_guid);
    self
      .last_notified
      .get(&pguid)
      .map_or(false, |last| *last >= sn)
  }
}

/// Reliable RTPS reader used for PDP metatraffic.
///
/// Tracks what each matched writer has announced against what has arrived,
/// so the engine can ask whether discovery data is fully synchronised
/// (`is_in_clean_state`). ACKNACK responses are produced as decoded state
/// for the transport to serialize.
pub struct StatefulReader {
  config: ReaderConfig,
  payload_pool: PayloadPoolHandle,
  listener: Option<Arc<dyn ReaderListener>>,
  state: Mutex<ReaderState>,
}

impl StatefulReader {
  pub fn new(
    config: ReaderConfig,
    payload_pool: PayloadPoolHandle,
    listener: Option<Arc<dyn ReaderListener>>,
  ) -> Self {
    let state = ReaderState {
      matched_writers: BTreeMap::new(),
      last_notified: BTreeMap::new(),
      history: History::with_capacity(config.history_capacity),
      unread_count: 0,
    };
    Self {
      config,
      payload_pool,
      listener,
      state: Mutex::new(state),
    }
  }

  fn lock_state(&self) -> MutexGuard<'_, ReaderState> {
    self
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn accept_message_from(&self, state: &ReaderState, writer_guid: GUID) -> bool {
    if Some(writer_guid.entity_id) == self.config.trusted_writer_entity_id {
      return true;
    }
    state.matched_writers.contains_key(&writer_guid)
  }

  /// True when no matched writer has announced samples that have not been
  /// received. This is the engine's synchronisation check.
  pub fn is_in_clean_state(&self) -> bool {
    self
      .lock_state()
      .matched_writers
      .values()
      .all(MatchedWriter::is_clean)
  }

  /// ACKNACK content for one matched writer, if a response is due.
  pub fn acknack_response(&self, writer_guid: GUID) -> Option<AckNackState> {
    let mut state = self.lock_state();
    let reader_id = self.config.guid.entity_id;
    let writer = state.matched_writers.get_mut(&writer_guid)?;
    writer.acknack_count += 1;
    Some(AckNackState {
      reader_id,
      writer_id: writer_guid.entity_id,
      base: writer.received_up_to.plus_1(),
      missing: writer.missing_changes(),
      count: writer.acknack_count,
    })
  }

  pub fn unread_count(&self) -> usize {
    self.lock_state().unread_count
  }

  /// Delay the transport applies before answering a heartbeat.
  pub fn heartbeat_response_delay(&self) -> std::time::Duration {
    self.config.heartbeat_response_delay
  }

  fn change_received(&self, state: &mut ReaderState, mut change: CacheChange) -> bool {
    if state.there_is_upper_record_of(change.writer_guid, change.sequence_number) {
      change.release_payload();
      return false;
    }

    change.reception_timestamp = Some(Timestamp::now());
    let writer_guid = change.writer_guid;
    let sequence_number = change.sequence_number;

    let notified_copy = change.clone();
    if !state.history.add_change(change) {
      let mut dropped = notified_copy;
      dropped.release_payload();
      return false;
    }

    let pguid = state.persistence_guid_of(writer_guid);
    state.last_notified.insert(pguid, sequence_number);
    if let Some(writer) = state.matched_writers.get_mut(&writer_guid) {
      writer.mark_received(sequence_number);
    }
    state.unread_count += 1;

    if let Some(listener) = &self.listener {
      listener.on_new_cache_change(self.config.guid, &notified_copy);
    }
    true
  }
}

impl ReaderCore for StatefulReader {
  fn guid(&self) -> GUID {
    self.config.guid
  }

  fn matched_writer_add(&self, wdata: &WriterProxyData) -> bool {
    let mut state = self.lock_state();
    if state.matched_writers.contains_key(&wdata.guid) {
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
    state
      .matched_writers
      .insert(wdata.guid, MatchedWriter::new(wdata));
    debug!(
      "writer {:?} added to reader {:?}",
      wdata.guid, self.config.guid
    );
    true
  }

  fn matched_writer_remove(&self, writer_guid: GUID, removed_by_lease: bool) -> bool {
    let mut state = self.lock_state();
    for mut change in state.history.remove_changes_with_guid(writer_guid) {
      if !change.is_read {
        state.unread_count = state.unread_count.saturating_sub(1);
      }
      change.release_payload();
    }
    match state.matched_writers.remove(&writer_guid) {
      None => false,
      Some(writer) => {
        if let Some(assembly) = writer.fragmented_change {
          self.payload_pool.release(assembly.into_buffer().freeze());
        }
        if !removed_by_lease {
          state.last_notified.remove(&writer.persistence_guid);
        }
        debug!(
          "writer {:?} removed from reader {:?}",
          writer_guid, self.config.guid
        );
        true
      }
    }
  }

  fn matched_writer_is_matched(&self, writer_guid: GUID) -> bool {
    self.lock_state().matched_writers.contains_key(&writer_guid)
  }

  fn process_data(&self, mut change: CacheChange) -> bool {
    let mut state = self.lock_state();
    if !self.accept_message_from(&state, change.writer_guid) {
      trace!(
        "reader {:?} dropping data from unmatched writer {:?}",
        self.config.guid,
        change.writer_guid
      );
      return true;
    }

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

    // a disposal counts as received even though it ends the instance
    let writer_guid = change.writer_guid;
    let sequence_number = change.sequence_number;
    let accepted = self.change_received(&mut state, change);
    if !accepted {
      if let Some(writer) = state.matched_writers.get_mut(&writer_guid) {
        // duplicate of something already seen still advances the ack state
        writer.mark_received(sequence_number);
      }
    }
    accepted
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
    if !state.matched_writers.contains_key(&writer_guid) {
      warn!(
        "reader {:?} received DATA_FRAG from unknown writer {:?}",
        self.config.guid, writer_guid
      );
      return true;
    }

    if state.there_is_upper_record_of(writer_guid, change.sequence_number) {
      return true;
    }

    let fragment_size = change
      .fragment_size
      .unwrap_or_else(|| change.payload.len().min(u16::MAX as usize) as u16);

    let writer = state
      .matched_writers
      .get_mut(&writer_guid)
      .expect("matched writer disappeared under lock");
    let mut work = writer.fragmented_change.take();

    if let Some(pending) = &work {
      if pending.sequence_number() > change.sequence_number {
        writer.fragmented_change = work;
        return true;
      }
    }

    if let Some(mut pending) = work.take() {
      if pending.sequence_number() < change.sequence_number {
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
        self.change_received(&mut state, completed);
      } else if let Some(writer) = state.matched_writers.get_mut(&writer_guid) {
        writer.fragmented_change = Some(assembly);
      }
    }
    true
  }

  fn process_heartbeat(
    &self,
    writer_guid: GUID,
    _count: i32,
    first_sn: SequenceNumber,
    last_sn: SequenceNumber,
    final_flag: bool,
    _liveliness_flag: bool,
  ) -> bool {
    let mut state = self.lock_state();
    let writer = match state.matched_writers.get_mut(&writer_guid) {
      Some(writer) => writer,
      None => return true,
    };

    if last_sn > writer.max_announced {
      writer.max_announced = last_sn;
    }
    if first_sn > writer.min_available {
      writer.min_available = first_sn;
      // samples below first_sn are gone for good, stop waiting for them
      while writer.received_up_to.plus_1() < first_sn {
        let next = writer.received_up_to.plus_1();
        writer.received_above.remove(&next);
        writer.received_up_to = next;
      }
      while writer
        .received_above
        .remove(&writer.received_up_to.plus_1())
      {
        writer.received_up_to = writer.received_up_to.plus_1();
      }
    }

    // a non-final heartbeat with missing data asks for an ACKNACK response,
    // which the transport fetches via acknack_response()
    let respond = !final_flag || !writer.is_clean();
    trace!(
      "heartbeat from {:?}: announced {:?}..{:?}, respond={}",
      writer_guid,
      first_sn,
      last_sn,
      respond
    );
    true
  }

  fn process_gap(
    &self,
    writer_guid: GUID,
    gap_start: SequenceNumber,
    gap_list: &[SequenceNumber],
  ) -> bool {
    let mut state = self.lock_state();
    if let Some(writer) = state.matched_writers.get_mut(&writer_guid) {
      // irrelevant samples count as received for synchronisation purposes
      let mut sn = gap_start;
      let gap_list_start = gap_list.iter().min().copied().unwrap_or(gap_start);
      while sn < gap_list_start {
        writer.mark_received(sn);
        sn = sn.plus_1();
      }
      for sn in gap_list {
        writer.mark_received(*sn);
      }
    }
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

impl Drop for StatefulReader {
  fn drop(&mut self) {
    let mut state = self.lock_state();
    for change in state.history.changes_mut() {
      change.release_payload();
    }
  }
}
