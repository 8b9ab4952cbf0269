use bytes::Bytes;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use speedy::{Context, Endianness, Writable, Writer};

use crate::{
  messages::{
    header::Header,
    parameter_list::{Parameter, ParameterList},
    submessage::{
      endianness_flag, Data, Heartbeat, HeartbeatFlags, InfoDestination, SubmessageHeader,
      SubmessageKind,
    },
  },
  structure::{
    cache_change::{CacheChange, ChangeKind},
    guid::{EntityId, GuidPrefix, GUID},
    parameter_id::ParameterId,
    sequence_number::SequenceNumber,
  },
};

#[derive(Clone, Debug)]
pub enum SubmessageBody {
  InfoDestination(InfoDestination),
  Data(Data),
  Heartbeat(Heartbeat),
}

#[derive(Clone, Debug)]
pub struct Submessage {
  pub header: SubmessageHeader,
  pub body: SubmessageBody,
}

impl<C: Context> Writable<C> for Submessage {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_value(&self.header)?;
    match &self.body {
      SubmessageBody::InfoDestination(m) => writer.write_value(m),
      SubmessageBody::Data(m) => writer.write_value(m),
      SubmessageBody::Heartbeat(m) => writer.write_value(m),
    }
  }
}

/// One RTPS message: header plus submessages.
#[derive(Clone, Debug)]
pub struct Message {
  pub header: Header,
  pub submessages: Vec<Submessage>,
}

impl Message {
  /// Serialized wire form. Submessage payloads are little-endian, as
  /// announced by the endianness flag of each submessage.
  pub fn write_to_vec(&self) -> std::result::Result<Vec<u8>, speedy::Error> {
    self.write_to_vec_with_ctx(Endianness::LittleEndian)
  }
}

impl<C: Context> Writable<C> for Message {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_value(&self.header)?;
    for submessage in &self.submessages {
      writer.write_value(submessage)?;
    }
    Ok(())
  }
}

/// Builds one RTPS message submessage by submessage.
///
/// This is also the direct-send path: a message built here and handed to the
/// UDP sender bypasses the reliability queue and per-reader state entirely,
/// which is what shutdown disposal and server pings need.
#[derive(Default, Clone)]
pub struct MessageBuilder {
  submessages: Vec<Submessage>,
}

impl MessageBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn dst_submessage(mut self, endianness: Endianness, guid_prefix: GuidPrefix) -> Self {
    self.submessages.push(Submessage {
      header: SubmessageHeader {
        kind: SubmessageKind::INFO_DST,
        flags: endianness_flag(endianness),
        content_length: InfoDestination::CONTENT_LENGTH as u16,
      },
      body: SubmessageBody::InfoDestination(InfoDestination { guid_prefix }),
    });
    self
  }

  /// Add a DATA submessage carrying `cache_change`.
  ///
  /// Samples disposing an instance carry the key hash and status info flags
  /// in inline QoS instead of a payload.
  pub fn data_msg(
    mut self,
    cache_change: &CacheChange,
    reader_entity_id: EntityId,
    writer_guid: GUID,
    endianness: Endianness,
  ) -> Self {
    let (inline_qos, serialized_payload) = match cache_change.kind {
      ChangeKind::Alive => (None, Some(cache_change.payload.clone())),
      _ => {
        let mut param_list = ParameterList::new();
        param_list.push(Parameter::new(
          ParameterId::PID_KEY_HASH,
          cache_change.instance_key.to_vec(),
        ));
        let (disposed, unregistered) = match cache_change.kind {
          ChangeKind::NotAliveDisposed => (true, false),
          ChangeKind::NotAliveUnregistered => (false, true),
          _ => (true, true),
        };
        param_list.push(Parameter::status_info(disposed, unregistered));
        (Some(param_list), None::<Bytes>)
      }
    };

    let data = Data {
      reader_id: reader_entity_id,
      writer_id: writer_guid.entity_id,
      writer_sn: cache_change.sequence_number,
      inline_qos,
      serialized_payload,
    };
    let flags = data.flags(endianness);
    let content_length = data.content_length() as u16;

    self.submessages.push(Submessage {
      header: SubmessageHeader {
        kind: SubmessageKind::DATA,
        flags,
        content_length,
      },
      body: SubmessageBody::Data(data),
    });
    self
  }

  #[allow(clippy::too_many_arguments)]
  pub fn heartbeat_msg(
    mut self,
    writer_entity_id: EntityId,
    reader_entity_id: EntityId,
    first_sn: SequenceNumber,
    last_sn: SequenceNumber,
    count: i32,
    endianness: Endianness,
    final_flag: bool,
    liveliness_flag: bool,
  ) -> Self {
    let mut flags = endianness_flag(endianness);
    if final_flag {
      flags |= HeartbeatFlags::Final as u8;
    }
    if liveliness_flag {
      flags |= HeartbeatFlags::Liveliness as u8;
    }
    self.submessages.push(Submessage {
      header: SubmessageHeader {
        kind: SubmessageKind::HEARTBEAT,
        flags,
        content_length: Heartbeat::CONTENT_LENGTH as u16,
      },
      body: SubmessageBody::Heartbeat(Heartbeat {
        reader_id: reader_entity_id,
        writer_id: writer_entity_id,
        first_sn,
        last_sn,
        count,
      }),
    });
    self
  }

  pub fn add_header_and_build(self, guid_prefix: GuidPrefix) -> Message {
    Message {
      header: Header::new(guid_prefix),
      submessages: self.submessages,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::structure::guid::GuidPrefix;

  fn change(kind: ChangeKind) -> CacheChange {
    let writer = GUID::new(
      GuidPrefix::new([7; 12]),
      EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER,
    );
    let mut change = CacheChange::new(writer, SequenceNumber::new(3), kind);
    change.instance_key = writer.participant_guid().to_bytes();
    change.payload = Bytes::from_static(&[0, 3, 0, 0, 1, 2, 3, 4]);
    change
  }

  #[test]
  fn alive_data_message_serializes() {
    let cc = change(ChangeKind::Alive);
    let message = MessageBuilder::new()
      .dst_submessage(Endianness::LittleEndian, GuidPrefix::new([9; 12]))
      .data_msg(
        &cc,
        EntityId::SPDP_BUILTIN_PARTICIPANT_READER,
        cc.writer_guid,
        Endianness::LittleEndian,
      )
      .add_header_and_build(cc.writer_guid.prefix);

    let bytes = message.write_to_vec().unwrap();
    assert_eq!(&bytes[..4], b"RTPS");
    // header + info_dst (4 + 12) + data submessage
    assert_eq!(bytes.len(), 20 + 16 + 4 + 20 + cc.payload.len());
    // INFO_DST kind directly after the message header
    assert_eq!(bytes[20], 0x0e);
  }

  #[test]
  fn dispose_data_message_has_inline_qos_and_no_payload() {
    let cc = change(ChangeKind::NotAliveDisposedUnregistered);
    let message = MessageBuilder::new()
      .data_msg(
        &cc,
        EntityId::SPDP_BUILTIN_PARTICIPANT_READER,
        cc.writer_guid,
        Endianness::LittleEndian,
      )
      .add_header_and_build(cc.writer_guid.prefix);

    match &message.submessages[0].body {
      SubmessageBody::Data(d) => {
        assert!(d.serialized_payload.is_none());
        let inline_qos = d.inline_qos.as_ref().unwrap();
        assert!(inline_qos.find(ParameterId::PID_KEY_HASH).is_some());
        let status = inline_qos.find(ParameterId::PID_STATUS_INFO).unwrap();
        assert_eq!(status.value[3], 0x03); // disposed | unregistered
      }
      other => panic!("expected DATA, got {:?}", other),
    }
  }
}
