use bytes::Bytes;
use enumflags2::{bitflags, BitFlags};
use speedy::{Context, Endianness, Writable, Writer};

use crate::{
  messages::parameter_list::ParameterList,
  structure::{
    guid::{EntityId, GuidPrefix},
    sequence_number::SequenceNumber,
  },
};

/// Submessage kind octet, RTPS spec v2.3 Table 8.13.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SubmessageKind {
  pub value: u8,
}

impl SubmessageKind {
  pub const ACKNACK: Self = Self { value: 0x06 };
  pub const HEARTBEAT: Self = Self { value: 0x07 };
  pub const GAP: Self = Self { value: 0x08 };
  pub const INFO_TS: Self = Self { value: 0x09 };
  pub const INFO_DST: Self = Self { value: 0x0e };
  pub const DATA: Self = Self { value: 0x15 };
  pub const DATA_FRAG: Self = Self { value: 0x16 };
}

impl<C: Context> Writable<C> for SubmessageKind {
  #[inline]
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_u8(self.value)
  }
}

#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataFlags {
  Endianness = 0b0000_0001,
  InlineQos = 0b0000_0010,
  Data = 0b0000_0100,
  Key = 0b0000_1000,
}

#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HeartbeatFlags {
  Endianness = 0b0000_0001,
  Final = 0b0000_0010,
  Liveliness = 0b0000_0100,
}

pub fn endianness_flag(endianness: Endianness) -> u8 {
  match endianness {
    Endianness::LittleEndian => 0x01,
    Endianness::BigEndian => 0x00,
  }
}

/// 4-byte header in front of every submessage.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SubmessageHeader {
  pub kind: SubmessageKind,
  pub flags: u8,
  pub content_length: u16,
}

impl<C: Context> Writable<C> for SubmessageHeader {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_value(&self.kind)?;
    writer.write_u8(self.flags)?;
    writer.write_u16(self.content_length)
  }
}

/// DATA submessage, serialization side. The inbound direction is handled by
/// the transport's message receiver, which feeds readers with decoded cache
/// changes instead of raw submessages.
#[derive(Clone, Debug)]
pub struct Data {
  pub reader_id: EntityId,
  pub writer_id: EntityId,
  pub writer_sn: SequenceNumber,
  pub inline_qos: Option<ParameterList>,
  pub serialized_payload: Option<Bytes>,
}

impl Data {
  /// Length of the submessage content, excluding the submessage header.
  pub fn content_length(&self) -> usize {
    // extraFlags + octetsToInlineQos + readerId + writerId + writerSN
    let mut length = 2 + 2 + 4 + 4 + 8;
    if let Some(inline_qos) = &self.inline_qos {
      length += inline_qos.serialized_len();
    }
    if let Some(payload) = &self.serialized_payload {
      length += payload.len();
    }
    length
  }

  pub fn flags(&self, endianness: Endianness) -> u8 {
    let mut flags = BitFlags::<DataFlags>::empty();
    if endianness == Endianness::LittleEndian {
      flags |= DataFlags::Endianness;
    }
    if self.inline_qos.is_some() {
      flags |= DataFlags::InlineQos;
    }
    if self.serialized_payload.is_some() {
      flags |= DataFlags::Data;
    }
    flags.bits()
  }
}

impl<C: Context> Writable<C> for Data {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_u16(0)?; // extraFlags
    writer.write_u16(16)?; // octetsToInlineQos: readerId + writerId + writerSN
    writer.write_value(&self.reader_id)?;
    writer.write_value(&self.writer_id)?;
    writer.write_value(&self.writer_sn)?;
    if let Some(inline_qos) = &self.inline_qos {
      writer.write_value(inline_qos)?;
    }
    if let Some(payload) = &self.serialized_payload {
      writer.write_bytes(payload)?;
    }
    Ok(())
  }
}

/// INFO_DST submessage: names the destination participant of what follows.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Writable)]
pub struct InfoDestination {
  pub guid_prefix: GuidPrefix,
}

impl InfoDestination {
  pub const CONTENT_LENGTH: usize = 12;
}

/// HEARTBEAT submessage, serialization side.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Writable)]
pub struct Heartbeat {
  pub reader_id: EntityId,
  pub writer_id: EntityId,
  pub first_sn: SequenceNumber,
  pub last_sn: SequenceNumber,
  pub count: i32,
}

impl Heartbeat {
  pub const CONTENT_LENGTH: usize = 4 + 4 + 8 + 8 + 4;
}

/// Decoded ACKNACK state produced by the stateful reader for the transport
/// to serialize and send: everything below `base` is acknowledged, the
/// listed sequence numbers are requested again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AckNackState {
  pub reader_id: EntityId,
  pub writer_id: EntityId,
  pub base: SequenceNumber,
  pub missing: Vec<SequenceNumber>,
  pub count: i32,
}

#[cfg(test)]
mod tests {
  use speedy::Writable;

  use super::*;

  #[test]
  fn data_content_length_matches_serialization() {
    let data = Data {
      reader_id: EntityId::SPDP_BUILTIN_PARTICIPANT_READER,
      writer_id: EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER,
      writer_sn: SequenceNumber::new(1),
      inline_qos: None,
      serialized_payload: Some(Bytes::from_static(&[1, 2, 3, 4])),
    };
    let bytes = data.write_to_vec_with_ctx(Endianness::LittleEndian).unwrap();
    assert_eq!(bytes.len(), data.content_length());
  }

  #[test]
  fn data_flags_reflect_contents() {
    let data = Data {
      reader_id: EntityId::UNKNOWN,
      writer_id: EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER,
      writer_sn: SequenceNumber::new(2),
      inline_qos: Some(ParameterList::new()),
      serialized_payload: None,
    };
    let flags = data.flags(Endianness::LittleEndian);
    assert_eq!(flags & 0x01, 0x01); // little-endian
    assert_eq!(flags & 0x02, 0x02); // inline qos present
    assert_eq!(flags & 0x04, 0x00); // no payload
  }
}
