use speedy::{Context, Readable, Reader, Writable, Writer};

use crate::structure::guid::GuidPrefix;

/// The "RTPS" magic at the start of every message.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProtocolId {
  bytes: [u8; 4],
}

impl ProtocolId {
  pub const PROTOCOL_RTPS: Self = Self {
    bytes: [b'R', b'T', b'P', b'S'],
  };
}

impl Default for ProtocolId {
  fn default() -> Self {
    Self::PROTOCOL_RTPS
  }
}

impl<'a, C: Context> Readable<'a, C> for ProtocolId {
  #[inline]
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let mut protocol_id = Self::default();
    for b in protocol_id.bytes.iter_mut() {
      *b = reader.read_u8()?;
    }
    Ok(protocol_id)
  }
}

impl<C: Context> Writable<C> for ProtocolId {
  #[inline]
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    for b in &self.bytes {
      writer.write_u8(*b)?;
    }
    Ok(())
  }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Readable, Writable)]
pub struct ProtocolVersion {
  pub major: u8,
  pub minor: u8,
}

impl ProtocolVersion {
  pub const PROTOCOLVERSION_2_3: Self = Self { major: 2, minor: 3 };
  pub const THIS_IMPLEMENTATION: Self = Self::PROTOCOLVERSION_2_3;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Readable, Writable)]
pub struct VendorId {
  pub bytes: [u8; 2],
}

impl VendorId {
  pub const UNKNOWN: Self = Self { bytes: [0x00; 2] };
  pub const THIS_IMPLEMENTATION: Self = Self { bytes: [0x01, 0x18] };
}

/// RTPS message header: 20 bytes, endianness-insensitive.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Readable, Writable)]
pub struct Header {
  pub protocol_id: ProtocolId,
  pub protocol_version: ProtocolVersion,
  pub vendor_id: VendorId,
  pub guid_prefix: GuidPrefix,
}

impl Header {
  pub fn new(guid_prefix: GuidPrefix) -> Self {
    Self {
      protocol_id: ProtocolId::PROTOCOL_RTPS,
      protocol_version: ProtocolVersion::THIS_IMPLEMENTATION,
      vendor_id: VendorId::THIS_IMPLEMENTATION,
      guid_prefix,
    }
  }
}
