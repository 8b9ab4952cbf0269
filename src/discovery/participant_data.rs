use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use speedy::{Endianness, Readable, Writable};

use crate::{
  error::{Error, Result},
  messages::{
    header::{ProtocolVersion, VendorId},
    parameter_list::{Parameter, ParameterList},
  },
  rtps::constant::PARTICIPANT_LEASE_DURATION_DEFAULT,
  structure::{
    duration::Duration,
    guid::GUID,
    locator::Locator,
    parameter_id::ParameterId,
  },
};

/// `available_builtin_endpoints` bit assignments,
/// RTPS spec v2.3 Section 9.3.2, Table 9.2.
pub mod builtin_endpoint_set {
  pub const PARTICIPANT_ANNOUNCER: u32 = 0x0000_0001;
  pub const PARTICIPANT_DETECTOR: u32 = 0x0000_0002;
  pub const PUBLICATIONS_ANNOUNCER: u32 = 0x0000_0004;
  pub const PUBLICATIONS_DETECTOR: u32 = 0x0000_0008;
  pub const SUBSCRIPTIONS_ANNOUNCER: u32 = 0x0000_0010;
  pub const SUBSCRIPTIONS_DETECTOR: u32 = 0x0000_0020;
}

/// Property announcing the discovery-server protocol revision a participant
/// speaks. Appended to every client's advertised properties.
pub const DS_VERSION_PROPERTY_NAME: &str = "dds.discovery_server_version";
pub const DS_VERSION_CURRENT: &str = "2.0";

const PL_CDR_LE: [u8; 2] = [0x00, 0x03];

/// Everything a participant announces about itself in a `DATA(p)` sample.
///
/// Owned by the proxy store once admitted; the engine mutates it in place
/// when a fresher sample for the same GUID arrives.
#[derive(Clone, Debug, PartialEq)]
pub struct ParticipantProxyData {
  pub guid: GUID,
  pub protocol_version: ProtocolVersion,
  pub vendor_id: VendorId,
  pub lease_duration: Duration,
  pub available_builtin_endpoints: u32,
  pub metatraffic_unicast_locators: Vec<Locator>,
  pub metatraffic_multicast_locators: Vec<Locator>,
  pub default_unicast_locators: Vec<Locator>,
  pub default_multicast_locators: Vec<Locator>,
  pub properties: Vec<(String, String)>,
  pub persistence_guid: Option<GUID>,
  pub is_alive: bool,
}

impl ParticipantProxyData {
  pub fn new(guid: GUID) -> Self {
    Self {
      guid,
      protocol_version: ProtocolVersion::THIS_IMPLEMENTATION,
      vendor_id: VendorId::THIS_IMPLEMENTATION,
      lease_duration: Duration::from(PARTICIPANT_LEASE_DURATION_DEFAULT),
      available_builtin_endpoints: 0,
      metatraffic_unicast_locators: Vec::new(),
      metatraffic_multicast_locators: Vec::new(),
      default_unicast_locators: Vec::new(),
      default_multicast_locators: Vec::new(),
      properties: Vec::new(),
      persistence_guid: None,
      is_alive: true,
    }
  }

  /// RTPS instance key of this participant's `DATA(p)` samples.
  pub fn key(&self) -> [u8; 16] {
    self.guid.participant_guid().to_bytes()
  }

  pub fn ds_version(&self) -> Option<&str> {
    self
      .properties
      .iter()
      .find(|(name, _)| name == DS_VERSION_PROPERTY_NAME)
      .map(|(_, value)| value.as_str())
  }

  /// All metatraffic locators, unicast first.
  pub fn metatraffic_locators(&self) -> Vec<Locator> {
    let mut locators = self.metatraffic_unicast_locators.clone();
    locators.extend(self.metatraffic_multicast_locators.iter().copied());
    locators
  }

  /// Serialize to a PL_CDR_LE payload as carried by `DATA(p)`.
  pub fn to_payload(&self) -> Result<Bytes> {
    let le = Endianness::LittleEndian;
    let mut list = ParameterList::new();

    let as_vec = |r: std::result::Result<Vec<u8>, speedy::Error>| {
      r.map_err(|e| Error::serialization(e.to_string()))
    };

    list.push(Parameter::new(
      ParameterId::PID_PROTOCOL_VERSION,
      vec![self.protocol_version.major, self.protocol_version.minor, 0, 0],
    ));
    list.push(Parameter::new(
      ParameterId::PID_VENDOR_ID,
      vec![self.vendor_id.bytes[0], self.vendor_id.bytes[1], 0, 0],
    ));
    list.push(Parameter::new(
      ParameterId::PID_PARTICIPANT_GUID,
      as_vec(self.guid.write_to_vec_with_ctx(le))?,
    ));
    list.push(Parameter::new(
      ParameterId::PID_PARTICIPANT_LEASE_DURATION,
      as_vec(self.lease_duration.write_to_vec_with_ctx(le))?,
    ));
    let mut endpoint_set = Vec::with_capacity(4);
    endpoint_set.write_u32::<LittleEndian>(self.available_builtin_endpoints)?;
    list.push(Parameter::new(
      ParameterId::PID_BUILTIN_ENDPOINT_SET,
      endpoint_set,
    ));

    let locator_params = [
      (
        ParameterId::PID_METATRAFFIC_UNICAST_LOCATOR,
        &self.metatraffic_unicast_locators,
      ),
      (
        ParameterId::PID_METATRAFFIC_MULTICAST_LOCATOR,
        &self.metatraffic_multicast_locators,
      ),
      (
        ParameterId::PID_DEFAULT_UNICAST_LOCATOR,
        &self.default_unicast_locators,
      ),
      (
        ParameterId::PID_DEFAULT_MULTICAST_LOCATOR,
        &self.default_multicast_locators,
      ),
    ];
    for (pid, locators) in &locator_params {
      for locator in locators.iter() {
        list.push(Parameter::new(
          *pid,
          as_vec(locator.write_to_vec_with_ctx(le))?,
        ));
      }
    }

    if !self.properties.is_empty() {
      list.push(Parameter::new(
        ParameterId::PID_PROPERTY_LIST,
        encode_properties(&self.properties)?,
      ));
    }
    if let Some(persistence_guid) = &self.persistence_guid {
      list.push(Parameter::new(
        ParameterId::PID_PERSISTENCE_GUID,
        as_vec(persistence_guid.write_to_vec_with_ctx(le))?,
      ));
    }

    let mut payload = Vec::with_capacity(4 + list.serialized_len());
    payload.extend_from_slice(&PL_CDR_LE);
    payload.extend_from_slice(&[0, 0]); // encapsulation options
    payload.extend_from_slice(&as_vec(list.write_to_vec_with_ctx(le))?);
    Ok(Bytes::from(payload))
  }

  /// Parse a `DATA(p)` payload.
  pub fn from_payload(payload: &[u8]) -> Result<Self> {
    if payload.len() < 4 {
      return Err(Error::serialization("participant data payload too short"));
    }
    if payload[..2] != PL_CDR_LE {
      return Err(Error::serialization(format!(
        "unsupported representation identifier {:02x}{:02x}",
        payload[0], payload[1]
      )));
    }

    let le = Endianness::LittleEndian;
    let list = ParameterList::read_from_buffer_with_ctx(le, &payload[4..])
      .map_err(|e| Error::serialization(format!("parameter list: {}", e)))?;

    let guid = match list.find(ParameterId::PID_PARTICIPANT_GUID) {
      Some(p) => GUID::read_from_buffer_with_ctx(le, &p.value)
        .map_err(|e| Error::serialization(format!("participant GUID: {}", e)))?,
      None => return Err(Error::serialization("participant data without GUID")),
    };

    let mut data = Self::new(guid);

    if let Some(p) = list.find(ParameterId::PID_PROTOCOL_VERSION) {
      if p.value.len() >= 2 {
        data.protocol_version = ProtocolVersion {
          major: p.value[0],
          minor: p.value[1],
        };
      }
    }
    if let Some(p) = list.find(ParameterId::PID_VENDOR_ID) {
      if p.value.len() >= 2 {
        data.vendor_id = VendorId {
          bytes: [p.value[0], p.value[1]],
        };
      }
    }
    if let Some(p) = list.find(ParameterId::PID_PARTICIPANT_LEASE_DURATION) {
      data.lease_duration = Duration::read_from_buffer_with_ctx(le, &p.value)
        .map_err(|e| Error::serialization(format!("lease duration: {}", e)))?;
    }
    if let Some(p) = list.find(ParameterId::PID_BUILTIN_ENDPOINT_SET) {
      data.available_builtin_endpoints = Cursor::new(&p.value).read_u32::<LittleEndian>()?;
    }

    for p in list.find_all(ParameterId::PID_METATRAFFIC_UNICAST_LOCATOR) {
      data
        .metatraffic_unicast_locators
        .push(read_locator(&p.value)?);
    }
    for p in list.find_all(ParameterId::PID_METATRAFFIC_MULTICAST_LOCATOR) {
      data
        .metatraffic_multicast_locators
        .push(read_locator(&p.value)?);
    }
    for p in list.find_all(ParameterId::PID_DEFAULT_UNICAST_LOCATOR) {
      data.default_unicast_locators.push(read_locator(&p.value)?);
    }
    for p in list.find_all(ParameterId::PID_DEFAULT_MULTICAST_LOCATOR) {
      data
        .default_multicast_locators
        .push(read_locator(&p.value)?);
    }

    if let Some(p) = list.find(ParameterId::PID_PROPERTY_LIST) {
      data.properties = decode_properties(&p.value)?;
    }
    if let Some(p) = list.find(ParameterId::PID_PERSISTENCE_GUID) {
      data.persistence_guid = Some(
        GUID::read_from_buffer_with_ctx(le, &p.value)
          .map_err(|e| Error::serialization(format!("persistence GUID: {}", e)))?,
      );
    }

    Ok(data)
  }
}

fn read_locator(value: &[u8]) -> Result<Locator> {
  Locator::read_from_buffer_with_ctx(Endianness::LittleEndian, value)
    .map_err(|e| Error::serialization(format!("locator: {}", e)))
}

// CDR sequence<Property>: element count, then each property as two
// nul-terminated strings, everything 4-aligned.

fn encode_properties(properties: &[(String, String)]) -> Result<Vec<u8>> {
  let mut out = Vec::new();
  out.write_u32::<LittleEndian>(properties.len() as u32)?;
  for (name, value) in properties {
    encode_string(&mut out, name)?;
    encode_string(&mut out, value)?;
  }
  Ok(out)
}

fn encode_string(out: &mut Vec<u8>, s: &str) -> Result<()> {
  out.write_u32::<LittleEndian>((s.len() + 1) as u32)?;
  out.extend_from_slice(s.as_bytes());
  out.push(0);
  while out.len() % 4 != 0 {
    out.push(0);
  }
  Ok(())
}

fn decode_properties(value: &[u8]) -> Result<Vec<(String, String)>> {
  let mut cursor = Cursor::new(value);
  let count = cursor.read_u32::<LittleEndian>()?;
  let mut properties = Vec::with_capacity(count as usize);
  for _ in 0..count {
    let name = decode_string(&mut cursor)?;
    let value = decode_string(&mut cursor)?;
    properties.push((name, value));
  }
  Ok(properties)
}

fn decode_string(cursor: &mut Cursor<&[u8]>) -> Result<String> {
  let length = cursor.read_u32::<LittleEndian>()? as usize;
  if length == 0 {
    return Err(Error::serialization("zero-length CDR string"));
  }
  let mut buffer = vec![0u8; length];
  cursor.read_exact(&mut buffer)?;
  buffer.pop(); // trailing nul
  // skip alignment padding
  let position = cursor.position();
  let aligned = (position + 3) & !3;
  cursor.set_position(aligned);
  String::from_utf8(buffer).map_err(|e| Error::serialization(format!("CDR string: {}", e)))
}

#[cfg(test)]
mod tests {
  use std::net::Ipv4Addr;

  use super::*;
  use crate::structure::guid::{EntityId, GuidPrefix};

  fn sample_data() -> ParticipantProxyData {
    let guid = GUID::new(GuidPrefix::new([3; 12]), EntityId::PARTICIPANT);
    let mut data = ParticipantProxyData::new(guid);
    data.lease_duration = Duration::from_secs(12);
    data.available_builtin_endpoints = builtin_endpoint_set::PUBLICATIONS_ANNOUNCER
      | builtin_endpoint_set::SUBSCRIPTIONS_DETECTOR;
    data
      .metatraffic_unicast_locators
      .push(Locator::udp_v4(Ipv4Addr::new(10, 0, 0, 9), 11811));
    data
      .metatraffic_multicast_locators
      .push(Locator::udp_v4(Ipv4Addr::new(239, 255, 0, 1), 7400));
    data.properties.push((
      DS_VERSION_PROPERTY_NAME.to_string(),
      DS_VERSION_CURRENT.to_string(),
    ));
    data.persistence_guid = Some(guid);
    data
  }

  #[test]
  fn payload_round_trip() {
    let data = sample_data();
    let payload = data.to_payload().unwrap();
    assert_eq!(&payload[..2], &PL_CDR_LE);

    let decoded = ParticipantProxyData::from_payload(&payload).unwrap();
    assert_eq!(decoded, data);
    assert_eq!(decoded.ds_version(), Some(DS_VERSION_CURRENT));
  }

  #[test]
  fn missing_guid_is_an_error() {
    // encapsulation + immediate sentinel
    let payload = [0x00, 0x03, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
    assert!(ParticipantProxyData::from_payload(&payload).is_err());
  }

  #[test]
  fn big_endian_representation_is_rejected() {
    let payload = [0x00, 0x02, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
    assert!(ParticipantProxyData::from_payload(&payload).is_err());
  }
}
