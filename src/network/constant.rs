// RTPS well-known port formulas, RTPS spec v2.3 Section 9.6.1.
const PB: u16 = 7400;
const DG: u16 = 250;
const PG: u16 = 2;

const D0: u16 = 0;
const D1: u16 = 10;
const D2: u16 = 1;
const D3: u16 = 11;

pub fn spdp_well_known_multicast_port(domain_id: u16) -> u16 {
  PB + DG * domain_id + D0
}

pub fn spdp_well_known_unicast_port(domain_id: u16, participant_id: u16) -> u16 {
  PB + DG * domain_id + D1 + PG * participant_id
}

pub fn user_traffic_multicast_port(domain_id: u16) -> u16 {
  PB + DG * domain_id + D2
}

pub fn user_traffic_unicast_port(domain_id: u16, participant_id: u16) -> u16 {
  PB + DG * domain_id + D3 + PG * participant_id
}

/// Port a discovery server listens on when the server list entry does not
/// name one.
pub const DEFAULT_DISCOVERY_SERVER_PORT: u16 = 11811;

/// GUID prefix template of servers addressed by id. Octet 2 is overwritten
/// with the server id from the list position.
pub const DISCOVERY_SERVER_GUID_PREFIX_TEMPLATE: [u8; 12] = [
  0x44, 0x53, 0x00, 0x5f, 0x45, 0x50, 0x52, 0x4f, 0x53, 0x49, 0x4d, 0x41,
];

/// Highest server id addressable through the prefix template.
pub const MAX_DISCOVERY_SERVER_ID: u16 = 255;
