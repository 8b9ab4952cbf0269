use std::net::Ipv4Addr;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use regex::Regex;

use crate::{
  error::{Error, Result},
  network::{
    constant::{
      DEFAULT_DISCOVERY_SERVER_PORT, DISCOVERY_SERVER_GUID_PREFIX_TEMPLATE,
      MAX_DISCOVERY_SERVER_ID,
    },
    util::{normalize_remote_locator, resolve_ipv4},
  },
  structure::{
    guid::{EntityId, GuidPrefix, GUID},
    locator::Locator,
  },
};

/// Environment variable listing the discovery servers of a client.
pub const DISCOVERY_SERVER_ENV: &str = "ROS_DISCOVERY_SERVER";

/// One configured discovery server: its well-known GUID prefix, where to
/// reach its PDP endpoints, and a handle to its proxy once discovered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteServer {
  pub guid_prefix: GuidPrefix,
  pub metatraffic_unicast_locators: Vec<Locator>,
  pub metatraffic_multicast_locators: Vec<Locator>,
  /// Key of the server's entry in the proxy store while it is discovered.
  /// Cleared when the server is lost; never an owning handle.
  pub proxy: Option<GuidPrefix>,
}

impl RemoteServer {
  pub fn new(guid_prefix: GuidPrefix, unicast_locators: Vec<Locator>) -> Self {
    Self {
      guid_prefix,
      metatraffic_unicast_locators: unicast_locators,
      metatraffic_multicast_locators: Vec::new(),
      proxy: None,
    }
  }

  pub fn participant_guid(&self) -> GUID {
    GUID::new(self.guid_prefix, EntityId::PARTICIPANT)
  }

  pub fn pdp_writer_guid(&self) -> GUID {
    GUID::new(self.guid_prefix, EntityId::SPDP_BUILTIN_PARTICIPANT_WRITER)
  }

  pub fn pdp_reader_guid(&self) -> GUID {
    GUID::new(self.guid_prefix, EntityId::SPDP_BUILTIN_PARTICIPANT_READER)
  }

  /// The list position this server was configured at.
  pub fn server_id(&self) -> u16 {
    u16::from(self.guid_prefix.bytes[2])
  }
}

/// GUID prefix of the server at list position `server_id`: the fixed
/// template with octet 2 replaced by the id.
pub fn server_guid_prefix(server_id: u16) -> Result<GuidPrefix> {
  if server_id > MAX_DISCOVERY_SERVER_ID {
    return Err(Error::config(
      "the maximum number of default discovery servers has been reached",
    ));
  }
  let mut bytes = DISCOVERY_SERVER_GUID_PREFIX_TEMPLATE;
  bytes[2] = server_id as u8;
  Ok(GuidPrefix::new(bytes))
}

/// Read the server list from `ROS_DISCOVERY_SERVER`.
pub fn load_environment_server_info() -> Result<Vec<RemoteServer>> {
  match std::env::var(DISCOVERY_SERVER_ENV) {
    Ok(list) => parse_server_list(&list),
    Err(_) => Err(Error::config(format!(
      "{} is not set",
      DISCOVERY_SERVER_ENV
    ))),
  }
}

/// Parse a semicolon-separated list of `address[:port]` entries.
///
/// Empty slots consume a server id without producing an entry, so
/// `"a;;b"` configures servers 0 and 2. Host names are resolved through
/// DNS; the "any" address is rewritten to loopback.
pub fn parse_server_list(list: &str) -> Result<Vec<RemoteServer>> {
  let slot_pattern = Regex::new(r"([^;]*);?").expect("static regex");
  let address_pattern = Regex::new(r"^([A-Za-z0-9-.]+)?:?(\d+)?$").expect("static regex");

  let mut servers = Vec::new();

  for (server_id, slot) in slot_pattern.captures_iter(list).enumerate() {
    let entry = slot.get(1).map_or("", |m| m.as_str());
    if entry.is_empty() {
      // intentionally empty slot: skip this server id
      continue;
    }

    let captures = address_pattern.captures(entry).ok_or_else(|| {
      Error::config(format!("wrong locator passed into the server list: {}", entry))
    })?;

    let host = captures.get(1).map_or("", |m| m.as_str());
    let ip = resolve_ipv4(host).ok_or_else(|| {
      Error::config(format!("wrong IPv4 address passed into the server list: {}", host))
    })?;

    let port = match captures.get(2) {
      None => DEFAULT_DISCOVERY_SERVER_PORT,
      Some(m) => {
        let port: u32 = m
          .as_str()
          .parse()
          .map_err(|_| Error::config(format!("wrong UDP port passed into the server list: {}", m.as_str())))?;
        if port > u32::from(u16::MAX) {
          return Err(Error::config(format!(
            "too large UDP port passed into the server list: {}",
            port
          )));
        }
        if port == 0 {
          return Err(Error::config("wrong UDP port passed into the server list: 0"));
        }
        port as u16
      }
    };

    let guid_prefix = server_guid_prefix(server_id as u16)?;
    let locator = normalize_remote_locator(Locator::udp_v4(ip, port));
    servers.push(RemoteServer::new(guid_prefix, vec![locator]));
  }

  if servers.is_empty() {
    return Err(Error::config("no default server locators were provided"));
  }
  Ok(servers)
}

/// Format a server list back into the environment-string form, preserving
/// empty slots, such that re-parsing yields an identical list.
pub fn format_server_list(servers: &[RemoteServer]) -> String {
  let mut slots: Vec<String> = Vec::new();
  for server in servers {
    let id = usize::from(server.server_id());
    while slots.len() < id {
      slots.push(String::new());
    }
    let slot = match server.metatraffic_unicast_locators.first() {
      Some(locator) => {
        let address = std::net::SocketAddr::from(*locator);
        format!("{}:{}", address.ip(), address.port())
      }
      None => String::new(),
    };
    slots.push(slot);
  }
  slots.join(";")
}
