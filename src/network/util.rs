use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::structure::locator::Locator;

pub fn get_local_multicast_locators(port: u16) -> Vec<Locator> {
  let saddr = SocketAddr::new("239.255.0.1".parse().unwrap(), port);
  vec![Locator::from(saddr)]
}

pub fn get_local_unicast_locators(port: u16) -> Vec<Locator> {
  match if_addrs::get_if_addrs() {
    Ok(interfaces) => interfaces
      .iter()
      .filter(|interface| !interface.is_loopback())
      .map(|interface| Locator::from(SocketAddr::new(interface.ip(), port)))
      .collect(),
    Err(e) => {
      error!("cannot enumerate local network interfaces: {:?}", e);
      vec![]
    }
  }
}

/// Resolve a host name to its first IPv4 address. Dotted-quad input parses
/// without a lookup.
pub fn resolve_ipv4(host: &str) -> Option<Ipv4Addr> {
  if let Ok(ip) = host.parse::<Ipv4Addr>() {
    return Some(ip);
  }
  // port is irrelevant, to_socket_addrs just needs one
  match (host, 0u16).to_socket_addrs() {
    Ok(addresses) => addresses.filter_map(|a| match a {
      SocketAddr::V4(v4) => Some(*v4.ip()),
      SocketAddr::V6(_) => None,
    }).next(),
    Err(e) => {
      debug!("DNS resolution of {:?} failed: {:?}", host, e);
      None
    }
  }
}

/// Rewrite the "any" address to loopback. A remote server cannot be reached
/// on `0.0.0.0`; an entry like that means the local host.
pub fn normalize_remote_locator(locator: Locator) -> Locator {
  if locator.is_any() {
    let port = locator.port as u16;
    Locator::udp_v4(Ipv4Addr::LOCALHOST, port)
  } else {
    locator
  }
}
