use std::{io, net::SocketAddr};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use mio::net::UdpSocket;

use crate::structure::locator::Locator;

/// Fire-and-forget UDP sender bound to an ephemeral local port.
///
/// Sends never block and are never retried; all reliability sits in the
/// writer above. This is also the transport of the direct-send path, whose
/// semantics are explicitly best effort.
pub struct UdpSender {
  socket: UdpSocket,
}

impl UdpSender {
  pub fn new() -> io::Result<Self> {
    let any: SocketAddr = "0.0.0.0:0".parse().expect("static socket address");
    let socket = UdpSocket::bind(&any)?;
    Ok(Self { socket })
  }

  pub fn send_to_locators(&self, buffer: &[u8], locators: &[Locator]) {
    for locator in locators {
      if !locator.is_udp_v4() {
        trace!("skipping non-UDPv4 locator {:?}", locator);
        continue;
      }
      let address = SocketAddr::from(*locator);
      match self.socket.send_to(buffer, &address) {
        Ok(_bytes) => (),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
          debug!("send to {} would block, dropping", address)
        }
        Err(e) => debug!("unable to send to {}: {:?}", address, e),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::net::UdpSocket as StdUdpSocket;

  use super::*;

  #[test]
  fn sends_to_loopback_listener() {
    let listener = StdUdpSocket::bind("127.0.0.1:0").unwrap();
    listener
      .set_read_timeout(Some(std::time::Duration::from_secs(2)))
      .unwrap();
    let port = listener.local_addr().unwrap().port();

    let sender = UdpSender::new().unwrap();
    let locator = Locator::from(SocketAddr::new("127.0.0.1".parse().unwrap(), port));
    sender.send_to_locators(&[1, 2, 3, 4], &[locator]);

    let mut buffer = [0u8; 16];
    let (received, _from) = listener.recv_from(&mut buffer).unwrap();
    assert_eq!(&buffer[..received], &[1, 2, 3, 4]);
  }

  #[test]
  fn non_udp_v4_locators_are_skipped() {
    let sender = UdpSender::new().unwrap();
    // must not panic or error
    sender.send_to_locators(&[0], &[Locator::INVALID]);
  }
}
