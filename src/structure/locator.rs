use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use speedy::{Context, Readable, Reader, Writable, Writer};

/// Transport kind discriminator of a [`Locator`].
#[derive(Copy, Clone, Debug, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct LocatorKind {
  value: i32,
}

impl LocatorKind {
  pub const INVALID: Self = Self { value: -1 };
  pub const RESERVED: Self = Self { value: 0 };
  pub const UDP_V4: Self = Self { value: 1 };
  pub const UDP_V6: Self = Self { value: 2 };
}

impl<'a, C: Context> Readable<'a, C> for LocatorKind {
  #[inline]
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    Ok(Self {
      value: reader.read_value()?,
    })
  }
}

impl<C: Context> Writable<C> for LocatorKind {
  #[inline]
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_value(&self.value)
  }
}

/// Transport-qualified network address: kind, port and a 16-byte address.
/// IPv4 addresses occupy the last four bytes.
#[derive(Copy, Clone, Debug, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct Locator {
  pub kind: LocatorKind,
  pub port: u32,
  pub address: [u8; 16],
}

impl Locator {
  pub const INVALID: Self = Self {
    kind: LocatorKind::INVALID,
    port: 0,
    address: [0x00; 16],
  };

  pub fn udp_v4(ip: Ipv4Addr, port: u16) -> Self {
    Self::from(SocketAddr::new(IpAddr::V4(ip), port))
  }

  pub fn is_udp_v4(&self) -> bool {
    self.kind == LocatorKind::UDP_V4
  }

  pub fn is_loopback(&self) -> bool {
    SocketAddr::from(*self).ip().is_loopback()
  }

  /// True for the "any" address (`0.0.0.0` / `::`), which is not reachable as
  /// a remote destination.
  pub fn is_any(&self) -> bool {
    match self.kind {
      LocatorKind::UDP_V4 => self.address[12..16] == [0, 0, 0, 0],
      LocatorKind::UDP_V6 => self.address == [0; 16],
      _ => false,
    }
  }
}

impl Default for Locator {
  fn default() -> Self {
    Self::INVALID
  }
}

impl From<SocketAddr> for Locator {
  fn from(socket_address: SocketAddr) -> Self {
    Self {
      kind: if socket_address.ip().is_ipv4() {
        LocatorKind::UDP_V4
      } else {
        LocatorKind::UDP_V6
      },
      port: u32::from(socket_address.port()),
      address: match socket_address.ip() {
        IpAddr::V4(ip4) => ip4.to_ipv6_compatible().octets(),
        IpAddr::V6(ip6) => ip6.octets(),
      },
    }
  }
}

impl From<Locator> for SocketAddr {
  fn from(locator: Locator) -> Self {
    match locator.kind {
      LocatorKind::UDP_V4 => SocketAddr::new(
        IpAddr::V4(Ipv4Addr::new(
          locator.address[12],
          locator.address[13],
          locator.address[14],
          locator.address[15],
        )),
        locator.port as u16,
      ),
      LocatorKind::UDP_V6 => SocketAddr::new(
        IpAddr::V6(Ipv6Addr::from(locator.address)),
        locator.port as u16,
      ),
      _ => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    }
  }
}

impl<'a, C: Context> Readable<'a, C> for Locator {
  #[inline]
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let mut locator = Self::default();
    locator.kind = reader.read_value()?;
    locator.port = reader.read_value()?;
    for b in locator.address.iter_mut() {
      *b = reader.read_u8()?;
    }
    Ok(locator)
  }
}

impl<C: Context> Writable<C> for Locator {
  #[inline]
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_value(&self.kind)?;
    writer.write_value(&self.port)?;
    for b in &self.address {
      writer.write_u8(*b)?;
    }
    Ok(())
  }
}
