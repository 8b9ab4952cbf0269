use std::{convert::TryFrom, ops::Div, time::Duration as StdDuration};

use speedy::{Readable, Writable};

/// RTPS Duration: seconds and NTP-style 2^-32 fraction, as it appears on the
/// wire in lease duration parameters.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Readable, Writable)]
pub struct Duration {
  seconds: i32,
  fraction: u32,
}

impl Duration {
  pub const ZERO: Self = Self {
    seconds: 0,
    fraction: 0,
  };
  pub const INVALID: Self = Self {
    seconds: -1,
    fraction: 0xffff_ffff,
  };
  pub const INFINITE: Self = Self {
    seconds: 0x7fff_ffff,
    fraction: 0xffff_ffff,
  };

  pub const fn from_secs(seconds: i32) -> Self {
    Self {
      seconds,
      fraction: 0,
    }
  }

  pub fn from_millis(millis: i64) -> Self {
    Self {
      seconds: (millis / 1000) as i32,
      fraction: (((millis % 1000) << 32) / 1000) as u32,
    }
  }

  pub(crate) fn from_ticks(ticks: i64) -> Self {
    Self {
      seconds: (ticks >> 32) as i32,
      fraction: ticks as u32,
    }
  }

  pub(crate) fn to_ticks(self) -> i64 {
    (i64::from(self.seconds) << 32) | i64::from(self.fraction)
  }

  pub fn is_infinite(&self) -> bool {
    *self == Self::INFINITE
  }
}

impl From<StdDuration> for Duration {
  fn from(duration: StdDuration) -> Self {
    Self {
      seconds: i32::try_from(duration.as_secs()).unwrap_or(i32::MAX),
      fraction: ((u64::from(duration.subsec_nanos()) << 32) / 1_000_000_000) as u32,
    }
  }
}

impl From<Duration> for StdDuration {
  fn from(duration: Duration) -> Self {
    if duration.seconds < 0 {
      return StdDuration::from_secs(0);
    }
    let nanos = (u64::from(duration.fraction) * 1_000_000_000) >> 32;
    StdDuration::new(duration.seconds as u64, nanos as u32)
  }
}

impl Div<i64> for Duration {
  type Output = Self;

  fn div(self, rhs: i64) -> Self {
    Self::from_ticks(self.to_ticks() / rhs)
  }
}

#[cfg(test)]
mod tests {
  use speedy::{Endianness, Writable};

  use super::*;

  #[test]
  fn duration_wire_format() {
    let le = Duration::INFINITE
      .write_to_vec_with_ctx(Endianness::LittleEndian)
      .unwrap();
    assert_eq!(le, vec![0xff, 0xff, 0xff, 0x7f, 0xff, 0xff, 0xff, 0xff]);
    let be = Duration::ZERO
      .write_to_vec_with_ctx(Endianness::BigEndian)
      .unwrap();
    assert_eq!(be, vec![0; 8]);
  }

  #[test]
  fn std_duration_round_trip() {
    let d = Duration::from(StdDuration::from_millis(1500));
    let std = StdDuration::from(d);
    assert!(std >= StdDuration::from_millis(1499) && std <= StdDuration::from_millis(1500));
  }

  #[test]
  fn ordering_follows_magnitude() {
    assert!(Duration::from_secs(3) < Duration::from_secs(20));
    assert!(Duration::from_millis(100) < Duration::INFINITE);
  }
}
