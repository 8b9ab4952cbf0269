use std::ops::{Add, Sub};

use speedy::{Readable, Writable};

use crate::structure::duration::Duration;

/// RTPS Time_t: seconds since the UNIX epoch plus a 2^-32 fraction.
/// Used for source and reception timestamps on cache changes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Readable, Writable)]
pub struct Timestamp {
  seconds: u32,
  fraction: u32,
}

impl Timestamp {
  pub const ZERO: Self = Self {
    seconds: 0,
    fraction: 0,
  };
  pub const INVALID: Self = Self {
    seconds: 0xffff_ffff,
    fraction: 0xffff_ffff,
  };
  pub const INFINITE: Self = Self {
    seconds: 0xffff_ffff,
    fraction: 0xffff_fffe,
  };

  pub fn now() -> Self {
    Self::from_nanos(chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64)
  }

  fn from_nanos(nanos_since_unix_epoch: u64) -> Self {
    Self {
      seconds: (nanos_since_unix_epoch / 1_000_000_000) as u32,
      fraction: (((nanos_since_unix_epoch % 1_000_000_000) << 32) / 1_000_000_000) as u32,
    }
  }

  fn to_ticks(self) -> u64 {
    (u64::from(self.seconds) << 32) | u64::from(self.fraction)
  }

  fn from_ticks(ticks: u64) -> Self {
    Self {
      seconds: (ticks >> 32) as u32,
      fraction: ticks as u32,
    }
  }

  pub fn duration_since(&self, since: Self) -> Duration {
    *self - since
  }
}

impl Sub for Timestamp {
  type Output = Duration;

  fn sub(self, other: Self) -> Duration {
    Duration::from_ticks(self.to_ticks().wrapping_sub(other.to_ticks()) as i64)
  }
}

impl Add<Duration> for Timestamp {
  type Output = Self;

  fn add(self, duration: Duration) -> Self {
    Self::from_ticks(self.to_ticks().wrapping_add(duration.to_ticks() as u64))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn now_is_after_epoch() {
    assert!(Timestamp::now() > Timestamp::ZERO);
  }

  #[test]
  fn add_then_subtract_duration() {
    let t0 = Timestamp::now();
    let lease = Duration::from_secs(30);
    let deadline = t0 + lease;
    assert!(deadline > t0);
    assert_eq!(deadline - t0, lease);
  }
}
