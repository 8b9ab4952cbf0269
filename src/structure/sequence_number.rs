use std::ops::{Add, Sub};

use speedy::{Context, Readable, Reader, Writable, Writer};

/// 64-bit RTPS sequence number. Serialized as a high/low pair of 32-bit
/// words, per RTPS spec v2.3 Section 9.3.2.
#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber {
  value: i64,
}

impl SequenceNumber {
  pub const UNKNOWN: Self = Self {
    value: (u32::MAX as i64) << 32,
  };

  pub const fn new(value: i64) -> Self {
    Self { value }
  }

  pub const fn zero() -> Self {
    Self { value: 0 }
  }

  pub fn plus_1(&self) -> Self {
    Self {
      value: self.value + 1,
    }
  }
}

impl From<i64> for SequenceNumber {
  fn from(value: i64) -> Self {
    Self { value }
  }
}

impl From<SequenceNumber> for i64 {
  fn from(sn: SequenceNumber) -> Self {
    sn.value
  }
}

impl Add for SequenceNumber {
  type Output = Self;

  fn add(self, other: Self) -> Self {
    Self {
      value: self.value + other.value,
    }
  }
}

impl Sub for SequenceNumber {
  type Output = Self;

  fn sub(self, other: Self) -> Self {
    Self {
      value: self.value - other.value,
    }
  }
}

impl<'a, C: Context> Readable<'a, C> for SequenceNumber {
  #[inline]
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let high: i32 = reader.read_value()?;
    let low: u32 = reader.read_value()?;
    Ok(Self {
      value: (i64::from(high) << 32) + i64::from(low),
    })
  }

  #[inline]
  fn minimum_bytes_needed() -> usize {
    8
  }
}

impl<C: Context> Writable<C> for SequenceNumber {
  #[inline]
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_i32((self.value >> 32) as i32)?;
    writer.write_u32(self.value as u32)
  }
}

/// 32-bit fragment number. Fragment numbering starts at 1.
#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Readable, Writable)]
pub struct FragmentNumber {
  value: u32,
}

impl FragmentNumber {
  pub const fn new(value: u32) -> Self {
    Self { value }
  }
}

impl From<FragmentNumber> for u32 {
  fn from(fn_: FragmentNumber) -> Self {
    fn_.value
  }
}
