use speedy::{Context, Readable, Reader, Writable, Writer};

use crate::structure::parameter_id::ParameterId;

/// One id/value entry of a PL-CDR parameter list. Values are padded to
/// 4-byte alignment on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parameter {
  pub parameter_id: ParameterId,
  pub value: Vec<u8>,
}

impl Parameter {
  pub fn new(parameter_id: ParameterId, value: Vec<u8>) -> Self {
    Self {
      parameter_id,
      value,
    }
  }

  /// PID_STATUS_INFO with the disposed/unregistered flag bits,
  /// RTPS spec v2.3 Section 9.6.3.9.
  pub fn status_info(disposed: bool, unregistered: bool) -> Self {
    let mut flags = 0u8;
    if disposed {
      flags |= 0x01;
    }
    if unregistered {
      flags |= 0x02;
    }
    Self::new(ParameterId::PID_STATUS_INFO, vec![0, 0, 0, flags])
  }

  fn padded_len(&self) -> usize {
    (self.value.len() + 3) & !3
  }
}

impl<C: Context> Writable<C> for Parameter {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    writer.write_value(&self.parameter_id)?;
    writer.write_u16(self.padded_len() as u16)?;
    writer.write_bytes(&self.value)?;
    for _ in self.value.len()..self.padded_len() {
      writer.write_u8(0)?;
    }
    Ok(())
  }
}

/// Sequence of parameters terminated by PID_SENTINEL on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParameterList {
  pub parameters: Vec<Parameter>,
}

impl ParameterList {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, parameter: Parameter) {
    self.parameters.push(parameter);
  }

  pub fn find(&self, pid: ParameterId) -> Option<&Parameter> {
    self.parameters.iter().find(|p| p.parameter_id == pid)
  }

  pub fn find_all<'a>(&'a self, pid: ParameterId) -> impl Iterator<Item = &'a Parameter> {
    self.parameters.iter().filter(move |p| p.parameter_id == pid)
  }

  /// Serialized length including the sentinel.
  pub fn serialized_len(&self) -> usize {
    self
      .parameters
      .iter()
      .map(|p| 4 + p.padded_len())
      .sum::<usize>()
      + 4
  }
}

impl<C: Context> Writable<C> for ParameterList {
  fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
    for parameter in &self.parameters {
      writer.write_value(parameter)?;
    }
    writer.write_value(&ParameterId::PID_SENTINEL)?;
    writer.write_u16(0)
  }
}

impl<'a, C: Context> Readable<'a, C> for ParameterList {
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let mut parameters = Vec::new();
    loop {
      let parameter_id: ParameterId = reader.read_value()?;
      let length = reader.read_u16()? as usize;
      if parameter_id == ParameterId::PID_SENTINEL {
        return Ok(Self { parameters });
      }
      let mut value = vec![0u8; length];
      reader.read_bytes(&mut value)?;
      parameters.push(Parameter {
        parameter_id,
        value,
      });
    }
  }
}

#[cfg(test)]
mod tests {
  use speedy::{Endianness, Readable, Writable};

  use super::*;

  #[test]
  fn round_trip_with_padding() {
    let mut list = ParameterList::new();
    list.push(Parameter::new(ParameterId::PID_PROPERTY_LIST, vec![1, 2, 3]));
    list.push(Parameter::status_info(true, true));

    let bytes = list.write_to_vec_with_ctx(Endianness::LittleEndian).unwrap();
    assert_eq!(bytes.len(), list.serialized_len());

    let decoded =
      ParameterList::read_from_buffer_with_ctx(Endianness::LittleEndian, &bytes).unwrap();
    // padding widens the stored value
    assert_eq!(decoded.parameters.len(), 2);
    assert_eq!(&decoded.parameters[0].value[..3], &[1, 2, 3]);
  }

  #[test]
  fn sentinel_terminates_parse() {
    let mut list = ParameterList::new();
    list.push(Parameter::status_info(false, false));
    let mut bytes = list.write_to_vec_with_ctx(Endianness::LittleEndian).unwrap();
    // trailing garbage after the sentinel is not consumed
    bytes.extend_from_slice(&[0xde, 0xad]);
    let decoded =
      ParameterList::read_from_buffer_with_ctx(Endianness::LittleEndian, &bytes).unwrap();
    assert_eq!(decoded.parameters.len(), 1);
  }
}
