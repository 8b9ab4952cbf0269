use std::{fmt, io};

/// Failures surfaced over the crate API.
///
/// Per-sample conditions (stale sequence numbers, data from unknown writers)
/// are not errors: they are dropped or logged at the point of reception and
/// the engine keeps running.
#[derive(Debug)]
pub enum Error {
  /// Invalid configuration, e.g. a malformed server list. The engine refuses
  /// to start on these.
  Config { reason: String },
  /// A bounded pool (history, payloads, matched writers) is full.
  ResourceExhausted { reason: String },
  /// Unrecoverable initialization failure. Partially constructed state has
  /// been torn down.
  Fatal { reason: String },
  /// Payload could not be (de)serialized.
  Serialization { reason: String },
  Io(io::Error),
}

impl Error {
  pub fn config(reason: impl Into<String>) -> Self {
    Self::Config {
      reason: reason.into(),
    }
  }

  pub fn resource_exhausted(reason: impl Into<String>) -> Self {
    Self::ResourceExhausted {
      reason: reason.into(),
    }
  }

  pub fn fatal(reason: impl Into<String>) -> Self {
    Self::Fatal {
      reason: reason.into(),
    }
  }

  pub fn serialization(reason: impl Into<String>) -> Self {
    Self::Serialization {
      reason: reason.into(),
    }
  }
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Config { reason } => write!(f, "configuration error: {}", reason),
      Self::ResourceExhausted { reason } => write!(f, "resource exhausted: {}", reason),
      Self::Fatal { reason } => write!(f, "fatal: {}", reason),
      Self::Serialization { reason } => write!(f, "serialization error: {}", reason),
      Self::Io(e) => write!(f, "I/O error: {}", e),
    }
  }
}

impl std::error::Error for Error {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Self::Io(e) => Some(e),
      _ => None,
    }
  }
}

impl From<io::Error> for Error {
  fn from(e: io::Error) -> Self {
    Self::Io(e)
  }
}

pub type Result<T> = std::result::Result<T, Error>;
