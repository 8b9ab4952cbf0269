/// Endpoint QoS kinds relevant to discovery traffic. The full DDS QoS
/// machinery lives in the hosting stack; the discovery core only needs the
/// discriminants it matches endpoints on.

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReliabilityKind {
  BestEffort,
  Reliable,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DurabilityKind {
  Volatile,
  TransientLocal,
  Transient,
  Persistent,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TopicKind {
  NoKey,
  WithKey,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LivelinessKind {
  Automatic,
  ManualByParticipant,
  ManualByTopic,
}
