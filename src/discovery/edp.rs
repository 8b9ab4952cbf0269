use std::{
  collections::BTreeSet,
  sync::Mutex,
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::discovery::{participant_data::ParticipantProxyData, pdp_client::DiscoveryConfig};
use crate::structure::guid::GuidPrefix;

/// Endpoint Discovery Protocol as consumed by the PDP engine.
///
/// The engine defers endpoint matching to the sync event: a server's EDP
/// endpoints are assigned lazily once its participant data is known, and
/// the listener unmatches them before the engine drops the participant.
pub trait EndpointDiscovery: Send + Sync {
  fn init(&self, config: &DiscoveryConfig) -> bool;
  fn assign_remote_endpoints(&self, proxy: &ParticipantProxyData);
  fn remove_remote_endpoints(&self, proxy: &ParticipantProxyData);
  fn are_remote_endpoints_matched(&self, proxy: &ParticipantProxyData) -> bool;
}

/// Bookkeeping implementation used by default and in tests. A full SEDP
/// engine lives in the hosting stack and plugs in through the trait.
#[derive(Debug, Default)]
pub struct SimpleEndpointDiscovery {
  matched_participants: Mutex<BTreeSet<GuidPrefix>>,
}

impl SimpleEndpointDiscovery {
  pub fn new() -> Self {
    Self::default()
  }
}

impl EndpointDiscovery for SimpleEndpointDiscovery {
  fn init(&self, _config: &DiscoveryConfig) -> bool {
    true
  }

  fn assign_remote_endpoints(&self, proxy: &ParticipantProxyData) {
    let mut matched = self
      .matched_participants
      .lock()
      .unwrap_or_else(|p| p.into_inner());
    if matched.insert(proxy.guid.prefix) {
      debug!("EDP endpoints assigned for {:?}", proxy.guid.prefix);
    }
  }

  fn remove_remote_endpoints(&self, proxy: &ParticipantProxyData) {
    self
      .matched_participants
      .lock()
      .unwrap_or_else(|p| p.into_inner())
      .remove(&proxy.guid.prefix);
  }

  fn are_remote_endpoints_matched(&self, proxy: &ParticipantProxyData) -> bool {
    self
      .matched_participants
      .lock()
      .unwrap_or_else(|p| p.into_inner())
      .contains(&proxy.guid.prefix)
  }
}
