//! Client-side RTPS participant discovery for Discovery Server topologies.
//!
//! In a Discovery Server deployment there is no multicast discovery: each
//! participant configured as a CLIENT (or SUPER_CLIENT) opens a reliable
//! unicast channel to one or more well-known SERVER participants, publishes
//! its own `DATA(p)` to them and consumes the union of proxy data they
//! redistribute.
//!
//! The crate provides the client-side engine and its close collaborators:
//!
//! - [`discovery::pdp_client::PdpClient`], the CLIENT PDP engine: initial
//!   server pings, periodic synchronisation, acknowledgement tracking,
//!   server loss and recovery, graceful dispose on shutdown;
//! - [`rtps::stateless_reader::StatelessReader`], the best-effort reader
//!   used for metatraffic and user data: matched-writer bookkeeping,
//!   duplicate suppression, fragment reassembly, liveliness assertion;
//! - [`rtps::stateful_reader::StatefulReader`] and
//!   [`rtps::writer::StatefulWriter`], the reliable TRANSIENT_LOCAL
//!   endpoint pair carrying `DATA(p)` between client and servers;
//! - [`discovery::server_list`], the `ROS_DISCOVERY_SERVER` parser.
//!
//! Transport sockets, the Simple EDP state machines, QoS negotiation and
//! the DDS entity facade live in the hosting stack and plug in through the
//! traits in [`discovery::edp`] and [`liveliness`].

pub mod error;
pub mod liveliness;

pub mod discovery;
pub mod messages;
pub mod network;
pub mod rtps;
pub mod structure;

pub use error::{Error, Result};
