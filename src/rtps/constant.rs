use std::time::Duration;

use mio::Token;

// Timing defaults for the reliable PDP endpoint pair.
// RTPS spec Section 8.4.7.1.1 "Default Timing-Related Values", adjusted for
// discovery-server metatraffic.
pub const PDP_HEARTBEAT_PERIOD: Duration = Duration::from_millis(350);
pub const NACK_RESPONSE_DELAY: Duration = Duration::from_millis(200);
pub const NACK_SUPPRESSION_DURATION: Duration = Duration::from_millis(0);
pub const PDP_HEARTBEAT_RESPONSE_DELAY: Duration = Duration::from_millis(250);

/// Period of the client-sync event that pings servers and checks
/// acknowledgement state until the engine is fully synchronised.
pub const CLIENT_SYNC_PERIOD_DEFAULT: Duration = Duration::from_millis(450);

/// Default lease announced in the client's participant data.
pub const PARTICIPANT_LEASE_DURATION_DEFAULT: Duration = Duration::from_secs(20);

// Endpoint resource defaults.
pub const PDP_INITIAL_RESERVED_CACHES: usize = 25;
pub const PDP_READER_PAYLOAD_SIZE: usize = 5000;
pub const MATCHED_WRITERS_CAPACITY_DEFAULT: usize = 32;

// Poll token constants for the engine event loop.

pub const PDP_COMMAND_TOKEN: Token = Token(1);
pub const PDP_PARTICIPANT_DATA_TOKEN: Token = Token(2);
pub const PDP_CLIENT_SYNC_TOKEN: Token = Token(3);
pub const PDP_LEASE_TOKEN: Token = Token(4);
