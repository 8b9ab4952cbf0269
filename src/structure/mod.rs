pub mod cache_change;
pub mod duration;
pub mod guid;
pub mod history;
pub mod locator;
pub mod parameter_id;
pub mod payload_pool;
pub mod qos;
pub mod sequence_number;
pub mod time;
