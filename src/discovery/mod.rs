pub mod edp;
pub mod participant_data;
pub mod pdp_client;
pub mod proxy_db;
pub mod server_list;
