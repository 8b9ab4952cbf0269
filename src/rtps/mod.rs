pub mod constant;
pub mod message;
pub mod reader;
pub mod stateful_reader;
pub mod stateless_reader;
pub mod writer;
