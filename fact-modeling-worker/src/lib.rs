pub mod cleanse;
pub mod config;
pub mod consumer;
pub mod enrich;
pub mod error;
pub mod identity;
pub mod notify;
pub mod pipeline;
pub mod runs;
pub mod serve;
pub mod sink;
pub mod source;
pub mod types;
