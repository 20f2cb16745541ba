pub mod aggregator;
pub mod chat_client;
pub mod config;
pub mod error;
pub mod message;
pub mod retry;
pub mod transcript;
