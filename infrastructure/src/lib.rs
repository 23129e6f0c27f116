pub mod chat_client;
pub mod config;
pub mod hub;
pub mod realtime;
