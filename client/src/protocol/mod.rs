pub mod auth;
pub mod client;
pub mod commands;
pub mod error;
pub mod pubsub;
pub mod traits;
