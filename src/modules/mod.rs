pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod groups;
pub mod moderation;
pub mod normalize;
pub mod notify;
pub mod poller;
pub mod scheduler;
pub mod session;
pub mod transport;
pub mod types;
