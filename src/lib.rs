//! Client core for the bot-management dashboard: status polling, the link
//! catalog browser and the moderation workflow.

pub mod modules;

pub use modules::error::{Error, Result};
