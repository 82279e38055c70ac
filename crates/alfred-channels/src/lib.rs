pub mod channel;
pub mod commands;
pub mod discord;
pub mod error;
pub mod googlechat;
pub mod http;
pub mod irc;
pub mod manager;
pub mod matrix;
pub mod signal;
pub mod slack;
pub mod teams;
pub mod telegram;
pub mod token;
pub mod whatsapp;

pub use channel::{Channel, ChannelStatus, InboundHandler};
pub use error::ChannelError;
pub use manager::ChannelManager;
