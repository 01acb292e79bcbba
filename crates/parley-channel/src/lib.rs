//! Message channel adapters used to deliver escalation questions and collect
//! replies.
//!
//! [`MessageChannel`] is the I/O boundary: send one text message to the
//! configured destination, and fetch inbound messages after a cursor.
//! [`TelegramChannel`] implements it against the Telegram Bot API;
//! [`MemoryChannel`] is an in-process implementation for tests and embedding.

pub mod channel_contract;
pub mod memory_channel;
pub mod telegram_channel;

pub use channel_contract::*;
pub use memory_channel::*;
pub use telegram_channel::*;
