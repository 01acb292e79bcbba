//! Human escalation lifecycle: raise a question over a chat channel, correlate
//! the reply by id, and expose the answer to the caller.
//!
//! [`EscalationService`] is the caller-facing raise/poll contract,
//! [`EscalationRegistry`] owns request state, and [`EscalationPoller`] feeds
//! authorized replies from a [`parley_channel::MessageChannel`] into the
//! registry on a fixed interval.

pub mod escalation_audit;
pub mod escalation_message;
pub mod escalation_poller;
pub mod escalation_registry;
pub mod escalation_service;
pub mod poller_state;
pub mod reply_parser;

pub use escalation_audit::*;
pub use escalation_message::*;
pub use escalation_poller::*;
pub use escalation_registry::*;
pub use escalation_service::*;
pub use poller_state::*;
pub use reply_parser::*;
