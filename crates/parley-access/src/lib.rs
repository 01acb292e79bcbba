//! Sender authorization for escalation replies.
//!
//! A reply is only accepted from an allowlisted sender identity or from the
//! configured destination conversation. An unconfigured filter denies
//! everyone.

pub mod sender_access;

pub use sender_access::*;
