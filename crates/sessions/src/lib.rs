//! Durable conversation → agent session token mapping.
//!
//! The only state the bridge persists about conversations: which agent
//! session to resume for each conversation id.  Message content is never
//! stored.

pub mod store;

pub use store::{SessionMap, SessionStore};
