//! `cb-transport`: keeps one logical chat connection alive across drops.
//!
//! The chat protocol itself lives behind the [`Connector`] seam.  This crate
//! owns what sits above it: which connection instance is current, how a
//! disconnect is classified, and when to try again.
//!
//! # Connection lifecycle
//!
//! ```text
//!   Disconnected ──connect()──► Connecting ──status "open"──► Open
//!        ▲                          ▲                          │
//!        │ shutdown()               │ reconnect timer          │ status "close"
//!        │                          │                          ▼
//!        └──────────────────────────┴──────────── classify(code)
//!                                                   401 → session invalidated:
//!                                                         clear credentials, fixed delay
//!                                                   440 → replaced: linear, ceiling
//!                                                   *   → generic: exponential
//! ```
//!
//! Every event carries the generation and handle id of the connection that
//! produced it.  Events from anything but the current connection are
//! dropped before they can touch state.

pub mod connector;
pub mod credentials;
pub mod error;
pub mod reconnect;
pub mod supervisor;
pub mod types;
pub mod ws;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use connector::{ConnectionHandle, Connector, EventSink};
pub use credentials::CredentialStore;
pub use error::TransportError;
pub use reconnect::ReconnectPolicy;
pub use supervisor::{ConnectionSnapshot, Supervisor};
pub use types::{
    ConnectionEvent, ConnectionStatus, DisconnectClass, EventKind, IncomingMessage,
    MessageBatch, StatusUpdate, TransportEvent, TransportNotice,
};
pub use ws::SidecarConnector;
