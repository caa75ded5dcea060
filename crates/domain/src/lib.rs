//! Shared types for the chatbridge crates: configuration schema, the common
//! error type, and structured trace events.

pub mod config;
pub mod error;
pub mod trace;
