//! `cb-gateway` is the `chatbridge` binary's library half: bootstrap, the
//! message router, local commands, reply formatting and the CLI.

pub mod bootstrap;
pub mod cli;
pub mod commands;
pub mod console;
pub mod format;
pub mod router;
pub mod state;
