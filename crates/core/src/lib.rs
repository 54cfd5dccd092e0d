//! Oxidiana core: personas, conversation, effects, and their persistence.

pub mod commands;
pub mod config;
pub mod conversation;
pub mod error;
pub mod image;
pub mod io;
pub mod ledger;
pub mod memory;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod speech;
pub mod status;
pub mod store;
pub mod types;
