//! Core domain + application logic for the VaultLink file-store bot.
//!
//! This crate is framework-agnostic. Telegram lives behind ports (traits)
//! implemented in the adapter crate.

pub mod autodelete;
pub mod collection;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod links;
pub mod logging;
pub mod plan;
pub mod ports;
pub mod registry;
pub mod security;
pub mod store;
pub mod throttle;
pub mod token;

pub use errors::{Error, Result};
