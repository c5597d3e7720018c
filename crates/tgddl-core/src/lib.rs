//! Core domain + application logic for the Telegram direct-download relay.
//!
//! This crate is framework-agnostic. Telegram and the HTTP server live in
//! adapter crates and reach the core through the ports defined here.

pub mod config;
pub mod domain;
pub mod errors;
pub mod filename;
pub mod formatting;
pub mod ingest;
pub mod logging;
pub mod messaging;
pub mod ports;
pub mod retry;
pub mod slug;
pub mod store;

pub use errors::{Error, Result};
