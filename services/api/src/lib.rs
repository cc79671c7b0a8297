//! Aijaz API Library Crate
//!
//! Ledger, dashboard and assistant endpoints for the finance app. The binaries
//! in `bin/` are thin wrappers around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
