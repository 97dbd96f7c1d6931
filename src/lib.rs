//! Piazza: a small social network served over a raw-TCP text protocol.
//!
//! The binary wires these pieces together; integration tests drive them
//! through [`server::Server`] directly.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod notify;
pub mod protocol;
pub mod rates;
pub mod registration;
pub mod rewards;
pub mod router;
pub mod server;
pub mod store;
