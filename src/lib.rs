//! Vaultgate - an HTTP gateway wrapping a single supervised backend process
//!
//! This library provides a front-facing gateway that:
//! - Spawns one long-running backend process with a configured environment
//! - Waits for the backend to answer its health endpoint before serving
//! - Forwards all inbound HTTP traffic to the backend, relaying responses verbatim
//! - Returns route-specific 503 responses while the backend is unreachable
//! - Terminates and reaps the backend on gateway shutdown

pub mod config;
pub mod error;
pub mod forward;
pub mod gateway;
pub mod health;
pub mod supervisor;

/// Package name from Cargo.toml
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Package version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
