//! HTTP control plane and realtime update gateway.
//!
//! Thin axum handlers over the worker supervisor and the session state
//! store, plus the long-lived push channel that streams state deltas to
//! every connected client as newline-delimited JSON.

pub mod auth;
pub mod error;
pub mod publisher;
pub mod server;
pub mod stream;

pub use publisher::StorePublisher;
pub use server::{build_gateway_router, run_gateway_server, GatewayConfig, GatewayState};
