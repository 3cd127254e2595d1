//! Core library for the multi-provider LLM gateway.
//!
//! This crate is transport-agnostic: it has no knowledge of axum or HTTP. It
//! exposes configuration, the rate limiter, the backend registry, the CLI
//! subprocess executor, the per-backend process pool, the router, the
//! streaming adapter, remote provider backends, the request pipeline that
//! composes all of the above, and the request-log sink trait.

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod pipeline;
pub mod pool;
pub mod rate_limiter;
pub mod registry;
pub mod remote;
pub mod router;
pub mod streaming;

pub use error::GatewayError;

/// Returns the version of the gateway-core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
