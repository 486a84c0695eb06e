//! Core of the multi-tenant DCA trading engine (§1-2): Signal Router &
//! Queue Manager, Position/DCA Execution Engine, Order Fill Monitor, and
//! Risk Engine, stacked on a Precision & Grid Calculator, Exchange
//! Connector, and Store. HTTP ingress, schema migrations, notification
//! delivery, and concrete exchange wire protocols are out of scope; this
//! crate exposes the plain async entry points an embedding service wires
//! to routes and schedules.

pub mod constants;
pub mod coordination;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod exchange;
pub mod grid;
pub mod metrics;
pub mod middleware;
pub mod store;
pub mod utils;

pub use errors::{EngineError, Result};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a JSON-formatted tracing subscriber driven by `RUST_LOG`
/// (defaulting to `info`). Call once at process startup; a second call
/// from the same process will return an error from `try_init`, which
/// callers in tests should ignore.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .try_init();
}
