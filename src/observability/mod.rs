//! Observability: structured logging and metrics.
//!
//! - Structured logging with configurable formats (pretty, compact, JSON)
//! - Prometheus counters for retention runs

pub mod metrics;
#[cfg(feature = "server")]
mod tracing_init;

#[cfg(feature = "server")]
pub use tracing_init::*;
