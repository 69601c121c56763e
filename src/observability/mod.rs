//! # Observability Infrastructure
//!
//! Structured logging and metrics for the engine. Distributed-tracing
//! export and scrape endpoints are the embedding process's concern.

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
