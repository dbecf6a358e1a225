//! Operations and observability.
//!
//! Operational concerns live here:
//! - [`observability`] - Metrics registry and health/readiness probes

pub mod observability;
