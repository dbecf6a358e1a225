//! Core runtime infrastructure.
//!
//! This module contains the essential components for running Roomcast:
//! - [`config`] - Configuration parsing and validation
//! - [`runtime`] - Main runtime orchestration
//! - [`error`] - Error taxonomy
pub mod config;
pub mod error;
pub mod runtime;
