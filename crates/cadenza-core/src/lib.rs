//! # cadenza-core
//!
//! Core types, configuration, and error handling shared by the Cadenza
//! playback crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::{EngineConfig, OutputConfig};
pub use error::{Error, Result};
pub use types::*;
