//! Trove Core crate - shared types, error taxonomy, and configuration.
//!
//! Defines the embedding record model, the opaque metadata value union,
//! distance metrics and fusion weights, the workspace-wide `TroveError`,
//! and the TOML-backed `TroveConfig`.

pub mod config;
pub mod error;
pub mod types;

pub use config::TroveConfig;
pub use error::{Result, TroveError};
pub use types::*;
