//! Chorus Core: configuration and shared error types.

pub mod config;
pub mod error;

pub use config::{ChorusConfig, DataPaths, UpstreamConfig};
pub use error::{Error, Result};
