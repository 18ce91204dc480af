//! Prompt fan-out: one prompt, many upstream models, one ordered answer.
//!
//! Each requested model id is resolved through the [`ModelCatalog`] and sent
//! to the upstream chat-completion endpoint on its own task. Results are
//! joined back in request order; per-model failures stay per-model.

pub mod aggregate;
pub mod models;
pub mod types;
pub mod upstream;

pub use aggregate::Aggregator;
pub use models::{ModelCatalog, ModelEntry};
pub use types::*;
pub use upstream::UpstreamClient;
