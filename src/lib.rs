//! Rate-limited asset submission into an asynchronously moderated catalog,
//! plus multi-signal reconciliation of each asset's moderation status.

pub mod app;
pub mod config;
pub mod constants;
pub mod dedupe;
pub mod error;
pub mod infra;
pub mod logging;
pub mod metrics;
pub mod rate_limiter;
pub mod resolver;
pub mod transport;
pub mod types;
pub mod validation;

pub use app::{Collaborators, IngestionEngine};
pub use error::{ErrorKind, IngestError, Result};
