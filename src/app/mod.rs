pub mod ingest_use_case;
pub mod orchestrator;
pub mod ports;
pub mod status_use_case;

pub use orchestrator::{Collaborators, IngestionEngine};
