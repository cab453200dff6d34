//! Error types shared across the ingestion server.

pub mod types;
