//! Ordered, per-stream event ingestion.

pub mod ingest;

pub use ingest::{BatchResult, IngestError, Ingestor};
