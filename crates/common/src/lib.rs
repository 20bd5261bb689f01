//! ReceiptFlow Common Library
//!
//! Shared code for the ReceiptFlow services including:
//! - Receipt field extraction (OCR provider abstraction)
//! - Object storage for the uploaded documents
//! - Notion schema introspection, relation lookup and row insertion
//! - The end-to-end receipt pipeline
//! - Error types, configuration and metrics

pub mod config;
pub mod errors;
pub mod extraction;
pub mod metrics;
pub mod notion;
pub mod pipeline;
pub mod storage;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use extraction::{ExtractionResult, FieldValue, ReceiptExtractor};
pub use notion::{DatabaseService, PayloadMapper, SchemaCache};
pub use pipeline::{PipelineOutcome, PipelineStage, ReceiptPipeline};
pub use storage::ObjectStorage;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
