//! Receipt processing pipeline
//!
//! One upload runs strictly in order:
//! `Received -> Extracted -> Uploaded -> Mapped -> Inserted`.
//! A run stops at `Extracted` when nothing usable came back from the
//! extractor, and at `Mapped` when the target schema cannot be read.

use crate::errors::{AppError, Result};
use crate::extraction::{fields, FileDescriptor, ReceiptExtractor};
use crate::metrics;
use crate::notion::{EntryWriter, InsertedPage, PayloadMapper};
use crate::storage::{ObjectStorage, StoredObject};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Progress of one upload through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Received,
    Extracted,
    Uploaded,
    Mapped,
    Inserted,
    Aborted,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Received => "received",
            PipelineStage::Extracted => "extracted",
            PipelineStage::Uploaded => "uploaded",
            PipelineStage::Mapped => "mapped",
            PipelineStage::Inserted => "inserted",
            PipelineStage::Aborted => "aborted",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a run that reached the database
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    pub page: InsertedPage,
    pub stored: StoredObject,
    pub properties_written: usize,
}

/// Wires extraction, storage, mapping and insertion together
pub struct ReceiptPipeline {
    extractor: Arc<dyn ReceiptExtractor>,
    storage: Arc<dyn ObjectStorage>,
    mapper: PayloadMapper,
    writer: EntryWriter,
    folder_id: Option<String>,
}

impl ReceiptPipeline {
    pub fn new(
        extractor: Arc<dyn ReceiptExtractor>,
        storage: Arc<dyn ObjectStorage>,
        mapper: PayloadMapper,
        writer: EntryWriter,
        folder_id: Option<String>,
    ) -> Self {
        Self {
            extractor,
            storage,
            mapper,
            writer,
            folder_id,
        }
    }

    pub fn database_id(&self) -> &str {
        self.mapper.database_id()
    }

    /// Run one document through every stage
    #[instrument(skip(self, bytes), fields(bytes = bytes.len(), extractor = self.extractor.provider_name()))]
    pub async fn process(&self, bytes: &[u8], filename: &str) -> Result<PipelineOutcome> {
        let start = Instant::now();
        debug!(stage = %PipelineStage::Received, "Processing receipt");

        let extraction = self
            .extractor
            .extract(bytes, filename)
            .await
            .map_err(|e| abort(PipelineStage::Received, e))?;

        if !extraction.has_usable_fields(&[fields::MODE]) {
            return Err(abort(
                PipelineStage::Extracted,
                AppError::EmptyExtraction {
                    filename: filename.to_string(),
                },
            ));
        }
        debug!(stage = %PipelineStage::Extracted, fields = extraction.len(), "Receipt extracted");

        let stored = self
            .storage
            .upload(bytes, filename, self.folder_id.as_deref())
            .await
            .map_err(|e| abort(PipelineStage::Extracted, e))?;
        debug!(stage = %PipelineStage::Uploaded, object_id = %stored.object_id, "Receipt stored");

        let extraction = extraction.with_field(
            fields::RECEIPT,
            FileDescriptor {
                name: filename.to_string(),
                url: stored.public_url.clone(),
            },
        );

        let payload = self
            .mapper
            .create_entry_payload(&extraction)
            .await
            .map_err(|e| abort(PipelineStage::Mapped, e))?;
        let properties_written = payload.properties.len();
        debug!(stage = %PipelineStage::Mapped, properties = properties_written, "Payload built");

        let page = self
            .writer
            .insert(payload)
            .await
            .map_err(|e| abort(PipelineStage::Inserted, e))?;

        metrics::record_receipt_processed(start.elapsed().as_secs_f64(), self.extractor.provider_name());
        info!(
            stage = %PipelineStage::Inserted,
            page_id = %page.id,
            properties = properties_written,
            "Receipt processed"
        );

        Ok(PipelineOutcome {
            page,
            stored,
            properties_written,
        })
    }
}

/// Log and count a run that stopped while in `stage`
fn abort(stage: PipelineStage, error: AppError) -> AppError {
    warn!(stage = %stage, next = %PipelineStage::Aborted, error = %error, "Receipt pipeline aborted");
    metrics::record_receipt_failed(stage.as_str());
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{ExtractionResult, FieldValue, MockExtractor};
    use crate::notion::{
        DatabaseSchema, MockDatabaseService, PropertyType, PropertyValue, RelationBindings,
        RelationResolver, SchemaCache,
    };
    use crate::storage::MockStorage;
    use std::time::Duration;

    const DB: &str = "receipts-db";

    fn schema() -> DatabaseSchema {
        DatabaseSchema::from_iter([
            ("Name", PropertyType::Title),
            ("Amount", PropertyType::Number),
            ("Date", PropertyType::Date),
            ("Category", PropertyType::Relation),
            ("Mode", PropertyType::Relation),
            ("Receipt", PropertyType::Files),
        ])
    }

    fn pipeline(
        extractor: MockExtractor,
        storage: Arc<MockStorage>,
        service: Arc<MockDatabaseService>,
    ) -> ReceiptPipeline {
        let schemas = Arc::new(SchemaCache::new(service.clone(), Duration::from_secs(60)));
        let mapper = PayloadMapper::new(
            schemas,
            RelationResolver::new(service.clone()),
            RelationBindings::new("categories", "modes"),
            DB,
        );
        ReceiptPipeline::new(
            Arc::new(extractor),
            storage,
            mapper,
            EntryWriter::new(service),
            Some("folder-1".to_string()),
        )
    }

    #[tokio::test]
    async fn test_full_run_inserts_one_row() {
        let service = Arc::new(
            MockDatabaseService::new()
                .with_schema(DB, schema())
                .with_row("categories", "cat-dining", "Dining")
                .with_row("modes", "mode-card", "Credit Card"),
        );
        let storage = Arc::new(MockStorage::new());
        let pipeline = pipeline(MockExtractor::sample("Credit Card"), storage.clone(), service.clone());

        let outcome = pipeline.process(b"jpeg bytes", "r.jpg").await.unwrap();

        assert_eq!(outcome.page.id, "page-1");
        assert_eq!(outcome.properties_written, 6);
        assert_eq!(
            storage.uploads(),
            vec![("r.jpg".to_string(), Some("folder-1".to_string()))]
        );

        let inserted = service.inserted();
        assert_eq!(inserted.len(), 1);
        match &inserted[0].properties["Receipt"] {
            PropertyValue::Files(files) => assert_eq!(files.len(), 1),
            other => panic!("unexpected receipt property: {other:?}"),
        }
        assert_eq!(
            inserted[0].properties["Amount"],
            PropertyValue::Number(Some(4.5))
        );
    }

    #[tokio::test]
    async fn test_empty_extraction_aborts_before_upload() {
        let extractor = MockExtractor::new(
            ExtractionResult::new()
                .with_field(fields::NAME, FieldValue::Null)
                .with_field(fields::MODE, "Credit Card"),
        );
        let service = Arc::new(MockDatabaseService::new().with_schema(DB, schema()));
        let storage = Arc::new(MockStorage::new());
        let pipeline = pipeline(extractor, storage.clone(), service.clone());

        let err = pipeline.process(b"blank", "blank.png").await.unwrap_err();

        assert!(matches!(err, AppError::EmptyExtraction { .. }));
        assert!(storage.uploads().is_empty());
        assert!(service.inserted().is_empty());
    }

    #[tokio::test]
    async fn test_schema_failure_aborts_without_insert() {
        // No schema registered: the mock answers 404
        let service = Arc::new(MockDatabaseService::new());
        let storage = Arc::new(MockStorage::new());
        let pipeline = pipeline(MockExtractor::sample("Credit Card"), storage.clone(), service.clone());

        let err = pipeline.process(b"jpeg", "r.jpg").await.unwrap_err();

        assert!(matches!(err, AppError::SchemaFetch { status: 404, .. }));
        assert_eq!(storage.uploads().len(), 1);
        assert!(service.inserted().is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_stops_run() {
        let service = Arc::new(MockDatabaseService::new().with_schema(DB, schema()));
        let pipeline = pipeline(
            MockExtractor::sample("Credit Card"),
            Arc::new(MockStorage::failing()),
            service.clone(),
        );

        let err = pipeline.process(b"jpeg", "r.jpg").await.unwrap_err();

        assert!(matches!(err, AppError::Storage { .. }));
        assert_eq!(service.schema_fetches(), 0);
        assert!(service.inserted().is_empty());
    }

    #[tokio::test]
    async fn test_insert_failure_is_returned() {
        let service = Arc::new(
            MockDatabaseService::new()
                .with_schema(DB, schema())
                .with_insert_failure(400, "body failed validation"),
        );
        let pipeline = pipeline(
            MockExtractor::sample("Credit Card"),
            Arc::new(MockStorage::new()),
            service,
        );

        let err = pipeline.process(b"jpeg", "r.jpg").await.unwrap_err();
        assert_eq!(err.upstream_status(), Some(400));
    }

    #[tokio::test]
    async fn test_missing_relations_still_insert() {
        let service = Arc::new(MockDatabaseService::new().with_schema(DB, schema()));
        let pipeline = pipeline(
            MockExtractor::sample("Credit Card"),
            Arc::new(MockStorage::new()),
            service.clone(),
        );

        let outcome = pipeline.process(b"jpeg", "r.jpg").await.unwrap();

        let properties = &service.inserted()[0].properties;
        assert!(!properties.contains_key("Category"));
        assert!(!properties.contains_key("Mode"));
        assert_eq!(outcome.properties_written, 4);
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(PipelineStage::Mapped.as_str(), "mapped");
        assert_eq!(PipelineStage::Aborted.to_string(), "aborted");
    }
}
