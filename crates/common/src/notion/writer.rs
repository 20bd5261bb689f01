//! Entry insertion

use super::{DatabaseService, InsertPayload, InsertedPage};
use crate::errors::Result;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Submits mapped payloads, one write call each, never retried
#[derive(Clone)]
pub struct EntryWriter {
    service: Arc<dyn DatabaseService>,
}

impl EntryWriter {
    pub fn new(service: Arc<dyn DatabaseService>) -> Self {
        Self { service }
    }

    /// Insert one row; the payload is consumed
    #[instrument(skip(self, payload), fields(database_id = %payload.parent.database_id, properties = payload.properties.len()))]
    pub async fn insert(&self, payload: InsertPayload) -> Result<InsertedPage> {
        match self.service.create_page(&payload).await {
            Ok(page) => {
                info!(page_id = %page.id, "Entry inserted successfully");
                Ok(page)
            }
            Err(e) => {
                error!(error = %e, "Failed to insert entry");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::notion::{MockDatabaseService, Parent, PropertyValue};
    use std::collections::BTreeMap;

    fn payload() -> InsertPayload {
        InsertPayload {
            parent: Parent {
                database_id: "db".into(),
            },
            properties: BTreeMap::from([("Amount".to_string(), PropertyValue::Number(Some(2.0)))]),
        }
    }

    #[tokio::test]
    async fn test_insert_success() {
        let service = Arc::new(MockDatabaseService::new());
        let writer = EntryWriter::new(service.clone());

        let page = writer.insert(payload()).await.unwrap();

        assert_eq!(page.id, "page-1");
        assert_eq!(service.inserted(), vec![payload()]);
    }

    #[tokio::test]
    async fn test_insert_failure_carries_status() {
        let service = Arc::new(MockDatabaseService::new().with_insert_failure(400, "validation_error"));
        let writer = EntryWriter::new(service.clone());

        let err = writer.insert(payload()).await.unwrap_err();

        match err {
            AppError::Insert { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "validation_error");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(service.inserted().is_empty());
    }
}
