//! Notion database integration
//!
//! Provides:
//! - Schema introspection with a TTL cache
//! - Relation resolution against lookup tables
//! - Schema-driven insert payload mapping
//! - Entry insertion
//!
//! Everything talks to the service through [`DatabaseService`], so the
//! mapping logic can be exercised against [`MockDatabaseService`].

mod client;
mod payload;
mod relation;
mod schema;
mod writer;

pub use client::NotionClient;
pub use payload::{
    DateValue, ExternalFile, FileObject, InsertPayload, Parent, PayloadMapper, PropertyValue,
    RelationRef, RichText, SelectOption, TextContent,
};
pub use relation::{RelationBindings, RelationResolver, CATEGORY_PROPERTY, MODE_PROPERTY};
pub use schema::{DatabaseSchema, PropertyType, SchemaCache};
pub use writer::EntryWriter;

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A row reference returned by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRef {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// Row created by an insert
pub type InsertedPage = PageRef;

/// Trait for the hosted database service
#[async_trait]
pub trait DatabaseService: Send + Sync {
    /// Read the property name -> type mapping of a database
    async fn retrieve_schema(&self, database_id: &str) -> Result<DatabaseSchema>;

    /// Rows whose title contains `text`, in service order
    async fn query_title_contains(&self, database_id: &str, text: &str) -> Result<Vec<PageRef>>;

    /// Create one row
    async fn create_page(&self, payload: &InsertPayload) -> Result<InsertedPage>;
}

/// In-memory database service for testing
#[derive(Default)]
pub struct MockDatabaseService {
    schemas: HashMap<String, DatabaseSchema>,
    rows: HashMap<String, Vec<(String, String)>>,
    failing_searches: Vec<String>,
    insert_failure: Option<(u16, String)>,
    inserted: Mutex<Vec<InsertPayload>>,
    schema_fetches: AtomicUsize,
    searches: AtomicUsize,
}

impl MockDatabaseService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a database schema
    pub fn with_schema(mut self, database_id: &str, schema: DatabaseSchema) -> Self {
        self.schemas.insert(database_id.to_string(), schema);
        self
    }

    /// Add a lookup row (id, title) to a database
    pub fn with_row(mut self, database_id: &str, id: &str, title: &str) -> Self {
        self.rows
            .entry(database_id.to_string())
            .or_default()
            .push((id.to_string(), title.to_string()));
        self
    }

    /// Make searches against `database_id` fail with a 500
    pub fn with_failing_search(mut self, database_id: &str) -> Self {
        self.failing_searches.push(database_id.to_string());
        self
    }

    /// Make every insert fail with the given status
    pub fn with_insert_failure(mut self, status: u16, message: &str) -> Self {
        self.insert_failure = Some((status, message.to_string()));
        self
    }

    /// Payloads accepted so far
    pub fn inserted(&self) -> Vec<InsertPayload> {
        self.inserted
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn schema_fetches(&self) -> usize {
        self.schema_fetches.load(Ordering::SeqCst)
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseService for MockDatabaseService {
    async fn retrieve_schema(&self, database_id: &str) -> Result<DatabaseSchema> {
        self.schema_fetches.fetch_add(1, Ordering::SeqCst);
        self.schemas
            .get(database_id)
            .cloned()
            .ok_or_else(|| AppError::SchemaFetch {
                database_id: database_id.to_string(),
                status: 404,
                message: "object_not_found".to_string(),
            })
    }

    async fn query_title_contains(&self, database_id: &str, text: &str) -> Result<Vec<PageRef>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if self.failing_searches.iter().any(|id| id == database_id) {
            return Err(AppError::RelationLookup {
                database_id: database_id.to_string(),
                status: 500,
                message: "internal_server_error".to_string(),
            });
        }

        let needle = text.to_lowercase();
        Ok(self
            .rows
            .get(database_id)
            .map(|rows| {
                rows.iter()
                    .filter(|(_, title)| title.to_lowercase().contains(&needle))
                    .map(|(id, _)| PageRef {
                        id: id.clone(),
                        url: None,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_page(&self, payload: &InsertPayload) -> Result<InsertedPage> {
        if let Some((status, message)) = &self.insert_failure {
            return Err(AppError::Insert {
                status: *status,
                message: message.clone(),
            });
        }

        let mut inserted = self.inserted.lock().map_err(|_| AppError::Internal {
            message: "mock insert log poisoned".to_string(),
        })?;
        inserted.push(payload.clone());
        let id = format!("page-{}", inserted.len());
        Ok(PageRef {
            url: Some(format!("https://www.notion.so/{}", id)),
            id,
        })
    }
}
