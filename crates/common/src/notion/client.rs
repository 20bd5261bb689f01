//! Notion REST client

use super::{DatabaseSchema, DatabaseService, InsertPayload, InsertedPage, PageRef, PropertyType};
use crate::config::NotionConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{instrument, warn};

/// HTTP client for the Notion API
pub struct NotionClient {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    version: String,
    lookup_title_property: String,
    search_page_size: u32,
}

#[derive(Deserialize)]
struct DatabaseResponse {
    properties: BTreeMap<String, PropertyDefinition>,
}

#[derive(Deserialize)]
struct PropertyDefinition {
    #[serde(rename = "type")]
    kind: PropertyType,
}

#[derive(Deserialize)]
struct QueryResponse {
    results: Vec<PageRef>,
}

impl NotionClient {
    /// Create a new Notion client
    pub fn new(config: &NotionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            version: config.version.clone(),
            lookup_title_property: config.lookup_title_property.clone(),
            search_page_size: config.search_page_size,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_base, path))
            .bearer_auth(&self.api_key)
            .header("Notion-Version", &self.version)
    }

    /// Status and body text of a failed response
    async fn failure(response: Response) -> (u16, String) {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        (status, body)
    }

    async fn fetch_schema(&self, database_id: &str) -> Result<DatabaseSchema> {
        let response = self
            .request(Method::GET, &format!("/databases/{}", database_id))
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, message) = Self::failure(response).await;
            warn!(status, message = %message, "Failed to fetch schema");
            return Err(AppError::SchemaFetch {
                database_id: database_id.to_string(),
                status,
                message,
            });
        }

        let body: DatabaseResponse = response.json().await?;
        Ok(body
            .properties
            .into_iter()
            .map(|(name, definition)| (name, definition.kind))
            .collect())
    }

    async fn search(&self, database_id: &str, text: &str) -> Result<Vec<PageRef>> {
        let body = serde_json::json!({
            "filter": {
                "property": self.lookup_title_property,
                "title": { "contains": text },
            },
            "page_size": self.search_page_size,
        });

        let response = self
            .request(Method::POST, &format!("/databases/{}/query", database_id))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, message) = Self::failure(response).await;
            warn!(status, message = %message, "Failed to search database");
            return Err(AppError::RelationLookup {
                database_id: database_id.to_string(),
                status,
                message,
            });
        }

        let body: QueryResponse = response.json().await?;
        Ok(body.results)
    }

    async fn insert(&self, payload: &InsertPayload) -> Result<InsertedPage> {
        let response = self
            .request(Method::POST, "/pages")
            .json(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, message) = Self::failure(response).await;
            return Err(AppError::Insert { status, message });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl DatabaseService for NotionClient {
    #[instrument(skip(self))]
    async fn retrieve_schema(&self, database_id: &str) -> Result<DatabaseSchema> {
        let start = Instant::now();
        let result = self.fetch_schema(database_id).await;
        metrics::record_upstream("notion", "retrieve_schema", start.elapsed().as_secs_f64(), result.is_ok());
        result
    }

    #[instrument(skip(self))]
    async fn query_title_contains(&self, database_id: &str, text: &str) -> Result<Vec<PageRef>> {
        let start = Instant::now();
        let result = self.search(database_id, text).await;
        metrics::record_upstream("notion", "query_database", start.elapsed().as_secs_f64(), result.is_ok());
        result
    }

    #[instrument(skip(self, payload))]
    async fn create_page(&self, payload: &InsertPayload) -> Result<InsertedPage> {
        let start = Instant::now();
        let result = self.insert(payload).await;
        metrics::record_upstream("notion", "create_page", start.elapsed().as_secs_f64(), result.is_ok());
        result
    }
}
