//! Database schema model and TTL cache

use super::DatabaseService;
use crate::errors::Result;
use crate::metrics;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

/// Declared type of a database property
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PropertyType {
    Title,
    RichText,
    Number,
    Date,
    Files,
    Relation,
    Select,
    MultiSelect,
    /// Any tag this crate does not map; such properties are skipped
    Unsupported(String),
}

impl PropertyType {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "title" => PropertyType::Title,
            "rich_text" => PropertyType::RichText,
            "number" => PropertyType::Number,
            "date" => PropertyType::Date,
            "files" => PropertyType::Files,
            "relation" => PropertyType::Relation,
            "select" => PropertyType::Select,
            "multi_select" => PropertyType::MultiSelect,
            other => PropertyType::Unsupported(other.to_string()),
        }
    }

    /// Wire tag, as the service reports it
    pub fn tag(&self) -> &str {
        match self {
            PropertyType::Title => "title",
            PropertyType::RichText => "rich_text",
            PropertyType::Number => "number",
            PropertyType::Date => "date",
            PropertyType::Files => "files",
            PropertyType::Relation => "relation",
            PropertyType::Select => "select",
            PropertyType::MultiSelect => "multi_select",
            PropertyType::Unsupported(tag) => tag,
        }
    }
}

impl From<String> for PropertyType {
    fn from(tag: String) -> Self {
        PropertyType::from_tag(&tag)
    }
}

impl From<PropertyType> for String {
    fn from(value: PropertyType) -> Self {
        value.tag().to_string()
    }
}

/// Property name -> declared type of one database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseSchema {
    properties: BTreeMap<String, PropertyType>,
}

impl DatabaseSchema {
    pub fn new(properties: BTreeMap<String, PropertyType>) -> Self {
        Self { properties }
    }

    pub fn property_type(&self, name: &str) -> Option<&PropertyType> {
        self.properties.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyType)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, PropertyType)> for DatabaseSchema {
    fn from_iter<I: IntoIterator<Item = (K, PropertyType)>>(iter: I) -> Self {
        Self {
            properties: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

struct CachedSchema {
    schema: Arc<DatabaseSchema>,
    fetched_at: Instant,
}

/// Schema cache keyed by database id.
///
/// A zero TTL disables caching: every call goes to the service.
/// Failed fetches are never cached.
pub struct SchemaCache {
    service: Arc<dyn DatabaseService>,
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedSchema>>,
}

impl SchemaCache {
    pub fn new(service: Arc<dyn DatabaseService>, ttl: Duration) -> Self {
        Self {
            service,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Get a schema, from cache when fresh
    #[instrument(skip(self))]
    pub async fn fetch_schema(&self, database_id: &str) -> Result<Arc<DatabaseSchema>> {
        if !self.ttl.is_zero() {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(database_id) {
                if entry.fetched_at.elapsed() < self.ttl {
                    metrics::record_cache(true, "schema");
                    debug!("Schema cache hit");
                    return Ok(entry.schema.clone());
                }
            }
        }
        metrics::record_cache(false, "schema");

        let schema = Arc::new(self.service.retrieve_schema(database_id).await?);
        info!(properties = schema.len(), "Schema fetched successfully");

        if !self.ttl.is_zero() {
            self.entries.write().await.insert(
                database_id.to_string(),
                CachedSchema {
                    schema: schema.clone(),
                    fetched_at: Instant::now(),
                },
            );
        }

        Ok(schema)
    }

    /// Drop the cached schema of one database
    pub async fn invalidate(&self, database_id: &str) -> bool {
        self.entries.write().await.remove(database_id).is_some()
    }

    /// Drop every cached schema
    pub async fn invalidate_all(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::notion::MockDatabaseService;

    fn schema() -> DatabaseSchema {
        [
            ("Name", PropertyType::Title),
            ("Amount", PropertyType::Number),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_property_type_tags_round_trip() {
        for tag in [
            "title",
            "rich_text",
            "number",
            "date",
            "files",
            "relation",
            "select",
            "multi_select",
        ] {
            let parsed = PropertyType::from_tag(tag);
            assert!(!matches!(parsed, PropertyType::Unsupported(_)));
            assert_eq!(parsed.tag(), tag);
        }
        assert_eq!(
            PropertyType::from_tag("formula"),
            PropertyType::Unsupported("formula".into())
        );
    }

    #[test]
    fn test_property_type_deserializes_from_tag() {
        let parsed: PropertyType = serde_json::from_str("\"checkbox\"").unwrap();
        assert_eq!(parsed.tag(), "checkbox");
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_fetches() {
        let service = Arc::new(MockDatabaseService::new().with_schema("db", schema()));
        let cache = SchemaCache::new(service.clone(), Duration::from_secs(60));

        let first = cache.fetch_schema("db").await.unwrap();
        let second = cache.fetch_schema("db").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(service.schema_fetches(), 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_always_refetches() {
        let service = Arc::new(MockDatabaseService::new().with_schema("db", schema()));
        let cache = SchemaCache::new(service.clone(), Duration::ZERO);

        cache.fetch_schema("db").await.unwrap();
        cache.fetch_schema("db").await.unwrap();

        assert_eq!(service.schema_fetches(), 2);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let service = Arc::new(MockDatabaseService::new().with_schema("db", schema()));
        let cache = SchemaCache::new(service.clone(), Duration::from_millis(5));

        cache.fetch_schema("db").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.fetch_schema("db").await.unwrap();

        assert_eq!(service.schema_fetches(), 2);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let service = Arc::new(MockDatabaseService::new().with_schema("db", schema()));
        let cache = SchemaCache::new(service.clone(), Duration::from_secs(60));

        cache.fetch_schema("db").await.unwrap();
        assert!(cache.invalidate("db").await);
        assert!(!cache.invalidate("db").await);
        cache.fetch_schema("db").await.unwrap();

        assert_eq!(service.schema_fetches(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let service = Arc::new(MockDatabaseService::new());
        let cache = SchemaCache::new(service.clone(), Duration::from_secs(60));

        for _ in 0..2 {
            let err = cache.fetch_schema("missing").await.unwrap_err();
            assert!(matches!(err, AppError::SchemaFetch { status: 404, .. }));
        }
        assert_eq!(service.schema_fetches(), 2);
    }
}
