//! Relation resolution against lookup tables

use super::DatabaseService;
use crate::config::NotionConfig;
use crate::errors::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Relation property bound to the category lookup table
pub const CATEGORY_PROPERTY: &str = "Category";

/// Relation property bound to the expense-mode lookup table
pub const MODE_PROPERTY: &str = "Mode";

/// Relation property name -> lookup table id, fixed at startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationBindings {
    bindings: HashMap<String, String>,
}

impl RelationBindings {
    /// Bind "Category" and "Mode"; blank ids leave the property unbound
    pub fn new(category_database_id: &str, mode_database_id: &str) -> Self {
        let bindings = [
            (CATEGORY_PROPERTY, category_database_id),
            (MODE_PROPERTY, mode_database_id),
        ]
        .into_iter()
        .filter(|(_, id)| !id.trim().is_empty())
        .map(|(name, id)| (name.to_string(), id.to_string()))
        .collect();

        Self { bindings }
    }

    pub fn from_config(config: &NotionConfig) -> Self {
        Self::new(&config.category_database_id, &config.mode_database_id)
    }

    /// Lookup table for a relation property, if it is resolvable
    pub fn lookup_table(&self, property: &str) -> Option<&str> {
        self.bindings.get(property).map(String::as_str)
    }
}

/// Finds lookup rows by title
#[derive(Clone)]
pub struct RelationResolver {
    service: Arc<dyn DatabaseService>,
}

impl RelationResolver {
    pub fn new(service: Arc<dyn DatabaseService>) -> Self {
        Self { service }
    }

    /// Id of the first row whose title contains `display_value`.
    ///
    /// `Ok(None)` when nothing matches. Ties go to whichever row the
    /// service lists first.
    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        lookup_table_id: &str,
        display_value: &str,
    ) -> Result<Option<String>> {
        let rows = self
            .service
            .query_title_contains(lookup_table_id, display_value)
            .await?;

        if rows.is_empty() {
            debug!("No matching pages found");
        }

        Ok(rows.into_iter().next().map(|row| row.id))
    }
}
