//! Schema-driven insert payload mapping
//!
//! Converts a flat [`ExtractionResult`] into an [`InsertPayload`] whose
//! property wrappers follow the declared type of each schema property.
//! Fields missing from the schema are dropped. Values that do not fit their
//! declared type, unbound relations and relations without a matching lookup
//! row are left out of the payload; none of these fail the mapping.

use super::relation::{RelationBindings, RelationResolver};
use super::schema::{DatabaseSchema, PropertyType, SchemaCache};
use crate::errors::Result;
use crate::extraction::{ExtractionResult, FieldValue};
use crate::metrics;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Body of a page-create call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsertPayload {
    pub parent: Parent,
    pub properties: BTreeMap<String, PropertyValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Parent {
    pub database_id: String,
}

/// Type-tagged property value, serialized as `{"<type>": ...}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    Title(Vec<RichText>),
    RichText(Vec<RichText>),
    Number(Option<f64>),
    Date(DateValue),
    Files(Vec<FileObject>),
    Relation(Vec<RelationRef>),
    Select(SelectOption),
    MultiSelect(Vec<SelectOption>),
}

impl PropertyValue {
    /// Schema type this wrapper satisfies
    pub fn property_type(&self) -> PropertyType {
        match self {
            PropertyValue::Title(_) => PropertyType::Title,
            PropertyValue::RichText(_) => PropertyType::RichText,
            PropertyValue::Number(_) => PropertyType::Number,
            PropertyValue::Date(_) => PropertyType::Date,
            PropertyValue::Files(_) => PropertyType::Files,
            PropertyValue::Relation(_) => PropertyType::Relation,
            PropertyValue::Select(_) => PropertyType::Select,
            PropertyValue::MultiSelect(_) => PropertyType::MultiSelect,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RichText {
    Text { text: TextContent },
}

impl RichText {
    pub fn plain(content: impl Into<String>) -> Self {
        RichText::Text {
            text: TextContent {
                content: content.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextContent {
    pub content: String,
}

/// Date range with only the start bound set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateValue {
    pub start: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileObject {
    External { name: String, external: ExternalFile },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalFile {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectOption {
    pub name: String,
}

fn warn_mismatch(name: &str, property_type: &PropertyType, value: &FieldValue) {
    warn!(
        property = name,
        property_type = property_type.tag(),
        value = ?value,
        "Value does not fit declared property type, skipped"
    );
}

fn text_run(value: &FieldValue) -> Option<Vec<RichText>> {
    value.as_text().map(|content| vec![RichText::plain(content)])
}

fn number(value: &FieldValue) -> Option<Option<f64>> {
    match value {
        FieldValue::Number(n) => Some(Some(*n)),
        FieldValue::Null => Some(None),
        FieldValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()).map(Some),
        _ => None,
    }
}

fn date(value: &FieldValue) -> Option<DateValue> {
    match value {
        FieldValue::Text(start) if !start.trim().is_empty() => Some(DateValue {
            start: start.clone(),
        }),
        _ => None,
    }
}

fn files(value: &FieldValue) -> Option<Vec<FileObject>> {
    match value {
        FieldValue::File(file) => Some(vec![FileObject::External {
            name: file.name.clone(),
            external: ExternalFile {
                url: file.url.clone(),
            },
        }]),
        _ => None,
    }
}

fn select(value: &FieldValue) -> Option<SelectOption> {
    value
        .as_text()
        .filter(|name| !name.trim().is_empty())
        .map(|name| SelectOption { name })
}

fn multi_select(value: &FieldValue) -> Option<Vec<SelectOption>> {
    match value {
        FieldValue::List(items) => Some(
            items
                .iter()
                .map(|name| SelectOption { name: name.clone() })
                .collect(),
        ),
        _ => None,
    }
}

/// Builds insert payloads for one target database
pub struct PayloadMapper {
    schemas: Arc<SchemaCache>,
    resolver: RelationResolver,
    bindings: RelationBindings,
    database_id: String,
}

impl PayloadMapper {
    pub fn new(
        schemas: Arc<SchemaCache>,
        resolver: RelationResolver,
        bindings: RelationBindings,
        database_id: impl Into<String>,
    ) -> Self {
        Self {
            schemas,
            resolver,
            bindings,
            database_id: database_id.into(),
        }
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    /// Fetch the target schema and map `extraction` onto it.
    ///
    /// A schema fetch failure returns the error and no payload.
    pub async fn create_entry_payload(&self, extraction: &ExtractionResult) -> Result<InsertPayload> {
        let schema = self.schemas.fetch_schema(&self.database_id).await?;
        Ok(self.build_payload(&schema, extraction, &self.database_id).await)
    }

    /// Map every extraction field present in `schema` onto its declared type
    #[instrument(skip(self, schema, extraction), fields(fields = extraction.len()))]
    pub async fn build_payload(
        &self,
        schema: &DatabaseSchema,
        extraction: &ExtractionResult,
        parent_database_id: &str,
    ) -> InsertPayload {
        let mut properties = BTreeMap::new();

        for (name, value) in extraction.iter() {
            let Some(property_type) = schema.property_type(name) else {
                debug!(property = name, "Field not in schema, dropped");
                continue;
            };

            if let Some(mapped) = self.map_property(name, property_type, value).await {
                properties.insert(name.to_string(), mapped);
            }
        }

        InsertPayload {
            parent: Parent {
                database_id: parent_database_id.to_string(),
            },
            properties,
        }
    }

    async fn map_property(
        &self,
        name: &str,
        property_type: &PropertyType,
        value: &FieldValue,
    ) -> Option<PropertyValue> {
        let mapped = match property_type {
            PropertyType::Title => text_run(value).map(PropertyValue::Title),
            PropertyType::RichText => text_run(value).map(PropertyValue::RichText),
            PropertyType::Number => number(value).map(PropertyValue::Number),
            PropertyType::Date => date(value).map(PropertyValue::Date),
            PropertyType::Files => files(value).map(PropertyValue::Files),
            PropertyType::Select => select(value).map(PropertyValue::Select),
            PropertyType::MultiSelect => multi_select(value).map(PropertyValue::MultiSelect),
            PropertyType::Relation => return self.map_relation(name, value).await,
            PropertyType::Unsupported(tag) => {
                debug!(property = name, property_type = %tag, "Unsupported property type, skipped");
                return None;
            }
        };

        if mapped.is_none() {
            warn_mismatch(name, property_type, value);
        }
        mapped
    }

    async fn map_relation(&self, name: &str, value: &FieldValue) -> Option<PropertyValue> {
        let Some(lookup_table) = self.bindings.lookup_table(name) else {
            debug!(property = name, "No lookup table bound to relation, skipped");
            return None;
        };

        let Some(display_text) = value.as_text().filter(|s| !s.trim().is_empty()) else {
            warn_mismatch(name, &PropertyType::Relation, value);
            return None;
        };

        match self.resolver.resolve(lookup_table, &display_text).await {
            Ok(Some(id)) => {
                metrics::record_relation_lookup(name, "found");
                Some(PropertyValue::Relation(vec![RelationRef { id }]))
            }
            Ok(None) => {
                metrics::record_relation_lookup(name, "not_found");
                info!(
                    property = name,
                    value = %display_text,
                    "Related page ID not found, property omitted"
                );
                None
            }
            Err(e) => {
                metrics::record_relation_lookup(name, "error");
                warn!(
                    property = name,
                    value = %display_text,
                    error = %e,
                    "Relation lookup failed, property omitted"
                );
                None
            }
        }
    }
}
