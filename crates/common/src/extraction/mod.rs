//! Receipt field extraction
//!
//! A flat name -> value view of one document, produced by an OCR provider:
//! - Mindee expense receipts (production)
//! - Mock (offline runs and tests)

mod mindee;

pub use mindee::MindeeExtractor;

use crate::config::ExtractionConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Field names produced by the extractors and consumed by the payload mapper
pub mod fields {
    pub const NAME: &str = "Name";
    pub const INVOICE_NO: &str = "Invoice No";
    pub const AMOUNT: &str = "Amount";
    pub const TAX: &str = "Tax";
    pub const NET: &str = "Net";
    pub const CATEGORY: &str = "Category";
    pub const DATE: &str = "Date";
    pub const MODE: &str = "Mode";
    /// Storage locator of the uploaded image, added after upload
    pub const RECEIPT: &str = "Receipt";
}

/// Name and public URL of a stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub name: String,
    pub url: String,
}

/// One extracted value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Number(f64),
    Text(String),
    List(Vec<String>),
    File(FileDescriptor),
}

impl FieldValue {
    /// True for null, blank text and empty lists
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::List(items) => items.is_empty(),
            FieldValue::Number(_) | FieldValue::File(_) => false,
        }
    }

    /// Scalar rendered as text; None for null, lists and files
    pub fn as_text(&self) -> Option<String> {
        match self {
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<Option<f64>> for FieldValue {
    fn from(value: Option<f64>) -> Self {
        value.map_or(FieldValue::Null, FieldValue::Number)
    }
}

impl From<Option<String>> for FieldValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(FieldValue::Null, FieldValue::Text)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        FieldValue::List(value)
    }
}

impl From<FileDescriptor> for FieldValue {
    fn from(value: FileDescriptor) -> Self {
        FieldValue::File(value)
    }
}

/// Extracted fields of one document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractionResult {
    fields: BTreeMap<String, FieldValue>,
}

impl ExtractionResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of this result with one more field (replacing any previous value)
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether any field outside `ignored` carries a value
    pub fn has_usable_fields(&self, ignored: &[&str]) -> bool {
        self.fields
            .iter()
            .any(|(name, value)| !ignored.contains(&name.as_str()) && !value.is_empty())
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for ExtractionResult {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Trait for receipt extraction providers
#[async_trait]
pub trait ReceiptExtractor: Send + Sync {
    /// Extract the fixed receipt field set from a document
    async fn extract(&self, document: &[u8], filename: &str) -> Result<ExtractionResult>;

    /// Provider name, for logs and metrics
    fn provider_name(&self) -> &str;
}

/// Extractor returning a fixed result, for offline runs and tests
pub struct MockExtractor {
    result: ExtractionResult,
}

impl MockExtractor {
    pub fn new(result: ExtractionResult) -> Self {
        Self { result }
    }

    /// A small coffee-shop receipt carrying the configured mode
    pub fn sample(mode: &str) -> Self {
        Self::new(
            ExtractionResult::new()
                .with_field(fields::NAME, "Coffee Shop")
                .with_field(fields::INVOICE_NO, "A-1001")
                .with_field(fields::AMOUNT, 4.5)
                .with_field(fields::TAX, 0.5)
                .with_field(fields::NET, 4.0)
                .with_field(fields::CATEGORY, "Dining")
                .with_field(fields::DATE, "2024-03-01")
                .with_field(fields::MODE, mode),
        )
    }
}

#[async_trait]
impl ReceiptExtractor for MockExtractor {
    async fn extract(&self, _document: &[u8], _filename: &str) -> Result<ExtractionResult> {
        Ok(self.result.clone())
    }

    fn provider_name(&self) -> &str {
        "mock"
    }
}

/// Create an extractor based on configuration
pub fn create_extractor(config: &ExtractionConfig) -> Result<Arc<dyn ReceiptExtractor>> {
    match config.provider.as_str() {
        "mindee" => {
            let key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "extraction.api_key is required for the mindee provider".to_string(),
            })?;
            Ok(Arc::new(MindeeExtractor::new(key, config)?))
        }
        "mock" => Ok(Arc::new(MockExtractor::sample(&config.default_mode))),
        other => Err(AppError::Configuration {
            message: format!("unknown extraction provider '{}'", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value_json_shapes() {
        let parsed: ExtractionResult = serde_json::from_value(serde_json::json!({
            "Name": "Coffee Shop",
            "Amount": 4.5,
            "Tax": null,
            "Tags": ["a", "b"],
            "Receipt": {"name": "r.jpg", "url": "https://example.com/r"}
        }))
        .unwrap();

        assert_eq!(parsed.get("Name"), Some(&FieldValue::Text("Coffee Shop".into())));
        assert_eq!(parsed.get("Amount"), Some(&FieldValue::Number(4.5)));
        assert_eq!(parsed.get("Tax"), Some(&FieldValue::Null));
        assert_eq!(
            parsed.get("Tags"),
            Some(&FieldValue::List(vec!["a".into(), "b".into()]))
        );
        assert!(matches!(parsed.get("Receipt"), Some(FieldValue::File(_))));
    }

    #[test]
    fn test_with_field_leaves_original_untouched() {
        let original = ExtractionResult::new().with_field(fields::NAME, "Shop");
        let extended = original.clone().with_field(fields::AMOUNT, 3.0);
        assert_eq!(original.len(), 1);
        assert_eq!(extended.len(), 2);
    }

    #[test]
    fn test_usable_fields_ignore_constants() {
        let result = ExtractionResult::new()
            .with_field(fields::NAME, "")
            .with_field(fields::AMOUNT, None::<f64>)
            .with_field(fields::MODE, "Credit Card");
        assert!(!result.has_usable_fields(&[fields::MODE]));
        assert!(result.has_usable_fields(&[]));
    }

    #[test]
    fn test_number_as_text() {
        assert_eq!(FieldValue::Number(12.0).as_text().as_deref(), Some("12"));
        assert_eq!(FieldValue::Number(4.5).as_text().as_deref(), Some("4.5"));
        assert_eq!(FieldValue::Null.as_text(), None);
    }

    #[tokio::test]
    async fn test_mock_extractor_sample() {
        let extractor = MockExtractor::sample("Cash");
        let result = extractor.extract(b"img", "r.jpg").await.unwrap();
        assert_eq!(result.get(fields::MODE), Some(&FieldValue::Text("Cash".into())));
        assert_eq!(extractor.provider_name(), "mock");
    }

    #[test]
    fn test_create_extractor_requires_key() {
        let config = ExtractionConfig::default();
        assert!(create_extractor(&config).is_err());
    }
}
