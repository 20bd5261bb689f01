//! Mindee expense-receipt client

use super::{fields, ExtractionResult, FieldValue, ReceiptExtractor};
use crate::config::ExtractionConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Mindee receipt extractor
pub struct MindeeExtractor {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    default_mode: String,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    document: PredictDocument,
}

#[derive(Debug, Deserialize)]
struct PredictDocument {
    inference: Inference,
}

#[derive(Debug, Deserialize)]
struct Inference {
    prediction: ReceiptPrediction,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReceiptPrediction {
    supplier_name: TextField,
    receipt_number: TextField,
    total_amount: NumberField,
    total_tax: NumberField,
    total_net: NumberField,
    category: TextField,
    date: TextField,
}

#[derive(Debug, Default, Deserialize)]
struct TextField {
    value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NumberField {
    value: Option<f64>,
}

impl MindeeExtractor {
    /// Create a new Mindee extractor
    pub fn new(api_key: String, config: &ExtractionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            endpoint: config.endpoint.clone(),
            default_mode: config.default_mode.clone(),
        })
    }

    async fn predict(&self, document: &[u8], filename: &str) -> Result<ReceiptPrediction> {
        let content_type = mime_guess::from_path(filename).first_or_octet_stream();
        let part = Part::bytes(document.to_vec())
            .file_name(filename.to_string())
            .mime_str(content_type.as_ref())?;
        let form = Form::new().part("document", part);

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Token {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::Extraction {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Extraction {
                message: format!("API error {}: {}", status, body),
            });
        }

        let parsed: PredictResponse = response.json().await.map_err(|e| AppError::Extraction {
            message: format!("Failed to parse response: {}", e),
        })?;

        Ok(parsed.document.inference.prediction)
    }

    /// Flatten a prediction into the fixed receipt field set
    fn to_fields(&self, prediction: ReceiptPrediction) -> ExtractionResult {
        ExtractionResult::new()
            .with_field(fields::NAME, prediction.supplier_name.value.unwrap_or_default())
            .with_field(
                fields::INVOICE_NO,
                prediction.receipt_number.value.unwrap_or_default(),
            )
            .with_field(fields::AMOUNT, prediction.total_amount.value)
            .with_field(fields::TAX, prediction.total_tax.value)
            .with_field(fields::NET, prediction.total_net.value)
            .with_field(fields::CATEGORY, prediction.category.value)
            .with_field(fields::DATE, checked_date(prediction.date.value))
            .with_field(fields::MODE, self.default_mode.as_str())
    }
}

/// Keep ISO calendar dates, drop anything the database would reject
fn checked_date(raw: Option<String>) -> FieldValue {
    match raw {
        Some(date) => match NaiveDate::parse_from_str(&date, "%Y-%m-%d") {
            Ok(parsed) => FieldValue::Text(parsed.format("%Y-%m-%d").to_string()),
            Err(e) => {
                warn!(date = %date, error = %e, "Discarding unparseable receipt date");
                FieldValue::Null
            }
        },
        None => FieldValue::Null,
    }
}

#[async_trait]
impl ReceiptExtractor for MindeeExtractor {
    #[instrument(skip(self, document), fields(bytes = document.len()))]
    async fn extract(&self, document: &[u8], filename: &str) -> Result<ExtractionResult> {
        let start = Instant::now();
        let outcome = self.predict(document, filename).await;
        metrics::record_upstream("mindee", "predict", start.elapsed().as_secs_f64(), outcome.is_ok());

        let result = self.to_fields(outcome?);
        debug!(fields = ?result, "Bill details extracted");
        Ok(result)
    }

    fn provider_name(&self) -> &str {
        "mindee"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Multipart,
        http::{HeaderMap, StatusCode},
        routing::post,
        Json, Router,
    };
    use std::sync::{Arc, Mutex};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{}/predict", addr)
    }

    fn extractor_for(endpoint: String) -> MindeeExtractor {
        let config = ExtractionConfig {
            endpoint,
            ..ExtractionConfig::default()
        };
        MindeeExtractor::new("mindee-key".into(), &config).unwrap()
    }

    fn extractor() -> MindeeExtractor {
        MindeeExtractor::new("key".into(), &ExtractionConfig::default()).unwrap()
    }

    #[test]
    fn test_prediction_flattening() {
        let response: PredictResponse = serde_json::from_value(serde_json::json!({
            "document": {"inference": {"prediction": {
                "supplier_name": {"value": "Coffee Shop", "confidence": 0.9},
                "receipt_number": {"value": null},
                "total_amount": {"value": 4.5},
                "total_tax": {"value": 0.5},
                "total_net": {"value": null},
                "category": {"value": "food"},
                "date": {"value": "2024-03-01"}
            }}}
        }))
        .unwrap();

        let result = extractor().to_fields(response.document.inference.prediction);

        assert_eq!(result.get(fields::NAME), Some(&FieldValue::Text("Coffee Shop".into())));
        assert_eq!(result.get(fields::INVOICE_NO), Some(&FieldValue::Text(String::new())));
        assert_eq!(result.get(fields::AMOUNT), Some(&FieldValue::Number(4.5)));
        assert_eq!(result.get(fields::NET), Some(&FieldValue::Null));
        assert_eq!(result.get(fields::CATEGORY), Some(&FieldValue::Text("food".into())));
        assert_eq!(result.get(fields::DATE), Some(&FieldValue::Text("2024-03-01".into())));
        assert_eq!(result.get(fields::MODE), Some(&FieldValue::Text("Credit Card".into())));
        assert_eq!(result.len(), 8);
    }

    #[test]
    fn test_missing_prediction_fields_default() {
        let response: PredictResponse = serde_json::from_value(serde_json::json!({
            "document": {"inference": {"prediction": {}}}
        }))
        .unwrap();

        let result = extractor().to_fields(response.document.inference.prediction);
        assert_eq!(result.get(fields::NAME), Some(&FieldValue::Text(String::new())));
        assert_eq!(result.get(fields::AMOUNT), Some(&FieldValue::Null));
    }

    #[test]
    fn test_checked_date() {
        assert_eq!(checked_date(Some("2024-02-30".into())), FieldValue::Null);
        assert_eq!(checked_date(None), FieldValue::Null);
        assert_eq!(
            checked_date(Some("2023-12-31".into())),
            FieldValue::Text("2023-12-31".into())
        );
    }

    #[tokio::test]
    async fn test_document_sent_as_multipart_with_token() {
        let seen: Arc<Mutex<Option<(String, String, String, usize)>>> = Arc::default();
        let captured = seen.clone();
        let router = Router::new().route(
            "/predict",
            post(move |headers: HeaderMap, mut multipart: Multipart| {
                let captured = captured.clone();
                async move {
                    let field = multipart.next_field().await.unwrap().unwrap();
                    let name = field.name().unwrap_or_default().to_string();
                    let filename = field.file_name().unwrap_or_default().to_string();
                    let bytes = field.bytes().await.unwrap();
                    let auth = headers["authorization"].to_str().unwrap().to_string();
                    *captured.lock().unwrap() = Some((auth, name, filename, bytes.len()));
                    Json(serde_json::json!({
                        "document": {"inference": {"prediction": {
                            "supplier_name": {"value": "Coffee Shop"},
                            "total_amount": {"value": 4.5}
                        }}}
                    }))
                }
            }),
        );
        let extractor = extractor_for(serve(router).await);

        let result = extractor.extract(b"%PDF-1.4", "receipt.pdf").await.unwrap();

        assert_eq!(result.get(fields::NAME), Some(&FieldValue::Text("Coffee Shop".into())));
        let (auth, name, filename, len) = seen.lock().unwrap().take().unwrap();
        assert_eq!(auth, "Token mindee-key");
        assert_eq!(name, "document");
        assert_eq!(filename, "receipt.pdf");
        assert_eq!(len, 8);
    }

    #[tokio::test]
    async fn test_rejected_prediction_is_extraction_error() {
        let router = Router::new().route(
            "/predict",
            post(|| async { (StatusCode::UNAUTHORIZED, "invalid token") }),
        );
        let extractor = extractor_for(serve(router).await);

        match extractor.extract(b"img", "receipt.jpg").await {
            Err(AppError::Extraction { message }) => {
                assert!(message.contains("401"));
                assert!(message.contains("invalid token"));
            }
            other => panic!("expected Extraction, got {:?}", other),
        }
    }
}
