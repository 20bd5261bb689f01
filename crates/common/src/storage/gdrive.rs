//! Google Drive storage backend

use super::auth::{GoogleServiceAccount, ServiceAccountKey};
use super::{content_type_for, ObjectStorage, StoredObject};
use crate::config::StorageConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::Response;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{info, instrument};

const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Drive v3 client uploading receipts into one folder
pub struct GoogleDriveStorage {
    client: reqwest::Client,
    auth: GoogleServiceAccount,
    api_base: String,
}

#[derive(Deserialize)]
struct DriveFile {
    id: String,
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileLinks {
    web_view_link: Option<String>,
    web_content_link: Option<String>,
}

/// Drive query matching a folder by name, optionally under a parent
fn folder_query(name: &str, parent_id: Option<&str>) -> String {
    let escaped = name.replace('\\', "\\\\").replace('\'', "\\'");
    let mut query = format!("name = '{}' and mimeType = '{}'", escaped, FOLDER_MIME_TYPE);
    if let Some(parent) = parent_id {
        query.push_str(&format!(" and '{}' in parents", parent));
    }
    query
}

fn parents(folder_id: Option<&str>) -> Vec<&str> {
    folder_id.into_iter().collect()
}

impl GoogleDriveStorage {
    pub fn new(key: ServiceAccountKey, config: &StorageConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        info!(client_email = %key.client_email, "Google Drive storage configured");
        let auth = GoogleServiceAccount::new(client.clone(), key)?;

        Ok(Self {
            client,
            auth,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn check(response: Response, action: &str) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(AppError::Storage {
            message: format!("{} failed with {}: {}", action, status, body),
        })
    }

    /// Open a resumable session and send the bytes in one request
    async fn create_file(&self, bytes: &[u8], filename: &str, folder_id: Option<&str>) -> Result<String> {
        let token = self.auth.access_token().await?;
        let content_type = content_type_for(filename);

        let session = self
            .client
            .post(format!("{}/upload/drive/v3/files", self.api_base))
            .query(&[("uploadType", "resumable"), ("fields", "id")])
            .bearer_auth(&token)
            .header("X-Upload-Content-Type", content_type.as_str())
            .header("X-Upload-Content-Length", bytes.len().to_string())
            .json(&serde_json::json!({
                "name": filename,
                "parents": parents(folder_id),
            }))
            .send()
            .await?;
        let session = Self::check(session, "Upload session").await?;

        let upload_url = session
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Storage {
                message: "Upload session returned no location".to_string(),
            })?
            .to_string();

        let response = self
            .client
            .put(upload_url)
            .bearer_auth(&token)
            .header(reqwest::header::CONTENT_TYPE, content_type.as_str())
            .body(bytes.to_vec())
            .send()
            .await?;
        let file: DriveFile = Self::check(response, "Upload").await?.json().await?;

        info!(file_id = %file.id, content_type = %content_type, "File uploaded successfully");
        Ok(file.id)
    }

    /// Grant anyone-with-the-link read access and return the view link
    async fn share(&self, file_id: &str) -> Result<String> {
        let token = self.auth.access_token().await?;

        let response = self
            .client
            .post(format!("{}/drive/v3/files/{}/permissions", self.api_base, file_id))
            .bearer_auth(&token)
            .json(&serde_json::json!({"role": "reader", "type": "anyone"}))
            .send()
            .await?;
        Self::check(response, "Permission grant").await?;

        let response = self
            .client
            .get(format!("{}/drive/v3/files/{}", self.api_base, file_id))
            .query(&[("fields", "webViewLink, webContentLink")])
            .bearer_auth(&token)
            .send()
            .await?;
        let links: FileLinks = Self::check(response, "Link lookup").await?.json().await?;

        links
            .web_view_link
            .or(links.web_content_link)
            .ok_or_else(|| AppError::Storage {
                message: format!("No sharable link for file {}", file_id),
            })
    }

    async fn find_folder(&self, name: &str, parent_id: Option<&str>) -> Result<Option<String>> {
        let token = self.auth.access_token().await?;
        let query = folder_query(name, parent_id);

        let response = self
            .client
            .get(format!("{}/drive/v3/files", self.api_base))
            .query(&[
                ("q", query.as_str()),
                ("spaces", "drive"),
                ("fields", "files(id, name)"),
                ("pageSize", "10"),
            ])
            .bearer_auth(&token)
            .send()
            .await?;
        let list: FileList = Self::check(response, "Folder search").await?.json().await?;

        Ok(list.files.into_iter().next().map(|f| f.id))
    }

    async fn create_folder(&self, name: &str, parent_id: Option<&str>) -> Result<String> {
        let token = self.auth.access_token().await?;

        let response = self
            .client
            .post(format!("{}/drive/v3/files", self.api_base))
            .query(&[("fields", "id")])
            .bearer_auth(&token)
            .json(&serde_json::json!({
                "name": name,
                "mimeType": FOLDER_MIME_TYPE,
                "parents": parents(parent_id),
            }))
            .send()
            .await?;
        let folder: DriveFile = Self::check(response, "Folder creation").await?.json().await?;

        Ok(folder.id)
    }
}

#[async_trait]
impl ObjectStorage for GoogleDriveStorage {
    #[instrument(skip(self, bytes), fields(bytes = bytes.len()))]
    async fn upload(&self, bytes: &[u8], filename: &str, folder_id: Option<&str>) -> Result<StoredObject> {
        let start = Instant::now();
        let result = async {
            let object_id = self.create_file(bytes, filename, folder_id).await?;
            let public_url = self.share(&object_id).await?;
            Ok(StoredObject {
                object_id,
                public_url,
            })
        }
        .await;
        metrics::record_upstream("gdrive", "upload", start.elapsed().as_secs_f64(), result.is_ok());
        result
    }

    #[instrument(skip(self))]
    async fn ensure_folder(&self, name: &str, parent_id: Option<&str>) -> Result<String> {
        if let Some(existing) = self.find_folder(name, parent_id).await? {
            info!(folder_id = %existing, "Folder already exists in Google Drive");
            return Ok(existing);
        }

        let created = self.create_folder(name, parent_id).await?;
        info!(folder_id = %created, "Created folder");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_query() {
        assert_eq!(
            folder_query("receipts", None),
            "name = 'receipts' and mimeType = 'application/vnd.google-apps.folder'"
        );
        assert_eq!(
            folder_query("receipts", Some("root-1")),
            "name = 'receipts' and mimeType = 'application/vnd.google-apps.folder' and 'root-1' in parents"
        );
    }

    #[test]
    fn test_folder_query_escapes_quotes() {
        assert!(folder_query("bob's receipts", None).starts_with("name = 'bob\\'s receipts'"));
    }

    #[test]
    fn test_parents() {
        assert!(parents(None).is_empty());
        assert_eq!(parents(Some("f")), vec!["f"]);
    }

    #[test]
    fn test_file_links_parsing() {
        let links: FileLinks = serde_json::from_value(serde_json::json!({
            "webViewLink": "https://drive.google.com/file/d/abc/view"
        }))
        .unwrap();
        assert_eq!(
            links.web_view_link.as_deref(),
            Some("https://drive.google.com/file/d/abc/view")
        );
        assert!(links.web_content_link.is_none());
    }
}
