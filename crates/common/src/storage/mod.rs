//! Object storage for uploaded receipts
//!
//! Stored objects are world-readable: the public link is what ends up in
//! the database row.

mod auth;
mod gdrive;

pub use auth::{GoogleServiceAccount, ServiceAccountKey};
pub use gdrive::GoogleDriveStorage;

use crate::config::StorageConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Locator of an uploaded object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub object_id: String,
    pub public_url: String,
}

/// Trait for storage providers
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `bytes` under `filename` and return a publicly readable locator
    async fn upload(&self, bytes: &[u8], filename: &str, folder_id: Option<&str>) -> Result<StoredObject>;

    /// Id of the folder called `name`, created when missing
    async fn ensure_folder(&self, name: &str, parent_id: Option<&str>) -> Result<String>;
}

/// Content type guessed from the filename extension
pub fn content_type_for(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// In-memory storage for offline runs and testing
#[derive(Default)]
pub struct MockStorage {
    uploads: Mutex<Vec<(String, Option<String>)>>,
    counter: AtomicUsize,
    fail_uploads: bool,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every upload fail
    pub fn failing() -> Self {
        Self {
            fail_uploads: true,
            ..Self::default()
        }
    }

    /// (filename, folder) of every upload so far
    pub fn uploads(&self) -> Vec<(String, Option<String>)> {
        self.uploads
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ObjectStorage for MockStorage {
    async fn upload(&self, _bytes: &[u8], filename: &str, folder_id: Option<&str>) -> Result<StoredObject> {
        if self.fail_uploads {
            return Err(AppError::Storage {
                message: "upload rejected".to_string(),
            });
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut uploads) = self.uploads.lock() {
            uploads.push((filename.to_string(), folder_id.map(str::to_string)));
        }

        let object_id = format!("mock-object-{}", n);
        Ok(StoredObject {
            public_url: format!("https://storage.invalid/{}/{}", object_id, filename),
            object_id,
        })
    }

    async fn ensure_folder(&self, name: &str, _parent_id: Option<&str>) -> Result<String> {
        Ok(format!("mock-folder-{}", name))
    }
}

/// Create a storage backend based on configuration
pub async fn create_storage(config: &StorageConfig) -> Result<Arc<dyn ObjectStorage>> {
    match config.provider.as_str() {
        "gdrive" => {
            let key = match (&config.service_account_json, &config.service_account_path) {
                (Some(json), _) => ServiceAccountKey::from_json(json)?,
                (None, Some(path)) => ServiceAccountKey::from_file(path).await?,
                (None, None) => {
                    return Err(AppError::Configuration {
                        message: "a Google service account key is required for the gdrive provider"
                            .to_string(),
                    })
                }
            };
            Ok(Arc::new(GoogleDriveStorage::new(key, config)?))
        }
        "mock" => Ok(Arc::new(MockStorage::new())),
        other => Err(AppError::Configuration {
            message: format!("unknown storage provider '{}'", other),
        }),
    }
}
