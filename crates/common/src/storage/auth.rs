//! Google service-account authentication
//!
//! Exchanges an RS256-signed assertion for a short-lived access token
//! (JWT bearer grant) and caches it until shortly before expiry.

use crate::errors::{AppError, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Drive scopes requested for every token
pub const DRIVE_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/drive.file",
    "https://www.googleapis.com/auth/drive",
];

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN_SECS: i64 = 60;

/// The fields of a service-account key file this crate uses
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| AppError::Configuration {
            message: format!("Invalid service account key: {}", e),
        })
    }

    pub async fn from_file(path: &str) -> Result<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to read service account key {}: {}", path, e),
            })?;
        Self::from_json(&json)
    }
}

/// Claims of the signed grant assertion
#[derive(Debug, Serialize, PartialEq, Eq)]
struct GrantClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

impl GrantClaims {
    fn new(key: &ServiceAccountKey, now: DateTime<Utc>) -> Self {
        let iat = now.timestamp();
        Self {
            iss: key.client_email.clone(),
            scope: DRIVE_SCOPES.join(" "),
            aud: key.token_uri.clone(),
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// Access-token source for Google APIs
pub struct GoogleServiceAccount {
    client: reqwest::Client,
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    token: RwLock<Option<CachedToken>>,
}

impl GoogleServiceAccount {
    /// Fails when the private key is not a valid RSA PEM
    pub fn new(client: reqwest::Client, key: ServiceAccountKey) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
        Ok(Self {
            client,
            key,
            encoding_key,
            token: RwLock::new(None),
        })
    }

    /// A valid access token, fetching a new one when the cached one is stale
    pub async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.token.read().await.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.value.clone());
            }
        }

        let mut slot = self.token.write().await;
        if let Some(token) = slot.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.value.clone());
            }
        }

        let token = self.fetch_token().await?;
        let value = token.value.clone();
        *slot = Some(token);
        Ok(value)
    }

    #[instrument(skip(self), fields(client_email = %self.key.client_email))]
    async fn fetch_token(&self) -> Result<CachedToken> {
        let now = Utc::now();
        let claims = GrantClaims::new(&self.key, now);
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)?;

        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| AppError::GoogleAuth {
                message: format!("Token request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::GoogleAuth {
                message: format!("Token endpoint returned {}: {}", status, body),
            });
        }

        let body: TokenResponse = response.json().await.map_err(|e| AppError::GoogleAuth {
            message: format!("Failed to parse token response: {}", e),
        })?;

        debug!(expires_in = body.expires_in, "Access token obtained");
        Ok(CachedToken {
            value: body.access_token,
            expires_at: now + Duration::seconds(body.expires_in),
        })
    }
}
