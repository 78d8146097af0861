//! OAuth for the Sheets API: static tokens, API keys and service-account
//! keys exchanged for short-lived access tokens.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{EtlError, Result};

pub const SHEETS_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets.readonly";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Google caps assertion lifetime at one hour
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Refresh this long before the token expires
const EXPIRY_MARGIN_SECS: i64 = 60;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The fields of a downloaded service-account JSON key the exchange needs
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!(
                "Failed to read service account key '{}': {}",
                path.display(),
                e
            ))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            EtlError::Config(format!(
                "Service account key '{}' is not a Google JSON key: {}",
                path.display(),
                e
            ))
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: i64,
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Exchanges a signed RS256 assertion for an access token and reuses it
/// until shortly before it expires.
pub struct ServiceAccountAuth {
    key: ServiceAccountKey,
    client: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountAuth {
    pub fn new(key: ServiceAccountKey, client: reqwest::Client) -> Self {
        Self {
            key,
            client,
            cached: Mutex::new(None),
        }
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    /// Signed JWT asking for read-only Sheets access.
    pub fn assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let claims = AssertionClaims {
            iss: self.key.client_email.clone(),
            scope: SHEETS_READONLY_SCOPE.to_string(),
            aud: self.key.token_uri.clone(),
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };
        let signing_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| EtlError::Config(format!("service account private key: {}", e)))?;
        encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
            .map_err(|e| EtlError::Config(format!("signing service account assertion: {}", e)))
    }

    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref() {
            if token.expires_at > now {
                return Ok(token.token.clone());
            }
        }

        let assertion = self.assertion(now)?;
        debug!("Exchanging service account assertion at {}", self.key.token_uri);
        let resp = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| EtlError::SourceUnreachable(format!("token exchange: {}", e)))?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| EtlError::SourceUnreachable(format!("token exchange: {}", e)))?;
        if !status.is_success() {
            return Err(EtlError::SourceUnreachable(format!(
                "token exchange for {}: HTTP {} {}",
                self.key.client_email,
                status.as_u16(),
                String::from_utf8_lossy(&body)
            )));
        }

        let token: TokenResponse = serde_json::from_slice(&body)?;
        let lifetime = token.expires_in.max(EXPIRY_MARGIN_SECS) - EXPIRY_MARGIN_SECS;
        info!("🔑 Obtained Sheets access token for {}", self.key.client_email);
        *cached = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at: now + Duration::seconds(lifetime),
        });
        Ok(token.access_token)
    }
}

/// How requests to the Sheets API are authorized
pub enum SheetsAuth {
    ServiceAccount(ServiceAccountAuth),
    AccessToken(String),
    ApiKey(String),
}

impl SheetsAuth {
    pub fn describe(&self) -> String {
        match self {
            SheetsAuth::ServiceAccount(sa) => format!("service account {}", sa.client_email()),
            SheetsAuth::AccessToken(_) => "access token".to_string(),
            SheetsAuth::ApiKey(_) => "API key".to_string(),
        }
    }

    pub async fn authorize(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        Ok(match self {
            SheetsAuth::ServiceAccount(sa) => request.bearer_auth(sa.access_token().await?),
            SheetsAuth::AccessToken(token) => request.bearer_auth(token),
            SheetsAuth::ApiKey(key) => request.query(&[("key", key.as_str())]),
        })
    }
}
