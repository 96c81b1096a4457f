//! Credential lifecycle.
//!
//! Credentials live only in the secure store, as one serialized record under
//! [`CREDENTIALS_KEY`]. Saving is a single store write, so a failed save
//! leaves the previous record intact. They are read on demand for a single
//! request and dropped when it completes; nothing here caches them.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ots_vault::{SecureStore, VaultError};
use reqwest::header::HeaderValue;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::client::ApiClient;
use crate::config;
use crate::error::{OtsError, Result};

/// Store key for the credential record.
pub const CREDENTIALS_KEY: &str = "ots_api_credentials";

/// Persisted form of [`Credentials`].
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct StoredCredentials {
    username: String,
    api_token: String,
    endpoint: String,
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Account credentials for the API.
pub struct Credentials {
    pub username: String,
    api_token: SecretString,
    pub endpoint: Url,
}

impl Credentials {
    pub fn new(username: impl Into<String>, api_token: SecretString, endpoint: Url) -> Self {
        Self {
            username: username.into(),
            api_token,
            endpoint,
        }
    }

    pub fn api_token(&self) -> &SecretString {
        &self.api_token
    }

    /// `Authorization: Basic base64(username:token)`, marked sensitive.
    pub(crate) fn authorization_header(&self) -> Result<HeaderValue> {
        let pair = Zeroizing::new(format!(
            "{}:{}",
            self.username,
            self.api_token.expose_secret()
        ));
        let header = Zeroizing::new(format!("Basic {}", STANDARD.encode(pair.as_bytes())));
        let mut value = HeaderValue::from_str(&header)
            .map_err(|_| OtsError::invalid_field("username", "username contains invalid characters"))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("api_token", &"[REDACTED]")
            .field("endpoint", &self.endpoint.as_str())
            .finish()
    }
}

/// Read credentials from `store`. No record means "none".
pub async fn read_credentials(store: &dyn SecureStore) -> Result<Option<Credentials>> {
    let Some(raw) = store.get(CREDENTIALS_KEY).await? else {
        return Ok(None);
    };

    // serde_json errors can quote the input, so they are not passed on.
    let mut record: StoredCredentials = serde_json::from_str(&raw)
        .map_err(|_| corrupt(format!("stored `{CREDENTIALS_KEY}` is not a credential record")))?;
    let endpoint = Url::parse(&record.endpoint)
        .map_err(|_| corrupt(format!("stored `{CREDENTIALS_KEY}` has an invalid endpoint")))?;

    Ok(Some(Credentials {
        username: std::mem::take(&mut record.username),
        api_token: SecretString::new(std::mem::take(&mut record.api_token)),
        endpoint,
    }))
}

fn corrupt(reason: String) -> OtsError {
    OtsError::Storage(VaultError::Corrupt { reason })
}

// ---------------------------------------------------------------------------
// CredentialManager
// ---------------------------------------------------------------------------

/// Login / logout orchestration over the store and the API client.
pub struct CredentialManager {
    store: Arc<dyn SecureStore>,
    client: ApiClient,
}

impl CredentialManager {
    /// `client` must share `store`, so probes use the saved credentials.
    pub fn new(store: Arc<dyn SecureStore>, client: ApiClient) -> Self {
        Self { store, client }
    }

    /// Validate and persist credentials, then probe connectivity.
    ///
    /// The record is written with one store call: either the new credentials
    /// are saved whole or the previous ones are left untouched. They stay
    /// saved when the probe fails; the probe error is still returned so the
    /// caller can tell the user.
    ///
    /// # Errors
    ///
    /// - [`OtsError::Validation`] for an empty username or token, or an
    ///   endpoint that is not an absolute http(s) URL. Nothing is written.
    /// - [`OtsError::Storage`] if the store rejects the write.
    /// - Any classified error from the connectivity probe.
    pub async fn save_credentials(
        &self,
        username: &str,
        api_token: SecretString,
        endpoint: &str,
    ) -> Result<()> {
        let username = username.trim();
        if username.is_empty() {
            return Err(OtsError::invalid_field("username", "username cannot be empty"));
        }
        if api_token.expose_secret().trim().is_empty() {
            return Err(OtsError::invalid_field("api_token", "API token cannot be empty"));
        }
        let endpoint = config::parse_endpoint(endpoint).map_err(|e| match e {
            OtsError::Config { reason } => OtsError::invalid_field("endpoint", reason),
            other => other,
        })?;

        let record = StoredCredentials {
            username: username.to_string(),
            api_token: api_token.expose_secret().clone(),
            endpoint: endpoint.to_string(),
        };
        let encoded = Zeroizing::new(
            serde_json::to_string(&record)
                .map_err(|e| OtsError::serialization(format!("failed to encode credentials: {e}")))?,
        );
        drop(record);
        self.store.set(CREDENTIALS_KEY, &encoded).await?;
        tracing::info!(
            host = endpoint.host_str().unwrap_or_default(),
            "credentials saved"
        );

        match self.client.check_status().await {
            Ok(status) => {
                tracing::info!(status = %status.status, "connectivity probe succeeded");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(code = e.code(), "connectivity probe failed, credentials kept");
                Err(e)
            }
        }
    }

    /// Stored credentials, or `None` on first run.
    pub async fn load_credentials(&self) -> Result<Option<Credentials>> {
        read_credentials(self.store.as_ref()).await
    }

    /// Whether a credential record is stored. Same entry [`read_credentials`] uses.
    pub async fn has_credentials(&self) -> Result<bool> {
        Ok(self.store.has(CREDENTIALS_KEY).await?)
    }

    /// Remove the credential record. Idempotent.
    pub async fn logout(&self) -> Result<()> {
        self.store.remove(CREDENTIALS_KEY).await?;
        tracing::info!("credentials removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials::new(
            "alice@example.com",
            SecretString::new("tok-very-secret".into()),
            Url::parse("https://onetimesecret.com/api/v2").unwrap(),
        )
    }

    #[test]
    fn debug_redacts_token() {
        let debug = format!("{:?}", creds());
        assert!(debug.contains("alice@example.com"));
        assert!(!debug.contains("tok-very-secret"));
    }

    #[test]
    fn basic_auth_header() {
        let header = creds().authorization_header().unwrap();
        let expected = format!(
            "Basic {}",
            STANDARD.encode("alice@example.com:tok-very-secret")
        );
        assert_eq!(header.to_str().unwrap(), expected);
        assert!(header.is_sensitive());
    }
}
