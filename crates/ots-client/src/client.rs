//! Resilient One-Time Secret API client.
//!
//! Every call goes through the same loop:
//!
//! 1. Validate input locally (invalid input never reaches the network).
//! 2. Prepare the request through the [`Pipeline`].
//! 3. Send one attempt through the [`HttpTransport`] and classify the result.
//! 4. On failure, ask the [`RetryPolicy`]; sleep and go to 3, or give up and
//!    return the last classified error.
//!
//! The delay and the in-flight attempt both race the client's
//! [`CancelToken`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ots_vault::SecureStore;
use rand::SeedableRng;
use rand::rngs::StdRng;
use reqwest::header::RETRY_AFTER;
use serde::de::DeserializeOwned;
use url::Url;

use crate::cancel::CancelToken;
use crate::config::ClientConfig;
use crate::error::{ErrorKind, OtsError, Result};
use crate::pinning;
use crate::pipeline::{ApiRequest, Pipeline, join_segments};
use crate::retry::{Idempotency, RetryDecision, RetryPolicy, RetryState};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
use crate::types::{
    CreateSecretRequest, ErrorBody, RecentResponse, SecretMetadata, SecretResponse, SecretValue,
    ServiceStatus,
};

/// Resilient API client. Cheap to clone; clones share configuration,
/// transport and jitter source.
#[derive(Clone)]
pub struct ApiClient {
    config: Arc<ClientConfig>,
    pipeline: Arc<Pipeline>,
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
    rng: Arc<Mutex<StdRng>>,
    cancel: CancelToken,
}

impl ApiClient {
    /// Build a client that talks to the network through `reqwest`.
    ///
    /// # Errors
    ///
    /// Returns [`OtsError::Config`] if `config` does not validate.
    pub fn new(config: ClientConfig, store: Arc<dyn SecureStore>) -> Result<Self> {
        config.validate()?;
        let verifier = pinning::verifier_for(&config)?;
        let transport = Arc::new(ReqwestTransport::new(&config, verifier)?);
        Self::with_transport(config, store, transport)
    }

    /// Build a client over an arbitrary transport.
    pub fn with_transport(
        config: ClientConfig,
        store: Arc<dyn SecureStore>,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        config.validate()?;
        let pipeline = Pipeline::standard(&config, store)?;
        Ok(Self {
            policy: RetryPolicy::new(config.retry.clone()),
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            transport,
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
            cancel: CancelToken::new(),
        })
    }

    /// Use a seeded jitter source.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = Arc::new(Mutex::new(StdRng::seed_from_u64(seed)));
        self
    }

    /// A clone whose calls abort when `token` is cancelled.
    pub fn with_cancel_token(&self, token: CancelToken) -> Self {
        Self {
            cancel: token,
            ..self.clone()
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Create a secret. Validated locally first.
    pub async fn create_secret(&self, request: &CreateSecretRequest) -> Result<SecretMetadata> {
        request.validate()?;
        let api = ApiRequest::post(&["secret"], Idempotency::Unsafe).with_body(request.to_body());
        let raw: SecretResponse = self.execute(api).await?;
        SecretMetadata::from_wire(raw)
    }

    /// Retrieve (and thereby burn) a secret.
    ///
    /// Retried only on failures that provably happened before the server
    /// acted: refused connections, 429 and 503.
    pub async fn retrieve_secret(
        &self,
        secret_key: &str,
        passphrase: Option<&str>,
    ) -> Result<SecretValue> {
        check_key("secret_key", secret_key)?;
        let mut api = ApiRequest::post(&["secret", secret_key], Idempotency::Unsafe);
        if let Some(passphrase) = passphrase {
            api = api.with_body(serde_json::json!({ "passphrase": passphrase }));
        }
        let raw: SecretResponse = self.execute(api).await?;
        SecretValue::from_wire(raw)
    }

    /// Read-only metadata lookup.
    pub async fn get_metadata(&self, metadata_key: &str) -> Result<SecretMetadata> {
        check_key("metadata_key", metadata_key)?;
        let api = ApiRequest::post(&["private", metadata_key], Idempotency::Safe);
        let raw: SecretResponse = self.execute(api).await?;
        SecretMetadata::from_wire(raw)
    }

    /// Burn a secret before it is read.
    pub async fn burn_secret(&self, metadata_key: &str) -> Result<SecretMetadata> {
        check_key("metadata_key", metadata_key)?;
        let api = ApiRequest::post(&["private", metadata_key, "burn"], Idempotency::Unsafe);
        let raw: SecretResponse = self.execute(api).await?;
        SecretMetadata::from_wire(raw)
    }

    /// Recently created secrets for the authenticated account.
    pub async fn recent_metadata(&self) -> Result<Vec<SecretMetadata>> {
        let raw: RecentResponse = self.execute(ApiRequest::get(&["private", "recent"])).await?;
        raw.into_records()
            .into_iter()
            .map(SecretMetadata::from_wire)
            .collect()
    }

    pub async fn check_status(&self) -> Result<ServiceStatus> {
        self.execute(ApiRequest::get(&["status"])).await
    }

    /// Fetch fresh metadata for `previous`, rejecting a state regression.
    pub async fn refresh_metadata(&self, previous: &SecretMetadata) -> Result<SecretMetadata> {
        let current = self.get_metadata(&previous.metadata_key).await?;
        if !previous.state.can_transition_to(current.state) {
            return Err(OtsError::serialization(format!(
                "secret state went from {} back to {}",
                previous.state, current.state
            )));
        }
        Ok(current)
    }

    /// Shareable link for the recipient.
    pub fn secret_link(&self, secret_key: &str) -> Result<Url> {
        join_segments(
            &self.config.share_base_url,
            &["secret".to_string(), secret_key.to_string()],
        )
    }

    /// Private link for the creator.
    pub fn metadata_link(&self, metadata_key: &str) -> Result<Url> {
        join_segments(
            &self.config.share_base_url,
            &["private".to_string(), metadata_key.to_string()],
        )
    }

    // -----------------------------------------------------------------------
    // Execution loop
    // -----------------------------------------------------------------------

    async fn execute<T: DeserializeOwned>(&self, api: ApiRequest) -> Result<T> {
        if self.cancel.is_cancelled() {
            return Err(OtsError::Cancelled);
        }

        let route = api.route();
        let http = self.pipeline.prepare(&api).await?;
        let mut state = RetryState::new();

        loop {
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(OtsError::Cancelled),
                outcome = self.attempt(&http) => outcome,
            };

            let err = match outcome {
                Ok(value) => {
                    tracing::debug!(route = %route, retries = state.attempt, "request succeeded");
                    return Ok(value);
                }
                Err(err) => err,
            };

            state.record_failure(err.kind(), err.retry_after());
            let decision = {
                let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
                self.policy.decide(&state, api.idempotency, &mut *rng)
            };

            let delay = match decision {
                RetryDecision::GiveUp => {
                    tracing::debug!(
                        route = %route,
                        retries = state.attempt,
                        code = err.code(),
                        "giving up"
                    );
                    return Err(err);
                }
                RetryDecision::Retry { delay } => delay,
            };

            tracing::warn!(
                route = %route,
                attempt = state.attempt + 1,
                max_retries = self.policy.config().max_retries,
                delay_ms = delay.as_millis() as u64,
                kind = ?err.kind(),
                "request failed, retrying"
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(OtsError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            state.record_retry(delay);
        }
    }

    /// One attempt: send, classify, decode. Bounded by the request timeout
    /// whatever the transport does.
    async fn attempt<T: DeserializeOwned>(&self, http: &HttpRequest) -> Result<T> {
        let timeout = self.config.request_timeout();
        let response = tokio::time::timeout(timeout, self.transport.send(http.clone()))
            .await
            .map_err(|_| {
                OtsError::network(
                    ErrorKind::Timeout,
                    format!("no response within {}s", timeout.as_secs()),
                )
            })??;
        let body = classify_response(response)?;
        serde_json::from_slice(&body)
            .map_err(|e| OtsError::serialization(format!("response does not match schema: {e}")))
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.config.base_url.as_str())
            .field("stages", &self.pipeline.stage_names())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

fn check_key(field: &str, key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(OtsError::invalid_field(field, format!("{field} cannot be empty")));
    }
    Ok(())
}

/// 2xx yields the body; everything else becomes a classified error.
pub(crate) fn classify_response(response: HttpResponse) -> Result<Vec<u8>> {
    let status = response.status;
    if (200..300).contains(&status) {
        return Ok(response.body);
    }

    let retry_after = response
        .headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    let parsed: ErrorBody = serde_json::from_slice(&response.body).unwrap_or_default();
    let message = match (parsed.message.or(parsed.error), parsed.code) {
        (Some(message), Some(code)) => format!("{message} ({code})"),
        (Some(message), None) => message,
        (None, _) => reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("unexpected status")
            .to_string(),
    };
    let body = (!response.body.is_empty())
        .then(|| String::from_utf8_lossy(&response.body).into_owned());

    Err(match status {
        401 | 403 => OtsError::Auth { status, message },
        422 => OtsError::Validation {
            message,
            fields: Default::default(),
        },
        429 => OtsError::RateLimited { retry_after, body },
        _ => OtsError::Api {
            status,
            message,
            body,
            retry_after: (status == 503).then_some(retry_after).flatten(),
        },
    })
}
