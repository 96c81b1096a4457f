//! Request preparation pipeline.
//!
//! An [`ApiRequest`] describes what to call; a [`Pipeline`] turns it into an
//! [`HttpRequest`] by running a fixed list of [`RequestStage`]s over a
//! [`RequestContext`]. The standard order is:
//!
//! 1. [`DefaultHeadersStage`]: `Accept`, `Content-Type`, `User-Agent`.
//! 2. [`AuthStage`]: credentials read from the secure store at call time.
//!
//! Retry and error mapping live in the client's execution loop, after
//! preparation.

use std::sync::Arc;

use async_trait::async_trait;
use ots_vault::SecureStore;
use reqwest::Method;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use url::Url;

use crate::config::ClientConfig;
use crate::credentials;
use crate::error::{OtsError, Result};
use crate::retry::Idempotency;
use crate::transport::HttpRequest;

// ---------------------------------------------------------------------------
// Request description
// ---------------------------------------------------------------------------

/// One logical API call, before credentials and base URL are applied.
#[derive(Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path segments under the API base, e.g. `["private", key, "burn"]`.
    /// Segments are percent-encoded when the URL is built.
    pub segments: Vec<String>,
    pub body: Option<serde_json::Value>,
    pub idempotency: Idempotency,
}

impl ApiRequest {
    pub fn get(segments: &[&str]) -> Self {
        Self::new(Method::GET, segments, Idempotency::Safe)
    }

    pub fn post(segments: &[&str], idempotency: Idempotency) -> Self {
        Self::new(Method::POST, segments, idempotency)
    }

    fn new(method: Method, segments: &[&str], idempotency: Idempotency) -> Self {
        Self {
            method,
            segments: segments.iter().map(|s| s.to_string()).collect(),
            body: None,
            idempotency,
        }
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Path for logs, e.g. `private/{key}/burn` with keys elided.
    pub fn route(&self) -> String {
        self.segments
            .iter()
            .enumerate()
            .map(|(i, s)| if i == 0 { s.as_str() } else { redact_segment(s) })
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl std::fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("route", &self.route())
            .field("has_body", &self.body.is_some())
            .field("idempotency", &self.idempotency)
            .finish()
    }
}

fn redact_segment(segment: &str) -> &str {
    match segment {
        "burn" | "recent" => segment,
        _ => "{key}",
    }
}

/// Mutable state threaded through the stages.
#[derive(Debug)]
pub struct RequestContext {
    pub base_url: Url,
    pub headers: HeaderMap,
    /// Whether a stage attached credentials.
    pub authenticated: bool,
}

/// One step of request preparation.
#[async_trait]
pub trait RequestStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(&self, request: &ApiRequest, ctx: &mut RequestContext) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Sets the JSON content headers and the user agent.
pub struct DefaultHeadersStage {
    user_agent: HeaderValue,
}

impl DefaultHeadersStage {
    pub fn new(user_agent: &str) -> Result<Self> {
        let user_agent = HeaderValue::from_str(user_agent)
            .map_err(|_| OtsError::config("user_agent is not a valid header value"))?;
        Ok(Self { user_agent })
    }
}

#[async_trait]
impl RequestStage for DefaultHeadersStage {
    fn name(&self) -> &'static str {
        "default-headers"
    }

    async fn apply(&self, request: &ApiRequest, ctx: &mut RequestContext) -> Result<()> {
        let json = HeaderValue::from_static("application/json");
        ctx.headers.insert(ACCEPT, json.clone());
        if request.body.is_some() {
            ctx.headers.insert(CONTENT_TYPE, json);
        }
        ctx.headers.insert(USER_AGENT, self.user_agent.clone());
        Ok(())
    }
}

/// Attaches HTTP Basic credentials read from the store.
///
/// The stored endpoint, when present, replaces the configured base URL.
/// Without stored credentials the request goes out anonymously.
pub struct AuthStage {
    store: Arc<dyn SecureStore>,
}

impl AuthStage {
    pub fn new(store: Arc<dyn SecureStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RequestStage for AuthStage {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn apply(&self, _request: &ApiRequest, ctx: &mut RequestContext) -> Result<()> {
        let Some(creds) = credentials::read_credentials(self.store.as_ref()).await? else {
            tracing::debug!("no stored credentials, sending anonymously");
            return Ok(());
        };

        ctx.headers.insert(AUTHORIZATION, creds.authorization_header()?);
        ctx.base_url = creds.endpoint.clone();
        ctx.authenticated = true;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Ordered list of preparation stages.
pub struct Pipeline {
    base_url: Url,
    stages: Vec<Box<dyn RequestStage>>,
}

impl Pipeline {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            stages: Vec::new(),
        }
    }

    /// Default headers, then auth.
    pub fn standard(config: &ClientConfig, store: Arc<dyn SecureStore>) -> Result<Self> {
        Ok(Self::new(config.base_url.clone())
            .stage(DefaultHeadersStage::new(&config.user_agent)?)
            .stage(AuthStage::new(store)))
    }

    pub fn stage(mut self, stage: impl RequestStage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage in order and build the final request.
    pub async fn prepare(&self, request: &ApiRequest) -> Result<HttpRequest> {
        let mut ctx = RequestContext {
            base_url: self.base_url.clone(),
            headers: HeaderMap::new(),
            authenticated: false,
        };
        for stage in &self.stages {
            stage.apply(request, &mut ctx).await?;
        }

        let url = join_segments(&ctx.base_url, &request.segments)?;
        tracing::debug!(
            route = %request.route(),
            host = url.host_str().unwrap_or_default(),
            authenticated = ctx.authenticated,
            "request prepared"
        );
        let body = request
            .body
            .as_ref()
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| OtsError::serialization(format!("failed to encode request body: {e}")))?;

        Ok(HttpRequest {
            method: request.method.clone(),
            url,
            headers: ctx.headers,
            body,
        })
    }
}

/// Append `segments` to the path of `base`, keeping its existing prefix.
pub fn join_segments(base: &Url, segments: &[String]) -> Result<Url> {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|()| OtsError::config(format!("{base} cannot be used as a base URL")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
