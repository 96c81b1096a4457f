//! HTTP transport seam.
//!
//! The client talks to the network only through [`HttpTransport`]. The
//! production implementation is [`ReqwestTransport`]; tests substitute a
//! scripted fake.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::HeaderMap;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{ErrorKind, OtsError, Result};
use crate::pinning::CertificateVerifier;

/// A fully prepared request: absolute URL, final headers, encoded body.
#[derive(Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .finish()
    }
}

/// A received response. Any status code is a successful transport result.
#[derive(Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

/// Sends one attempt of a request.
///
/// Errors must be [`OtsError::Network`] with a kind of `Connect`, `Timeout`,
/// `Transport` or `Certificate`; HTTP statuses are classified by the caller.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

// ---------------------------------------------------------------------------
// reqwest
// ---------------------------------------------------------------------------

/// Production transport built on `reqwest` with rustls.
pub struct ReqwestTransport {
    client: reqwest::Client,
    verifier: Arc<dyn CertificateVerifier>,
}

impl ReqwestTransport {
    /// Build a client with the configured per-attempt timeout.
    pub fn new(config: &ClientConfig, verifier: Arc<dyn CertificateVerifier>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.as_str())
            .tls_info(true)
            .build()
            .map_err(|e| OtsError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, verifier })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let host = request.url.host_str().unwrap_or_default().to_string();
        let https = request.url.scheme() == "https";

        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(classify_reqwest_error)?;

        // TODO: move the pin check into a custom rustls verifier so a
        // mismatch aborts the handshake before the request is written.
        if https {
            let leaf = response
                .extensions()
                .get::<reqwest::tls::TlsInfo>()
                .and_then(|info| info.peer_certificate());
            self.verifier.verify(&host, leaf)?;
        }

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(classify_reqwest_error)?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Map a `reqwest` failure onto the network error kinds.
///
/// Connect-phase failures (refused, DNS, connect timeout) are `Connect`:
/// nothing reached the server.
fn classify_reqwest_error(err: reqwest::Error) -> OtsError {
    let kind = if err.is_connect() {
        ErrorKind::Connect
    } else if err.is_timeout() {
        ErrorKind::Timeout
    } else {
        ErrorKind::Transport
    };
    OtsError::network(kind, err.without_url().to_string())
}

#[cfg(test)]
mod tests {
    use reqwest::header::{AUTHORIZATION, HeaderValue};

    use super::*;
    use crate::pinning::NoopVerifier;

    #[test]
    fn request_debug_hides_body_and_credentials() {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_static("Basic dXNlcjp0b2tlbg==");
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let request = HttpRequest {
            method: Method::POST,
            url: Url::parse("https://onetimesecret.com/api/v2/secret").unwrap(),
            headers,
            body: Some(br#"{"secret":"hunter2"}"#.to_vec()),
        };
        let debug = format!("{request:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("dXNlcjp0b2tlbg"));
        assert!(debug.contains("body_len"));
    }

    #[tokio::test]
    async fn refused_connection_is_connect_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport =
            ReqwestTransport::new(&ClientConfig::default(), Arc::new(NoopVerifier)).unwrap();
        let err = transport
            .send(HttpRequest {
                method: Method::GET,
                url: Url::parse(&format!("http://{addr}/status")).unwrap(),
                headers: HeaderMap::new(),
                body: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connect);
    }
}
