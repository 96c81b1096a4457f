//! Request and response types for the One-Time Secret API.
//!
//! Responses are decoded in two steps: serde parses the wire shape
//! (`SecretResponse`), then `from_wire` checks the semantic constraints
//! (positive TTL, valid timestamps) and produces the domain type. A body
//! failing either step is a serialization error, even on HTTP 200.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{OtsError, Result};

/// Shortest TTL the service accepts, in seconds (5 minutes).
pub const MIN_TTL_SECS: u32 = 300;

/// Longest TTL the service accepts, in seconds (7 days).
pub const MAX_TTL_SECS: u32 = 604_800;

/// TTL choices offered to users: 5m, 15m, 30m, 1h, 4h, 1d, 7d.
pub const TTL_PRESETS: [(&str, u32); 7] = [
    ("5 minutes", 300),
    ("15 minutes", 900),
    ("30 minutes", 1_800),
    ("1 hour", 3_600),
    ("4 hours", 14_400),
    ("1 day", 86_400),
    ("7 days", 604_800),
];

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is a valid regex")
});

// ---------------------------------------------------------------------------
// SecretState
// ---------------------------------------------------------------------------

/// Server-side lifecycle of a secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretState {
    New,
    Received,
    Burned,
}

impl SecretState {
    /// Only `new → received` and `new → burned` are allowed; staying in the
    /// same state is always allowed.
    pub fn can_transition_to(self, next: SecretState) -> bool {
        self == next || self == SecretState::New
    }
}

impl fmt::Display for SecretState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SecretState::New => "new",
            SecretState::Received => "received",
            SecretState::Burned => "burned",
        })
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Payload for creating a secret.
#[derive(Debug)]
pub struct CreateSecretRequest {
    pub secret: SecretString,
    pub passphrase: Option<SecretString>,
    /// Lifetime in seconds; the server default applies when `None`.
    pub ttl: Option<u32>,
    /// Email address to notify.
    pub recipient: Option<String>,
}

impl CreateSecretRequest {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: SecretString::new(secret.into()),
            passphrase: None,
            ttl: None,
            recipient: None,
        }
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(SecretString::new(passphrase.into()));
        self
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    /// Local pre-flight checks. Every failing field is reported.
    pub fn validate(&self) -> Result<()> {
        let mut fields = BTreeMap::new();

        if self.secret.expose_secret().is_empty() {
            fields.insert("secret".to_string(), "secret cannot be empty".to_string());
        }
        if let Some(ttl) = self.ttl {
            if !(MIN_TTL_SECS..=MAX_TTL_SECS).contains(&ttl) {
                fields.insert(
                    "ttl".to_string(),
                    format!("ttl must be between {MIN_TTL_SECS} and {MAX_TTL_SECS} seconds"),
                );
            }
        }
        if let Some(recipient) = &self.recipient {
            if !is_valid_email(recipient) {
                fields.insert(
                    "recipient".to_string(),
                    "recipient must be a valid email address".to_string(),
                );
            }
        }

        if fields.is_empty() {
            return Ok(());
        }
        let message = fields.values().cloned().collect::<Vec<_>>().join("; ");
        Err(OtsError::Validation { message, fields })
    }

    /// JSON body sent to `POST secret`.
    pub(crate) fn to_body(&self) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        body.insert("secret".into(), self.secret.expose_secret().clone().into());
        if let Some(passphrase) = &self.passphrase {
            body.insert("passphrase".into(), passphrase.expose_secret().clone().into());
        }
        if let Some(ttl) = self.ttl {
            body.insert("ttl".into(), ttl.into());
        }
        if let Some(recipient) = &self.recipient {
            body.insert("recipient".into(), recipient.clone().into());
        }
        serde_json::Value::Object(body)
    }
}

pub fn is_valid_email(candidate: &str) -> bool {
    EMAIL_RE.is_match(candidate)
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// Secret / metadata record exactly as the API returns it.
#[derive(Deserialize)]
pub(crate) struct SecretResponse {
    custid: String,
    metadata_key: String,
    secret_key: String,
    ttl: i64,
    metadata_ttl: i64,
    secret_ttl: i64,
    state: SecretState,
    updated: i64,
    created: i64,
    #[serde(default)]
    recipient: Option<Vec<String>>,
    passphrase_required: bool,
    #[serde(default)]
    value: Option<String>,
}

/// `GET private/recent` answers either a bare list or `{"records": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum RecentResponse {
    List(Vec<SecretResponse>),
    Wrapped { records: Vec<SecretResponse> },
}

impl RecentResponse {
    pub(crate) fn into_records(self) -> Vec<SecretResponse> {
        match self {
            RecentResponse::List(records) | RecentResponse::Wrapped { records } => records,
        }
    }
}

/// Body of a non-2xx response, when the server sends one.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Validated secret metadata. Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretMetadata {
    pub custid: String,
    pub secret_key: String,
    pub metadata_key: String,
    pub ttl_seconds: u64,
    pub metadata_ttl_seconds: u64,
    pub secret_ttl_seconds: u64,
    pub state: SecretState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub passphrase_required: bool,
    pub recipient: Vec<String>,
}

impl SecretMetadata {
    pub(crate) fn from_wire(raw: SecretResponse) -> Result<Self> {
        split_response(raw).map(|(metadata, _)| metadata)
    }
}

/// A retrieved secret. The value is only reachable through
/// [`ExposeSecret`].
#[derive(Debug)]
pub struct SecretValue {
    pub value: SecretString,
    pub metadata: SecretMetadata,
}

impl SecretValue {
    pub(crate) fn from_wire(raw: SecretResponse) -> Result<Self> {
        let (metadata, value) = split_response(raw)?;
        let value = value.ok_or_else(|| OtsError::serialization("response has no secret value"))?;
        Ok(Self {
            value: SecretString::new(value),
            metadata,
        })
    }
}

/// `GET status` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ServiceStatus {
    pub fn is_nominal(&self) -> bool {
        self.status.eq_ignore_ascii_case("nominal") || self.status.eq_ignore_ascii_case("ok")
    }
}

fn split_response(raw: SecretResponse) -> Result<(SecretMetadata, Option<String>)> {
    if raw.metadata_key.is_empty() || raw.secret_key.is_empty() {
        return Err(OtsError::serialization("response has an empty key"));
    }
    if raw.ttl <= 0 {
        return Err(OtsError::serialization(format!(
            "ttl must be positive, got {}",
            raw.ttl
        )));
    }

    let metadata = SecretMetadata {
        custid: raw.custid,
        secret_key: raw.secret_key,
        metadata_key: raw.metadata_key,
        ttl_seconds: raw.ttl.unsigned_abs(),
        metadata_ttl_seconds: non_negative("metadata_ttl", raw.metadata_ttl)?,
        secret_ttl_seconds: non_negative("secret_ttl", raw.secret_ttl)?,
        state: raw.state,
        created_at: timestamp("created", raw.created)?,
        updated_at: timestamp("updated", raw.updated)?,
        passphrase_required: raw.passphrase_required,
        recipient: raw.recipient.unwrap_or_default(),
    };
    Ok((metadata, raw.value))
}

fn non_negative(field: &str, value: i64) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| OtsError::serialization(format!("{field} must not be negative, got {value}")))
}

fn timestamp(field: &str, secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| OtsError::serialization(format!("{field} is not a valid timestamp")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn wire() -> serde_json::Value {
        serde_json::json!({
            "custid": "user@example.com",
            "metadata_key": "meta123",
            "secret_key": "sec456",
            "ttl": 3600,
            "metadata_ttl": 7200,
            "secret_ttl": 3600,
            "state": "new",
            "updated": 1_700_000_000,
            "created": 1_700_000_000,
            "passphrase_required": false
        })
    }

    fn parse(value: serde_json::Value) -> Result<SecretMetadata> {
        let raw: SecretResponse = serde_json::from_value(value)
            .map_err(|e| OtsError::serialization(e.to_string()))?;
        SecretMetadata::from_wire(raw)
    }

    #[test]
    fn valid_metadata() {
        let meta = parse(wire()).unwrap();
        assert_eq!(meta.state, SecretState::New);
        assert_eq!(meta.ttl_seconds, 3600);
        assert_eq!(meta.created_at.timestamp(), 1_700_000_000);
        assert!(meta.recipient.is_empty());
    }

    #[test]
    fn schema_violations_are_serialization_errors() {
        let mut missing = wire();
        missing.as_object_mut().unwrap().remove("secret_key");
        assert!(matches!(parse(missing), Err(OtsError::Serialization { .. })));

        let mut bad_state = wire();
        bad_state["state"] = "viewed".into();
        assert!(matches!(parse(bad_state), Err(OtsError::Serialization { .. })));

        let mut zero_ttl = wire();
        zero_ttl["ttl"] = 0.into();
        assert!(matches!(parse(zero_ttl), Err(OtsError::Serialization { .. })));
    }

    #[test]
    fn secret_value_requires_value() {
        let raw: SecretResponse = serde_json::from_value(wire()).unwrap();
        assert!(SecretValue::from_wire(raw).is_err());

        let mut with_value = wire();
        with_value["value"] = "hello".into();
        let raw: SecretResponse = serde_json::from_value(with_value).unwrap();
        let secret = SecretValue::from_wire(raw).unwrap();
        assert_eq!(secret.value.expose_secret(), "hello");
        assert!(!format!("{secret:?}").contains("hello"));
    }

    #[test]
    fn recent_accepts_both_shapes() {
        let list: RecentResponse = serde_json::from_value(serde_json::json!([wire()])).unwrap();
        assert_eq!(list.into_records().len(), 1);

        let wrapped: RecentResponse =
            serde_json::from_value(serde_json::json!({"records": [wire(), wire()]})).unwrap();
        assert_eq!(wrapped.into_records().len(), 2);
    }

    #[test]
    fn state_transitions_are_monotonic() {
        use SecretState::*;
        assert!(New.can_transition_to(Received));
        assert!(New.can_transition_to(Burned));
        assert!(Received.can_transition_to(Received));
        assert!(!Received.can_transition_to(New));
        assert!(!Burned.can_transition_to(New));
        assert!(!Received.can_transition_to(Burned));
    }

    #[test]
    fn create_validation() {
        CreateSecretRequest::new("hello").with_ttl(3600).validate().unwrap();

        let err = CreateSecretRequest::new("").validate().unwrap_err();
        match err {
            OtsError::Validation { fields, .. } => assert!(fields.contains_key("secret")),
            other => panic!("expected validation error, got {other:?}"),
        }

        for ttl in [0, 299, 604_801] {
            assert!(CreateSecretRequest::new("x").with_ttl(ttl).validate().is_err());
        }
        for (_, ttl) in TTL_PRESETS {
            CreateSecretRequest::new("x").with_ttl(ttl).validate().unwrap();
        }

        let err = CreateSecretRequest::new("")
            .with_recipient("not-an-email")
            .validate()
            .unwrap_err();
        match err {
            OtsError::Validation { fields, .. } => {
                assert_eq!(fields.len(), 2);
                assert!(fields.contains_key("recipient"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn body_omits_absent_fields() {
        let body = CreateSecretRequest::new("hello").with_ttl(300).to_body();
        assert_eq!(body, serde_json::json!({"secret": "hello", "ttl": 300}));

        let req = CreateSecretRequest::new("hello").with_passphrase("pw");
        assert!(!format!("{req:?}").contains("hello"));
        assert_eq!(req.to_body()["passphrase"], "pw");
    }

    #[test]
    fn email_check() {
        assert!(is_valid_email("alice@example.com"));
        assert!(!is_valid_email("alice@example"));
        assert!(!is_valid_email("alice example.com"));
        assert!(!is_valid_email(""));
    }
}
