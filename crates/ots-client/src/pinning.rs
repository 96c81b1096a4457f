//! Certificate pinning.
//!
//! A [`CertificateVerifier`] is consulted by the transport for every HTTPS
//! response, before the body is read. [`NoopVerifier`] accepts everything and
//! is the default; [`PinnedCertificates`] accepts only leaf certificates whose
//! fingerprint is in its pin set.
//!
//! Pin format: standard base64 of the SHA-256 digest of the DER-encoded leaf
//! certificate (44 characters). Several pins may be active at once so a
//! replacement certificate can be pinned before it is deployed.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ring::digest;

use crate::config::ClientConfig;
use crate::error::{ErrorKind, OtsError, Result};

/// Checks the server certificate presented for `host`.
pub trait CertificateVerifier: Send + Sync + fmt::Debug {
    /// `leaf_der` is `None` when the connection exposed no certificate.
    fn verify(&self, host: &str, leaf_der: Option<&[u8]>) -> Result<()>;
}

/// Accepts every certificate the TLS stack already trusts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopVerifier;

impl CertificateVerifier for NoopVerifier {
    fn verify(&self, _host: &str, _leaf_der: Option<&[u8]>) -> Result<()> {
        Ok(())
    }
}

/// Accepts only leaf certificates matching one of the configured pins.
#[derive(Debug, Clone)]
pub struct PinnedCertificates {
    pins: BTreeSet<String>,
}

impl PinnedCertificates {
    /// Build a verifier from base64 SHA-256 pins.
    ///
    /// # Errors
    ///
    /// Returns [`OtsError::Config`] if the set is empty or a pin is malformed.
    pub fn new<I, S>(pins: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pins: BTreeSet<String> = pins.into_iter().map(Into::into).collect();
        if pins.is_empty() {
            return Err(OtsError::config("at least one certificate pin is required"));
        }
        for pin in &pins {
            check_pin(pin)?;
        }
        Ok(Self { pins })
    }

    /// Pin string for a DER-encoded certificate.
    pub fn fingerprint(der: &[u8]) -> String {
        STANDARD.encode(digest::digest(&digest::SHA256, der))
    }
}

impl CertificateVerifier for PinnedCertificates {
    fn verify(&self, host: &str, leaf_der: Option<&[u8]>) -> Result<()> {
        let Some(der) = leaf_der else {
            tracing::warn!(host, "no peer certificate available for pin check");
            return Err(OtsError::network(
                ErrorKind::Certificate,
                format!("no certificate presented by {host}"),
            ));
        };

        if self.pins.contains(&Self::fingerprint(der)) {
            return Ok(());
        }
        tracing::warn!(host, "certificate pin mismatch");
        Err(OtsError::network(
            ErrorKind::Certificate,
            format!("certificate for {host} does not match any pin"),
        ))
    }
}

/// A pin must decode to exactly 32 bytes.
pub fn check_pin(pin: &str) -> Result<()> {
    match STANDARD.decode(pin) {
        Ok(raw) if raw.len() == digest::SHA256_OUTPUT_LEN => Ok(()),
        _ => Err(OtsError::config(format!(
            "certificate pin `{pin}` is not a base64 SHA-256 digest"
        ))),
    }
}

/// Verifier selected by `config.cert_pinning`.
pub fn verifier_for(config: &ClientConfig) -> Result<Arc<dyn CertificateVerifier>> {
    if config.cert_pinning {
        tracing::info!(pins = config.cert_pins.len(), "certificate pinning enabled");
        Ok(Arc::new(PinnedCertificates::new(config.cert_pins.iter().cloned())?))
    } else {
        Ok(Arc::new(NoopVerifier))
    }
}
