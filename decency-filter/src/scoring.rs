//! Verification of the Policy server's signed scoring header.
//!
//! The Policy daemon stamps `X-Decency-Scoring` (base64 JSON payload) and
//! `X-Decency-Scoring-Signature` (base64 RSA PKCS#1 v1.5 signature over
//! SHA-256 of the raw payload). Only a payload that verifies against the
//! configured public key may contribute score; anything else is a forgery
//! attempt and is dropped with a warning.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rsa::{Pkcs1v15Sign, RsaPublicKey, pkcs8::DecodePublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::ModuleInitError;

/// Header carrying the base64 payload.
pub const SCORING_HEADER: &str = "X-Decency-Scoring";
/// Header carrying the detached base64 signature.
pub const SCORING_SIGNATURE_HEADER: &str = "X-Decency-Scoring-Signature";

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("Header is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Signature verification failed: {0}")]
    Signature(#[from] rsa::Error),

    #[error("Payload is not valid scoring JSON: {0}")]
    Payload(#[from] serde_json::Error),
}

/// What the Policy server asserts about a message it already scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringPayload {
    pub queue_id: String,
    pub score: f64,
    #[serde(default)]
    pub details: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PolicyScoringVerifier {
    key: RsaPublicKey,
}

impl PolicyScoringVerifier {
    /// # Errors
    /// If the PEM does not contain an RSA public key.
    pub fn from_pem(pem: &str) -> Result<Self, ModuleInitError> {
        let key =
            RsaPublicKey::from_public_key_pem(pem).map_err(|err| ModuleInitError::VerifyKey {
                path: "<inline>".to_string(),
                reason: err.to_string(),
            })?;
        Ok(Self { key })
    }

    /// # Errors
    /// If the file is unreadable or does not contain an RSA public key.
    /// Both are startup-fatal: a filter configured to accept scoring must
    /// be able to verify it.
    pub fn from_pem_file(path: &Path) -> Result<Self, ModuleInitError> {
        let pem = std::fs::read_to_string(path).map_err(|err| ModuleInitError::VerifyKey {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        let key =
            RsaPublicKey::from_public_key_pem(&pem).map_err(|err| ModuleInitError::VerifyKey {
                path: path.display().to_string(),
                reason: err.to_string(),
            })?;
        Ok(Self { key })
    }

    /// Verify a header pair and decode the payload.
    ///
    /// # Errors
    /// On malformed base64, a signature that does not match the payload,
    /// or a payload that is not scoring JSON.
    pub fn verify(
        &self,
        payload_b64: &str,
        signature_b64: &str,
    ) -> Result<ScoringPayload, ScoringError> {
        let payload = BASE64.decode(payload_b64.trim())?;
        let signature = BASE64.decode(signature_b64.trim())?;

        let digest = Sha256::digest(&payload);
        self.key
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature)?;

        Ok(serde_json::from_slice(&payload)?)
    }
}
