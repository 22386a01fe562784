//! Deduplication key derivation.

use std::fmt;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::idempotency::IdempotencyError;

/// Longest client token accepted.
pub const MAX_TOKEN_LEN: usize = 255;

/// Hex characters of the body digest kept in the key.
const DIGEST_LEN: usize = 16;

/// `IDEM#{token}#{digest}` where `digest` is the first 16 hex characters of
/// the SHA-256 of the canonical request body.
///
/// The same token with a different body yields a different key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    token: String,
    digest: String,
    key: String,
}

impl DedupKey {
    pub fn derive(token: &str, body: &Value) -> Result<Self, IdempotencyError> {
        validate_token(token)?;

        let canonical = canonical_json(body);
        let digest = hex::encode(Sha256::digest(canonical.as_bytes()));
        let digest = digest[..DIGEST_LEN].to_string();

        Ok(Self {
            key: format!("IDEM#{token}#{digest}"),
            token: token.to_string(),
            digest,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Deterministic resource id for the mutation this key guards, e.g.
    /// `CLAIM-1A2B3C4D`.
    ///
    /// Concurrent duplicates derive the same id, so a create-if-absent on
    /// the domain record applies the mutation once.
    pub fn derive_id(&self, prefix: &str) -> String {
        let digest = hex::encode(Sha256::digest(self.key.as_bytes()));
        format!("{prefix}-{}", digest[..8].to_uppercase())
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

fn validate_token(token: &str) -> Result<(), IdempotencyError> {
    if token.trim().is_empty() {
        return Err(IdempotencyError::InvalidToken("token cannot be empty".into()));
    }
    if token.len() > MAX_TOKEN_LEN {
        return Err(IdempotencyError::InvalidToken(format!(
            "token exceeds {MAX_TOKEN_LEN} characters"
        )));
    }
    Ok(())
}

/// Compact JSON with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(v, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
