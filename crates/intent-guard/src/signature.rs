//! HMAC request authentication.
//!
//! Two schemes are accepted:
//! - legacy: `X-Signature` = hex HMAC-SHA256(secret, body)
//! - versioned: `X-Signature-V2` = hex HMAC-SHA256(secret, "{ts}.{body}")
//!   with `X-Signature-Ts` = unix seconds, bounded by a skew window
//!
//! A versioned pass yields the legacy signature for the same body so the
//! downstream handler only ever has to check the legacy header.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::SignatureError;

pub const LEGACY_SIGNATURE_HEADER: &str = "x-signature";
pub const V2_SIGNATURE_HEADER: &str = "x-signature-v2";
pub const V2_TIMESTAMP_HEADER: &str = "x-signature-ts";

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `data` under `key`.
pub fn hmac_hex(key: &str, data: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time string comparison.
pub fn signatures_match(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

/// Outcome of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verified {
    /// Versioned signature passed; install this legacy signature downstream.
    Versioned { legacy_signature: String },
    /// Legacy signature passed as supplied.
    Legacy,
    /// No signature headers and v2 is not mandated; downstream decides.
    Unsigned,
}

impl Verified {
    pub fn legacy_rewrite(&self) -> Option<&str> {
        match self {
            Verified::Versioned { legacy_signature } => Some(legacy_signature),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    secret: Option<String>,
    skew_secs: i64,
    require_v2: bool,
}

impl SignatureVerifier {
    pub fn new(secret: Option<String>, skew_secs: i64, require_v2: bool) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            skew_secs,
            require_v2,
        }
    }

    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    pub fn verify(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Verified, SignatureError> {
        let v2 = header_str(headers, V2_SIGNATURE_HEADER)
            .map_err(|_| SignatureError::BadSignature)?;
        let ts = header_str(headers, V2_TIMESTAMP_HEADER)
            .map_err(|_| SignatureError::InvalidTimestamp("<non-ascii>".to_string()))?;

        if let (Some(sig), Some(ts)) = (v2, ts) {
            return self.verify_versioned(sig, ts, body, now);
        }

        if self.require_v2 {
            return Err(SignatureError::SignatureRequired);
        }

        match header_str(headers, LEGACY_SIGNATURE_HEADER)
            .map_err(|_| SignatureError::BadSignature)?
        {
            Some(sig) => self.verify_legacy(sig, body).map(|()| Verified::Legacy),
            None => Ok(Verified::Unsigned),
        }
    }

    fn verify_versioned(
        &self,
        sig: &str,
        ts: &str,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Verified, SignatureError> {
        let ts: i64 = ts
            .trim()
            .parse()
            .map_err(|_| SignatureError::InvalidTimestamp(ts.to_string()))?;

        // compare in millis so a fractional second past the bound still counts;
        // i128 holds any i64 seconds value scaled to millis
        let skew_ms = (i128::from(now.timestamp_millis()) - i128::from(ts) * 1000).abs();
        if skew_ms > i128::from(self.skew_secs) * 1000 {
            return Err(SignatureError::StaleSignature {
                skew_secs: i64::try_from(skew_ms / 1000).unwrap_or(i64::MAX),
                limit_secs: self.skew_secs,
            });
        }

        let secret = self.secret.as_deref().ok_or(SignatureError::MissingSecret)?;

        let mut signed = format!("{}.", ts).into_bytes();
        signed.extend_from_slice(body);
        if !signatures_match(&hmac_hex(secret, &signed), sig) {
            return Err(SignatureError::BadSignature);
        }

        Ok(Verified::Versioned {
            legacy_signature: hmac_hex(secret, body),
        })
    }

    fn verify_legacy(&self, sig: &str, body: &[u8]) -> Result<(), SignatureError> {
        let secret = self.secret.as_deref().ok_or(SignatureError::MissingSecret)?;
        if signatures_match(&hmac_hex(secret, body), sig) {
            Ok(())
        } else {
            Err(SignatureError::BadSignature)
        }
    }
}

/// `Ok(None)` when the header is absent or empty, `Err` when present but not
/// visible ASCII.
fn header_str<'a>(
    headers: &'a HeaderMap,
    name: &str,
) -> Result<Option<&'a str>, axum::http::header::ToStrError> {
    match headers.get(name) {
        Some(v) => Ok(Some(v.to_str()?).filter(|v| !v.is_empty())),
        None => Ok(None),
    }
}
