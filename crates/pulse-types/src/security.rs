//! # Canonical Signing
//!
//! The single implementation of the handshake signature rules, shared by the
//! transport client and the server-side authenticator.
//!
//! ## Canonical Form
//!
//! A challenge is serialized with keys in sorted order, `", "` between items
//! and `": "` between key and value, and every non-ASCII character escaped as
//! a lowercase `\uXXXX` sequence. This is byte-for-byte what independent peers
//! produce with `json.dumps(message, sort_keys=True)`, so signatures are
//! portable across implementations.
//!
//! ## Schemes
//!
//! | Scheme | Digest |
//! |--------|--------|
//! | `Sha256Concat` | `hex(sha256(canonical ++ secret))` |
//! | `HmacSha256` | `hex(hmac_sha256(secret, canonical))` |
//!
//! Verification always compares in constant time.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::ser::Formatter;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Length of a hex-encoded SHA-256 digest.
pub const SIGNATURE_HEX_LEN: usize = 64;

/// Errors from signing operations.
#[derive(Debug, Error)]
pub enum SigningError {
    /// The message could not be serialized to its canonical form.
    #[error("Failed to canonicalize message: {0}")]
    Canonicalize(#[from] serde_json::Error),

    /// The canonical writer produced invalid UTF-8.
    #[error("Canonical form is not valid UTF-8")]
    Encoding,

    /// The shared secret was rejected by the MAC.
    #[error("Invalid shared secret: {0}")]
    InvalidSecret(String),
}

/// Digest construction used for handshake signatures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureScheme {
    /// SHA-256 over the canonical form followed by the secret.
    #[default]
    Sha256Concat,
    /// HMAC-SHA256 keyed by the secret over the canonical form.
    HmacSha256,
}

impl SignatureScheme {
    /// Parses the names used in configuration (`sha256`, `hmac-sha256`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sha256" | "sha256-concat" | "sha256_concat" => Some(Self::Sha256Concat),
            "hmac" | "hmac-sha256" | "hmac_sha256" => Some(Self::HmacSha256),
            _ => None,
        }
    }
}

/// Serializes any value into the canonical sorted-key form.
pub fn canonicalize<T: Serialize>(message: &T) -> Result<String, SigningError> {
    let value = sort_keys(serde_json::to_value(message)?);
    let mut out = Vec::with_capacity(128);
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, CanonicalFormatter);
    value.serialize(&mut serializer)?;
    String::from_utf8(out).map_err(|_| SigningError::Encoding)
}

/// Rebuilds every object with its keys in ascending order, whatever map
/// representation `serde_json` was compiled with.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, sort_keys(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Signs `message` with `secret` and returns the lowercase hex digest.
pub fn sign<T: Serialize>(
    message: &T,
    secret: &[u8],
    scheme: SignatureScheme,
) -> Result<String, SigningError> {
    let canonical = canonicalize(message)?;
    digest(canonical.as_bytes(), secret, scheme)
}

/// Recomputes the signature for `message` and compares it with `signature`
/// in constant time. Malformed signatures simply fail to verify.
pub fn verify<T: Serialize>(
    message: &T,
    signature: &str,
    secret: &[u8],
    scheme: SignatureScheme,
) -> Result<bool, SigningError> {
    let expected = sign(message, secret, scheme)?;
    let provided = signature.trim().to_ascii_lowercase();
    if provided.len() != expected.len() {
        return Ok(false);
    }
    Ok(expected.as_bytes().ct_eq(provided.as_bytes()).into())
}

fn digest(canonical: &[u8], secret: &[u8], scheme: SignatureScheme) -> Result<String, SigningError> {
    match scheme {
        SignatureScheme::Sha256Concat => {
            let mut hasher = Sha256::new();
            hasher.update(canonical);
            hasher.update(secret);
            Ok(hex::encode(hasher.finalize()))
        }
        SignatureScheme::HmacSha256 => {
            let mut mac = HmacSha256::new_from_slice(secret)
                .map_err(|e| SigningError::InvalidSecret(e.to_string()))?;
            mac.update(canonical);
            Ok(hex::encode(mac.finalize().into_bytes()))
        }
    }
}

/// Formatter reproducing `json.dumps(..., sort_keys=True)` spacing and
/// ASCII escaping.
struct CanonicalFormatter;

impl Formatter for CanonicalFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        // DEL is escaped along with non-ASCII; control bytes never reach here.
        if fragment.bytes().all(|b| b.is_ascii() && b != 0x7f) {
            return writer.write_all(fragment.as_bytes());
        }
        let mut units = [0u16; 2];
        for ch in fragment.chars() {
            if ch.is_ascii() && ch != '\x7f' {
                writer.write_all(&[ch as u8])?;
            } else {
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

/// Convenience used by tests and diagnostics: canonical form of raw JSON.
pub fn canonicalize_value(value: &Value) -> Result<String, SigningError> {
    canonicalize(value)
}
