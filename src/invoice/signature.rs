//! Webhook signature verification.
//!
//! The gateway signs each payload by removing the `verify_hash` field,
//! serializing the remaining fields with sorted keys, base64-encoding that
//! canonical form, appending the shared secret, and taking the md5 hex digest.
//! Verification recomputes the same digest; a mismatch rejects the payload
//! with no state mutation and no detail leaked to the caller.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::error::InvoiceError;

pub const SIGNATURE_FIELD: &str = "verify_hash";

/// Canonical form: sorted-key compact JSON of everything but the signature.
fn canonicalize(fields: &Map<String, Value>) -> String {
    let sorted: BTreeMap<&String, &Value> = fields
        .iter()
        .filter(|(k, _)| k.as_str() != SIGNATURE_FIELD)
        .collect();
    // BTreeMap serializes with sorted keys; compact separators.
    serde_json::to_string(&sorted).unwrap_or_default()
}

/// Compute the signature the gateway would attach to `fields`.
pub fn compute_signature(fields: &Map<String, Value>, secret: &str) -> String {
    let canonical = canonicalize(fields);
    let encoded = BASE64.encode(canonical.as_bytes());
    let digest = md5::compute(format!("{}{}", encoded, secret));
    hex::encode(digest.0)
}

/// Verify a webhook payload in place. Returns the payload's object map on
/// success so the caller never touches an unverified body.
pub fn verify_payload<'a>(
    payload: &'a Value,
    secret: &str,
) -> Result<&'a Map<String, Value>, InvoiceError> {
    let Some(fields) = payload.as_object() else {
        return Err(InvoiceError::Malformed("payload is not an object".into()));
    };

    let Some(supplied) = fields.get(SIGNATURE_FIELD).and_then(Value::as_str) else {
        return Err(InvoiceError::SignatureInvalid);
    };

    let expected = compute_signature(fields, secret);
    if !supplied.eq_ignore_ascii_case(&expected) {
        return Err(InvoiceError::SignatureInvalid);
    }

    Ok(fields)
}
