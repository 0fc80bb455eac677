//! Inbound callback signatures.
//!
//! Callers sign the raw request body with HMAC-SHA256 over the shared secret
//! and send the base64 digest in [`SIGNATURE_HEADER`], optionally prefixed
//! with `sha256=`.

use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{ApiError, ApiResult};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-reel-signature";

/// Base64 HMAC-SHA256 of `body`.
pub fn sign_body(secret: &str, body: &[u8]) -> ApiResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ApiError::internal(format!("Invalid HMAC key: {}", e)))?;
    mac.update(body);
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Check the signature header against `body`. Comparison is constant time.
pub fn verify_signature(secret: Option<&str>, headers: &HeaderMap, body: &[u8]) -> ApiResult<()> {
    let secret = secret.ok_or_else(|| ApiError::unauthorized("callbacks are not enabled"))?;

    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized(format!("missing {} header", SIGNATURE_HEADER)))?;
    let provided = provided.trim();
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);

    let sig_bytes = STANDARD
        .decode(provided)
        .map_err(|_| ApiError::unauthorized("malformed signature"))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ApiError::internal(format!("Invalid HMAC key: {}", e)))?;
    mac.update(body);
    mac.verify_slice(&sig_bytes)
        .map_err(|_| ApiError::unauthorized("signature mismatch"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_valid_signature_is_accepted() {
        let body = br#"{"scenes":[]}"#;
        let sig = sign_body("s3cret", body).unwrap();
        assert!(verify_signature(Some("s3cret"), &headers_with(&sig), body).is_ok());
        let prefixed = format!("sha256={}", sig);
        assert!(verify_signature(Some("s3cret"), &headers_with(&prefixed), body).is_ok());
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let sig = sign_body("s3cret", b"original").unwrap();
        let err = verify_signature(Some("s3cret"), &headers_with(&sig), b"tampered").unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[test]
    fn test_missing_header_and_secret() {
        let err = verify_signature(Some("s3cret"), &HeaderMap::new(), b"{}").unwrap_err();
        assert!(err.to_string().contains(SIGNATURE_HEADER));

        let sig = sign_body("s3cret", b"{}").unwrap();
        let err = verify_signature(None, &headers_with(&sig), b"{}").unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[test]
    fn test_garbage_signature() {
        let err = verify_signature(Some("s3cret"), &headers_with("%%%"), b"{}").unwrap_err();
        assert_eq!(err.to_string(), "Unauthorized: malformed signature");
    }
}
