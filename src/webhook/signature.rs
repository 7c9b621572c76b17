//! `X-Hub-Signature-256` verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const PREFIX: &str = "sha256=";

/// Compute the header value GitHub sends for `payload`: `sha256=<hex>`.
pub fn sign(secret: &[u8], payload: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| Error::Config(format!("invalid webhook secret: {e}")))?;
    mac.update(payload);
    Ok(format!("{PREFIX}{}", hex::encode(mac.finalize().into_bytes())))
}

/// Check a `sha256=<hex>` header against the raw body in constant time.
///
/// A header without the prefix or with non-hex digits is a `Validation`
/// error; a well-formed header that does not match is `Signature`. An
/// empty secret never verifies.
pub fn verify(secret: &[u8], payload: &[u8], header: &str) -> Result<()> {
    if secret.is_empty() {
        return Err(Error::Config("webhook secret is empty".to_string()));
    }
    let digest = header
        .trim()
        .strip_prefix(PREFIX)
        .ok_or_else(|| Error::Validation("signature must start with sha256=".to_string()))?;
    let expected = hex::decode(digest)
        .map_err(|_| Error::Validation("signature is not valid hex".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| Error::Config(format!("invalid webhook secret: {e}")))?;
    mac.update(payload);
    mac.verify_slice(&expected).map_err(|_| Error::Signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"It's a Secret to Everybody";
    const PAYLOAD: &[u8] = b"Hello, World!";

    #[test]
    fn matches_github_reference_vector() {
        assert_eq!(
            sign(SECRET, PAYLOAD).unwrap(),
            "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17"
        );
    }

    #[test]
    fn accepts_own_signature() {
        let header = sign(SECRET, PAYLOAD).unwrap();
        assert!(verify(SECRET, PAYLOAD, &header).is_ok());
    }

    #[test]
    fn wrong_secret_is_a_signature_error() {
        let header = sign(b"wrong", PAYLOAD).unwrap();
        assert!(matches!(
            verify(SECRET, PAYLOAD, &header),
            Err(Error::Signature)
        ));
    }

    #[test]
    fn tampered_body_is_a_signature_error() {
        let header = sign(SECRET, PAYLOAD).unwrap();
        assert!(matches!(
            verify(SECRET, b"Hello, World?", &header),
            Err(Error::Signature)
        ));
    }

    #[test]
    fn empty_secret_never_verifies() {
        let header = sign(b"", PAYLOAD).unwrap();
        assert!(matches!(
            verify(b"", PAYLOAD, &header),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn malformed_headers_are_validation_errors() {
        assert!(matches!(
            verify(SECRET, PAYLOAD, "757107ea"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            verify(SECRET, PAYLOAD, "sha256=not-hex"),
            Err(Error::Validation(_))
        ));
    }
}
