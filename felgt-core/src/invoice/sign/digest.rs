//! Hashing, base64 formatting and the RSA signing wrapper used by the signature pipeline.
use crate::invoice::xml::constants::{SHA1_ALGORITHM, SHA256_ALGORITHM};
use crate::keys::KeyMaterial;
use base64ct::{Base64, Encoding};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use super::SigningError;

/// Line width used when wrapping base64 values.
pub const BASE64_LINE_WIDTH: usize = 76;

/// Supported digest methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    /// Display-only certificate fingerprints.
    Sha1,
    #[default]
    Sha256,
}

impl DigestAlgorithm {
    pub fn uri(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => SHA1_ALGORITHM,
            DigestAlgorithm::Sha256 => SHA256_ALGORITHM,
        }
    }

    pub fn digest(&self, bytes: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Sha1 => Sha1::digest(bytes).to_vec(),
            DigestAlgorithm::Sha256 => Sha256::digest(bytes).to_vec(),
        }
    }
}

pub fn digest_base64(algorithm: DigestAlgorithm, bytes: &[u8]) -> String {
    Base64::encode_string(&algorithm.digest(bytes))
}

pub fn digest_base64_wrapped(algorithm: DigestAlgorithm, bytes: &[u8]) -> String {
    wrap_base64(&digest_base64(algorithm, bytes))
}

/// Breaks `encoded` into 76-character lines, each terminated by `\n` (the last one included).
pub fn wrap_base64(encoded: &str) -> String {
    let mut out = String::with_capacity(encoded.len() + encoded.len() / BASE64_LINE_WIDTH + 1);
    let mut rest = encoded;
    while !rest.is_empty() {
        let split = rest.len().min(BASE64_LINE_WIDTH);
        let (line, tail) = rest.split_at(split);
        out.push_str(line);
        out.push('\n');
        rest = tail;
    }
    out
}

/// SHA-256 digest of a DER certificate, as carried in `xades:CertDigest`.
pub fn certificate_digest(certificate_der: &[u8]) -> String {
    digest_base64(DigestAlgorithm::Sha256, certificate_der)
}

/// `base64(RSA-PKCS1v15-SHA256(bytes))`, optionally wrapped.
pub fn sign_base64(key: &KeyMaterial, bytes: &[u8], wrap: bool) -> Result<String, SigningError> {
    let signature = key.sign(bytes)?;
    let encoded = Base64::encode_string(&signature);
    Ok(if wrap { wrap_base64(&encoded) } else { encoded })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_digest_of_known_input() {
        assert_eq!(
            digest_base64(DigestAlgorithm::Sha256, b"abc"),
            "ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0="
        );
        assert_eq!(
            digest_base64(DigestAlgorithm::Sha1, b"abc"),
            "qZk+NkcGgWq6PiVxeFDCbJzQ2J0="
        );
    }

    #[test]
    fn algorithm_uris() {
        assert_eq!(
            DigestAlgorithm::Sha256.uri(),
            "http://www.w3.org/2001/04/xmlenc#sha256"
        );
        assert_eq!(DigestAlgorithm::default(), DigestAlgorithm::Sha256);
    }

    #[test]
    fn wrap_inserts_newline_after_every_chunk() {
        let encoded = "A".repeat(160);
        let wrapped = wrap_base64(&encoded);
        let lines: Vec<&str> = wrapped.split('\n').collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0].len(), 76);
        assert_eq!(lines[1].len(), 76);
        assert_eq!(lines[2].len(), 8);
        assert_eq!(lines[3], "");
        assert_eq!(wrap_base64(""), "");
        assert_eq!(wrap_base64("abc"), "abc\n");
    }

    #[test]
    fn wrapped_digest_is_short_enough_for_one_line() {
        let wrapped = digest_base64_wrapped(DigestAlgorithm::Sha256, b"abc");
        assert_eq!(wrapped, "ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0=\n");
    }
}
