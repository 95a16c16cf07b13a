//! Signing key material: an X.509 certificate plus the matching RSA private key.
//!
//! Material is loaded once, from a PKCS#12 bundle or a PEM pair, and is immutable afterwards.
//! Share it between signing operations through an `Arc`.
//!
//! # Examples
//!
//! ```rust,no_run
//! use felgt_core::keys::{KeyMaterial, KeySource};
//! use std::path::Path;
//!
//! let keys = KeyMaterial::load(Path::new("signer.p12"), None, "secret")?;
//! println!("{} / {}", keys.issuer_name(), keys.serial_number());
//!
//! let same = KeySource::pkcs12("signer.p12", "secret").load()?;
//! assert_eq!(keys.certificate_der(), same.certificate_der());
//! # Ok::<(), felgt_core::keys::KeyLoadError>(())
//! ```
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use base64ct::{Base64, Encoding};
use log::{debug, info};
use pkcs8::{DecodePrivateKey, DecodePublicKey, EncryptedPrivateKeyInfo, SecretDocument};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use thiserror::Error;
use x509_cert::Certificate;
use x509_cert::der::{Decode, DecodePem, Encode};

use crate::invoice::sign::SigningError;
use crate::invoice::sign::digest::{DigestAlgorithm, digest_base64, wrap_base64};

pub mod pkcs12;

pub use pkcs12::Pkcs12Error;

const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";

#[derive(Debug, Error)]
pub enum KeyLoadError {
    #[error("key file not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid PKCS#12 bundle: {0}")]
    Pkcs12(#[source] Pkcs12Error),
    #[error("invalid PEM: {message}")]
    Pem { message: String },
    #[error("certificate could not be decoded: {message}")]
    Certificate { message: String },
    #[error("wrong passphrase")]
    WrongPassphrase,
    #[error("unsupported private key format: {format}")]
    UnsupportedKeyFormat { format: String },
    #[error("no certificate found")]
    MissingCertificate,
    #[error("no private key found")]
    MissingPrivateKey,
    #[error("certificate public key does not match the private key")]
    KeyMismatch,
    #[error("key is not an RSA key: {algorithm}")]
    NotRsa { algorithm: String },
}

impl From<Pkcs12Error> for KeyLoadError {
    fn from(err: Pkcs12Error) -> Self {
        match err {
            Pkcs12Error::MacMismatch | Pkcs12Error::Decrypt { .. } => KeyLoadError::WrongPassphrase,
            other => KeyLoadError::Pkcs12(other),
        }
    }
}

/// Where to load key material from.
#[derive(Clone, PartialEq, Eq)]
pub enum KeySource {
    /// A `.p12`/`.pfx` bundle holding both the certificate and the key.
    Pkcs12 { path: PathBuf, passphrase: String },
    /// A PEM certificate and a PEM private key. The passphrase is only used for
    /// `ENCRYPTED PRIVATE KEY` files.
    Pem {
        certificate: PathBuf,
        private_key: PathBuf,
        passphrase: String,
    },
}

impl KeySource {
    pub fn pkcs12(path: impl Into<PathBuf>, passphrase: impl Into<String>) -> Self {
        KeySource::Pkcs12 {
            path: path.into(),
            passphrase: passphrase.into(),
        }
    }

    pub fn pem(
        certificate: impl Into<PathBuf>,
        private_key: impl Into<PathBuf>,
        passphrase: impl Into<String>,
    ) -> Self {
        KeySource::Pem {
            certificate: certificate.into(),
            private_key: private_key.into(),
            passphrase: passphrase.into(),
        }
    }

    pub fn load(&self) -> Result<KeyMaterial, KeyLoadError> {
        match self {
            KeySource::Pkcs12 { path, passphrase } => KeyMaterial::load(path, None, passphrase),
            KeySource::Pem {
                certificate,
                private_key,
                passphrase,
            } => KeyMaterial::load(certificate, Some(private_key.as_path()), passphrase),
        }
    }
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Pkcs12 { path, .. } => f
                .debug_struct("Pkcs12")
                .field("path", path)
                .field("passphrase", &"<redacted>")
                .finish(),
            KeySource::Pem {
                certificate,
                private_key,
                ..
            } => f
                .debug_struct("Pem")
                .field("certificate", certificate)
                .field("private_key", private_key)
                .field("passphrase", &"<redacted>")
                .finish(),
        }
    }
}

/// A certificate and its RSA private key, checked to belong together.
#[derive(Clone)]
pub struct KeyMaterial {
    certificate: Certificate,
    certificate_der: Vec<u8>,
    public_key: RsaPublicKey,
    signing_key: SigningKey<Sha256>,
}

impl KeyMaterial {
    /// Loads a PKCS#12 bundle (`private_key == None`) or a PEM certificate/key pair.
    pub fn load(
        certificate: &Path,
        private_key: Option<&Path>,
        passphrase: &str,
    ) -> Result<Self, KeyLoadError> {
        let material = match private_key {
            None => {
                let bundle = read_file(certificate)?;
                Self::from_pkcs12_der(&bundle, passphrase)?
            }
            Some(key_path) => {
                let cert_pem = read_text(certificate)?;
                let key_pem = read_text(key_path)?;
                Self::from_pem(&cert_pem, &key_pem, passphrase)?
            }
        };
        info!(
            "loaded signing certificate serial {} issued by {}",
            material.serial_number(),
            material.issuer_name()
        );
        Ok(material)
    }

    pub fn from_pkcs12_der(bundle: &[u8], passphrase: &str) -> Result<Self, KeyLoadError> {
        let contents = pkcs12::parse(bundle, passphrase)?;
        let key_der = contents
            .private_keys
            .first()
            .ok_or(KeyLoadError::MissingPrivateKey)?;
        let private_key = decode_pkcs8_der(key_der)?;

        if contents.certificates.is_empty() {
            return Err(KeyLoadError::MissingCertificate);
        }
        let expected = RsaPublicKey::from(&private_key);
        for der in &contents.certificates {
            let certificate = decode_certificate_der(der)?;
            if certificate_public_key(&certificate).ok().as_ref() == Some(&expected) {
                return Self::assemble(certificate, private_key);
            }
            debug!("skipping PKCS#12 certificate that does not match the private key");
        }
        Err(KeyLoadError::KeyMismatch)
    }

    /// Builds key material from PEM text. The certificate text may hold a chain; the first
    /// certificate is the signer.
    pub fn from_pem(
        certificate_pem: &str,
        private_key_pem: &str,
        passphrase: &str,
    ) -> Result<Self, KeyLoadError> {
        let block = pem_block(certificate_pem, "CERTIFICATE").ok_or(KeyLoadError::MissingCertificate)?;
        let certificate = Certificate::from_pem(block.as_bytes()).map_err(|e| KeyLoadError::Certificate {
            message: e.to_string(),
        })?;
        let private_key = decode_private_key_pem(private_key_pem, passphrase)?;
        Self::assemble(certificate, private_key)
    }

    /// Builds key material from a DER certificate and a DER PKCS#8 private key.
    pub fn from_der(certificate_der: &[u8], private_key_der: &[u8]) -> Result<Self, KeyLoadError> {
        let certificate = decode_certificate_der(certificate_der)?;
        let private_key = decode_pkcs8_der(private_key_der)?;
        Self::assemble(certificate, private_key)
    }

    fn assemble(certificate: Certificate, private_key: RsaPrivateKey) -> Result<Self, KeyLoadError> {
        let public_key = certificate_public_key(&certificate)?;
        if public_key != RsaPublicKey::from(&private_key) {
            return Err(KeyLoadError::KeyMismatch);
        }
        let certificate_der = certificate.to_der().map_err(|e| KeyLoadError::Certificate {
            message: e.to_string(),
        })?;
        Ok(Self {
            certificate,
            certificate_der,
            public_key,
            signing_key: SigningKey::<Sha256>::new(private_key),
        })
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Issuer DN as `key=value` pairs in certificate order, comma-joined.
    pub fn issuer_name(&self) -> String {
        self.certificate
            .tbs_certificate
            .issuer
            .0
            .iter()
            .map(|rdn| rdn.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Serial number in decimal.
    pub fn serial_number(&self) -> String {
        serial_to_decimal(self.certificate.tbs_certificate.serial_number.as_bytes())
    }

    pub fn certificate_base64(&self, wrap: bool) -> String {
        encode(&self.certificate_der, wrap)
    }

    pub fn modulus_base64(&self, wrap: bool) -> String {
        encode(&self.public_key.n().to_bytes_be(), wrap)
    }

    pub fn exponent_base64(&self) -> String {
        Base64::encode_string(&self.public_key.e().to_bytes_be())
    }

    /// Base64 digest of the DER certificate.
    pub fn fingerprint(&self, algorithm: DigestAlgorithm) -> String {
        digest_base64(algorithm, &self.certificate_der)
    }

    /// RSASSA-PKCS1-v1_5 with SHA-256 over `message`.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SigningError> {
        let signature: rsa::pkcs1v15::Signature = self
            .signing_key
            .try_sign(message)
            .map_err(|e| SigningError::SignatureComputation {
                message: e.to_string(),
            })?;
        Ok(signature.to_vec())
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("issuer", &self.issuer_name())
            .field("serial", &self.serial_number())
            .finish_non_exhaustive()
    }
}

fn encode(bytes: &[u8], wrap: bool) -> String {
    let encoded = Base64::encode_string(bytes);
    if wrap { wrap_base64(&encoded) } else { encoded }
}

fn read_file(path: &Path) -> Result<Vec<u8>, KeyLoadError> {
    std::fs::read(path).map_err(|source| match source.kind() {
        ErrorKind::NotFound => KeyLoadError::NotFound {
            path: path.to_path_buf(),
        },
        _ => KeyLoadError::Io {
            path: path.to_path_buf(),
            source,
        },
    })
}

fn read_text(path: &Path) -> Result<String, KeyLoadError> {
    let bytes = read_file(path)?;
    String::from_utf8(bytes).map_err(|_| KeyLoadError::Pem {
        message: format!("{} is not valid UTF-8", path.display()),
    })
}

fn decode_certificate_der(der: &[u8]) -> Result<Certificate, KeyLoadError> {
    Certificate::from_der(der).map_err(|e| KeyLoadError::Certificate {
        message: e.to_string(),
    })
}

fn certificate_public_key(certificate: &Certificate) -> Result<RsaPublicKey, KeyLoadError> {
    let spki = &certificate.tbs_certificate.subject_public_key_info;
    let algorithm = spki.algorithm.oid.to_string();
    if algorithm != OID_RSA_ENCRYPTION {
        return Err(KeyLoadError::NotRsa { algorithm });
    }
    let der = spki.to_der().map_err(|e| KeyLoadError::Certificate {
        message: e.to_string(),
    })?;
    RsaPublicKey::from_public_key_der(&der).map_err(|e| KeyLoadError::Certificate {
        message: e.to_string(),
    })
}

fn decode_pkcs8_der(der: &[u8]) -> Result<RsaPrivateKey, KeyLoadError> {
    RsaPrivateKey::from_pkcs8_der(der).map_err(|e| match e {
        pkcs8::Error::PublicKey(_) => KeyLoadError::NotRsa {
            algorithm: e.to_string(),
        },
        other => KeyLoadError::Pem {
            message: other.to_string(),
        },
    })
}

fn decode_private_key_pem(pem: &str, passphrase: &str) -> Result<RsaPrivateKey, KeyLoadError> {
    let label = pem_label(pem).ok_or(KeyLoadError::MissingPrivateKey)?;
    let block = pem_block(pem, label).ok_or_else(|| KeyLoadError::Pem {
        message: format!("unterminated {label} block"),
    })?;

    match label {
        "PRIVATE KEY" => RsaPrivateKey::from_pkcs8_pem(block).map_err(|e| KeyLoadError::Pem {
            message: e.to_string(),
        }),
        "RSA PRIVATE KEY" if block.contains("Proc-Type: 4,ENCRYPTED") => {
            Err(KeyLoadError::UnsupportedKeyFormat {
                format: "legacy OpenSSL encrypted RSA PRIVATE KEY".to_string(),
            })
        }
        "RSA PRIVATE KEY" => RsaPrivateKey::from_pkcs1_pem(block).map_err(|e| KeyLoadError::Pem {
            message: e.to_string(),
        }),
        "ENCRYPTED PRIVATE KEY" => {
            let (_, document) = SecretDocument::from_pem(block).map_err(|e| KeyLoadError::Pem {
                message: e.to_string(),
            })?;
            let info = EncryptedPrivateKeyInfo::try_from(document.as_bytes()).map_err(|e| {
                KeyLoadError::Pem {
                    message: e.to_string(),
                }
            })?;
            let decrypted = info
                .decrypt(passphrase)
                .map_err(|_| KeyLoadError::WrongPassphrase)?;
            // Garbage that survives unpadding means the passphrase was wrong too.
            RsaPrivateKey::from_pkcs8_der(decrypted.as_bytes()).map_err(|_| KeyLoadError::WrongPassphrase)
        }
        "EC PRIVATE KEY" | "DSA PRIVATE KEY" => Err(KeyLoadError::NotRsa {
            algorithm: label.trim_end_matches(" PRIVATE KEY").to_string(),
        }),
        other => Err(KeyLoadError::UnsupportedKeyFormat {
            format: other.to_string(),
        }),
    }
}

/// Label of the first `-----BEGIN <label>-----` line that names a private key.
fn pem_label(text: &str) -> Option<&str> {
    text.lines()
        .filter_map(|line| {
            line.trim()
                .strip_prefix("-----BEGIN ")?
                .strip_suffix("-----")
        })
        .find(|label| label.ends_with("PRIVATE KEY"))
}

/// First complete `label` block in `text`, armour included. Leading text such as
/// `Bag Attributes` is skipped.
fn pem_block<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");
    let start = text.find(&begin)?;
    let stop = start + text[start..].find(&end)? + end.len();
    Some(&text[start..stop])
}

/// Renders a DER INTEGER body, which is two's complement, in decimal.
fn serial_to_decimal(bytes: &[u8]) -> String {
    let magnitude = BigUint::from_bytes_be(bytes);
    match bytes.first() {
        Some(first) if first & 0x80 != 0 => {
            let modulus = BigUint::from(1u8) << (8 * bytes.len());
            format!("-{}", modulus - magnitude)
        }
        _ => magnitude.to_string(),
    }
}
