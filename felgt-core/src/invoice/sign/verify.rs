//! Structural and cryptographic check of a signed FEL document.
//!
//! Recomputes every reference digest in place, verifies `SignatureValue` against the embedded
//! certificate and checks that `QualifyingProperties` targets the signature. Trust chain and
//! revocation are out of scope.
use base64ct::{Base64, Encoding};
use log::debug;
use pkcs8::DecodePublicKey;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use rsa::RsaPublicKey;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use sha2::Sha256;
use thiserror::Error;
use x509_cert::Certificate;
use x509_cert::der::{Decode, Encode};

use super::c14n::{C14nError, canonicalize_element_by_id, canonicalize_element_by_name};
use super::digest::{DigestAlgorithm, digest_base64};
use crate::invoice::xml::constants::{
    C14N_ALGORITHM, DS_NS, RSA_SHA256_ALGORITHM, SHA256_ALGORITHM, XADES_NS,
};

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("malformed XML: {message}")]
    Malformed { message: String },
    #[error("document carries no ds:Signature")]
    SignatureNotFound,
    #[error("document carries {count} ds:Signature elements")]
    MultipleSignatures { count: usize },
    #[error("ds:Signature lacks {element}")]
    MissingElement { element: &'static str },
    #[error("unsupported algorithm {algorithm}")]
    UnsupportedAlgorithm { algorithm: String },
    #[error("reference {uri} is not a same-document reference")]
    ExternalReference { uri: String },
    #[error("reference {uri} could not be resolved: {source}")]
    UnresolvedReference {
        uri: String,
        #[source]
        source: C14nError,
    },
    #[error("digest mismatch for {uri}: document has {expected}, recomputed {actual}")]
    DigestMismatch {
        uri: String,
        expected: String,
        actual: String,
    },
    #[error("invalid base64 in {element}")]
    InvalidBase64 { element: &'static str },
    #[error("embedded certificate is unusable: {message}")]
    Certificate { message: String },
    #[error("SignatureValue does not verify")]
    BadSignature,
    #[error("QualifyingProperties Target {target} does not point at the signature")]
    TargetMismatch { target: String },
}

/// One reference that matched its digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedReference {
    pub id: Option<String>,
    pub uri: String,
    pub digest: String,
}

/// Result of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub signature_id: Option<String>,
    pub references: Vec<VerifiedReference>,
    pub signing_time: Option<String>,
    pub certificate_der: Vec<u8>,
}

#[derive(Debug, Default)]
struct ReferenceParts {
    id: Option<String>,
    uri: Option<String>,
    transforms: Vec<String>,
    digest_method: Option<String>,
    digest_value: String,
}

#[derive(Debug, Default)]
struct SignatureParts {
    count: usize,
    signature_id: Option<String>,
    canonicalization: Option<String>,
    signature_method: Option<String>,
    references: Vec<ReferenceParts>,
    signature_value: Option<String>,
    certificate: Option<String>,
    qualifying_target: Option<String>,
    signing_time: Option<String>,
}

/// Verifies the single `ds:Signature` of `xml`.
pub fn verify_signed_document(xml: &str) -> Result<VerificationReport, VerificationError> {
    let parts = collect_signature_parts(xml)?;
    match parts.count {
        0 => return Err(VerificationError::SignatureNotFound),
        1 => {}
        count => return Err(VerificationError::MultipleSignatures { count }),
    }

    let canonicalization = parts
        .canonicalization
        .as_deref()
        .ok_or(VerificationError::MissingElement {
            element: "CanonicalizationMethod",
        })?;
    require_algorithm(canonicalization, C14N_ALGORITHM)?;
    let signature_method = parts
        .signature_method
        .as_deref()
        .ok_or(VerificationError::MissingElement {
            element: "SignatureMethod",
        })?;
    require_algorithm(signature_method, RSA_SHA256_ALGORITHM)?;
    if parts.references.is_empty() {
        return Err(VerificationError::MissingElement { element: "Reference" });
    }

    let mut references = Vec::with_capacity(parts.references.len());
    for reference in &parts.references {
        references.push(verify_reference(xml, reference)?);
    }

    let certificate_b64 = parts.certificate.as_deref().ok_or(VerificationError::MissingElement {
        element: "X509Certificate",
    })?;
    let certificate_der = decode_base64(certificate_b64, "X509Certificate")?;
    let public_key = public_key_from_certificate(&certificate_der)?;

    let signature_b64 = parts.signature_value.as_deref().ok_or(VerificationError::MissingElement {
        element: "SignatureValue",
    })?;
    let signature_bytes = decode_base64(signature_b64, "SignatureValue")?;
    let signed_info = canonicalize_element_by_name(xml, DS_NS, "SignedInfo").map_err(|source| {
        VerificationError::UnresolvedReference {
            uri: "SignedInfo".to_string(),
            source,
        }
    })?;
    let signature =
        Signature::try_from(signature_bytes.as_slice()).map_err(|_| VerificationError::BadSignature)?;
    VerifyingKey::<Sha256>::new(public_key)
        .verify(signed_info.as_bytes(), &signature)
        .map_err(|_| VerificationError::BadSignature)?;

    if let Some(target) = &parts.qualifying_target {
        let expected = parts.signature_id.as_deref().map(|id| format!("#{id}"));
        if expected.as_deref() != Some(target.as_str()) {
            return Err(VerificationError::TargetMismatch {
                target: target.clone(),
            });
        }
    }

    debug!("verified {} references", references.len());
    Ok(VerificationReport {
        signature_id: parts.signature_id,
        references,
        signing_time: parts.signing_time,
        certificate_der,
    })
}

fn verify_reference(xml: &str, reference: &ReferenceParts) -> Result<VerifiedReference, VerificationError> {
    let uri = reference
        .uri
        .clone()
        .ok_or(VerificationError::MissingElement { element: "Reference/@URI" })?;
    let id = uri
        .strip_prefix('#')
        .filter(|id| !id.is_empty())
        .ok_or_else(|| VerificationError::ExternalReference { uri: uri.clone() })?;
    for transform in &reference.transforms {
        require_algorithm(transform, C14N_ALGORITHM)?;
    }
    let method = reference
        .digest_method
        .as_deref()
        .ok_or(VerificationError::MissingElement { element: "DigestMethod" })?;
    require_algorithm(method, SHA256_ALGORITHM)?;

    let canonical = canonicalize_element_by_id(xml, id).map_err(|source| VerificationError::UnresolvedReference {
        uri: uri.clone(),
        source,
    })?;
    let actual = digest_base64(DigestAlgorithm::Sha256, canonical.as_bytes());
    let expected: String = reference.digest_value.split_whitespace().collect();
    if actual != expected {
        return Err(VerificationError::DigestMismatch { uri, expected, actual });
    }
    Ok(VerifiedReference {
        id: reference.id.clone(),
        uri,
        digest: actual,
    })
}

fn require_algorithm(found: &str, expected: &str) -> Result<(), VerificationError> {
    if found == expected {
        Ok(())
    } else {
        Err(VerificationError::UnsupportedAlgorithm {
            algorithm: found.to_string(),
        })
    }
}

fn decode_base64(text: &str, element: &'static str) -> Result<Vec<u8>, VerificationError> {
    let compact: String = text.split_whitespace().collect();
    Base64::decode_vec(&compact).map_err(|_| VerificationError::InvalidBase64 { element })
}

fn public_key_from_certificate(der: &[u8]) -> Result<RsaPublicKey, VerificationError> {
    let certificate = Certificate::from_der(der).map_err(|e| VerificationError::Certificate {
        message: e.to_string(),
    })?;
    let spki = certificate
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| VerificationError::Certificate {
            message: e.to_string(),
        })?;
    RsaPublicKey::from_public_key_der(&spki).map_err(|e| VerificationError::Certificate {
        message: e.to_string(),
    })
}

/// Which text node is being collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextSlot {
    DigestValue,
    SignatureValue,
    Certificate,
    SigningTime,
}

fn collect_signature_parts(xml: &str) -> Result<SignatureParts, VerificationError> {
    let malformed = |e: quick_xml::Error| VerificationError::Malformed { message: e.to_string() };
    let mut reader = NsReader::from_str(xml);
    let mut parts = SignatureParts::default();
    let mut path: Vec<(bool, String)> = Vec::new();
    let mut slot: Option<TextSlot> = None;

    loop {
        let (resolved, event) = reader.read_resolved_event().map_err(malformed)?;
        let is_ds = matches!(resolved, ResolveResult::Bound(Namespace(ns)) if ns == DS_NS.as_bytes());
        let is_xades = matches!(resolved, ResolveResult::Bound(Namespace(ns)) if ns == XADES_NS.as_bytes());
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let empty = matches!(event, Event::Empty(_));
                let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                let in_signed_info = path.iter().any(|(ds, name)| *ds && name == "SignedInfo");
                let in_key_info = path.iter().any(|(ds, name)| *ds && name == "KeyInfo");

                match (is_ds, is_xades, local.as_str()) {
                    (true, _, "Signature") => {
                        parts.count += 1;
                        parts.signature_id = attribute(e, "Id");
                    }
                    (true, _, "CanonicalizationMethod") if in_signed_info => {
                        parts.canonicalization = attribute(e, "Algorithm");
                    }
                    (true, _, "SignatureMethod") if in_signed_info => {
                        parts.signature_method = attribute(e, "Algorithm");
                    }
                    (true, _, "Reference") if in_signed_info => parts.references.push(ReferenceParts {
                        id: attribute(e, "Id"),
                        uri: attribute(e, "URI"),
                        ..ReferenceParts::default()
                    }),
                    (true, _, "Transform") if in_signed_info => {
                        if let (Some(reference), Some(algorithm)) =
                            (parts.references.last_mut(), attribute(e, "Algorithm"))
                        {
                            reference.transforms.push(algorithm);
                        }
                    }
                    (true, _, "DigestMethod") if in_signed_info => {
                        if let Some(reference) = parts.references.last_mut() {
                            reference.digest_method = attribute(e, "Algorithm");
                        }
                    }
                    (true, _, "DigestValue") if in_signed_info => slot = Some(TextSlot::DigestValue),
                    (true, _, "SignatureValue") => slot = Some(TextSlot::SignatureValue),
                    (true, _, "X509Certificate") if in_key_info && parts.certificate.is_none() => {
                        slot = Some(TextSlot::Certificate)
                    }
                    (_, true, "QualifyingProperties") => {
                        parts.qualifying_target = attribute(e, "Target");
                    }
                    (_, true, "SigningTime") => slot = Some(TextSlot::SigningTime),
                    _ => {}
                }

                if empty {
                    slot = None;
                } else {
                    path.push((is_ds, local));
                }
            }
            Event::Text(ref e) => {
                if let Some(current) = slot {
                    let text = e.unescape().map_err(malformed)?.into_owned();
                    match current {
                        TextSlot::DigestValue => {
                            if let Some(reference) = parts.references.last_mut() {
                                reference.digest_value.push_str(&text);
                            }
                        }
                        TextSlot::SignatureValue => {
                            parts.signature_value.get_or_insert_with(String::new).push_str(&text)
                        }
                        TextSlot::Certificate => {
                            parts.certificate.get_or_insert_with(String::new).push_str(&text)
                        }
                        TextSlot::SigningTime => {
                            parts.signing_time.get_or_insert_with(String::new).push_str(&text)
                        }
                    }
                }
            }
            Event::End(_) => {
                path.pop();
                slot = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(parts)
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
}
