//! XAdES-BES enveloped signing of FEL documents.
//!
//! The pipeline is a chain of typestates, each step consuming the previous one:
//! `Unsigned -> KeysLoaded -> PropertiesBuilt -> DigestsComputed -> InfoCanonicalized ->
//! SignatureComputed -> Injected`. [`DocumentSigner`] runs the whole chain.
//!
//! # Examples
//! ```rust,no_run
//! use felgt_core::invoice::sign::{DocumentSigner, SigningOptions};
//! use felgt_core::keys::KeyMaterial;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let keys = Arc::new(KeyMaterial::load(Path::new("signer.p12"), None, "secret")?);
//! let signer = DocumentSigner::new(keys);
//! let unsigned = std::fs::read_to_string("factura.xml")?;
//! let signed = signer.sign(&unsigned, &SigningOptions::default())?;
//! std::fs::write("factura-firmada.xml", signed.xml())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use log::{debug, info, trace};
use quick_xml::events::Event;
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::{NsReader, Reader};
use thiserror::Error;

use crate::config::{GUATEMALA_UTC_OFFSET_MINUTES, IdStrategy};
use crate::invoice::xml::InvoiceXmlError;
use crate::invoice::xml::constants::{BODY_ID, DS_NS, XADES_NS};
use crate::invoice::xml::signature::{self, RsaKeyValue, SignedPropertiesFields};
use crate::keys::{KeyLoadError, KeyMaterial, KeySource};

pub mod c14n;
pub mod digest;
pub mod ids;
pub mod verify;

use c14n::{C14nContext, C14nError, canonicalize, canonicalize_element_by_id};
use digest::{DigestAlgorithm, certificate_digest, digest_base64, sign_base64};
use ids::SignatureIds;

const SIGNING_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("failed to load signing keys: {0}")]
    KeyLoad(#[from] KeyLoadError),
    #[error("signing certificate could not be parsed: {message}")]
    CertificateParse { message: String },
    #[error("failed to canonicalize {reference}: {source}")]
    DigestComputation {
        reference: String,
        #[source]
        source: C14nError,
    },
    #[error("RSA signature failed: {message}")]
    SignatureComputation { message: String },
    #[error("signature could not be injected: {reason}")]
    Injection { reason: String },
    #[error("signature identifiers rejected: {message}")]
    Identifier { message: String },
    #[error("document could not be rendered: {0}")]
    Render(#[from] InvoiceXmlError),
}

/// Per-call signing settings.
///
/// # Examples
/// ```rust
/// use chrono::DateTime;
/// use felgt_core::config::IdStrategy;
/// use felgt_core::invoice::sign::SigningOptions;
///
/// let time = DateTime::parse_from_rfc3339("2024-01-01T00:00:00-06:00")?;
/// let options = SigningOptions::default()
///     .with_signing_time(time)
///     .with_id_strategy(IdStrategy::Derived("0001".into()));
/// assert_eq!(options.body_id(), "DatosEmision");
/// # Ok::<(), chrono::ParseError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningOptions {
    signing_time: Option<DateTime<FixedOffset>>,
    utc_offset: FixedOffset,
    id_strategy: IdStrategy,
    include_key_value: bool,
    wrap_base64: bool,
    body_id: String,
}

impl Default for SigningOptions {
    fn default() -> Self {
        Self {
            signing_time: None,
            utc_offset: FixedOffset::east_opt(GUATEMALA_UTC_OFFSET_MINUTES * 60).unwrap_or_else(|| Utc.fix()),
            id_strategy: IdStrategy::Random,
            include_key_value: true,
            wrap_base64: true,
            body_id: BODY_ID.to_string(),
        }
    }
}

impl SigningOptions {
    /// Fixes the signing time instead of using the clock.
    pub fn with_signing_time(mut self, time: DateTime<FixedOffset>) -> Self {
        self.signing_time = Some(time);
        self
    }

    /// Offset applied to the clock when no signing time is set.
    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = offset;
        self
    }

    pub fn with_id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    pub fn with_include_key_value(mut self, include: bool) -> Self {
        self.include_key_value = include;
        self
    }

    pub fn with_wrap_base64(mut self, wrap: bool) -> Self {
        self.wrap_base64 = wrap;
        self
    }

    pub fn with_body_id(mut self, body_id: impl Into<String>) -> Self {
        self.body_id = body_id.into();
        self
    }

    pub fn signing_time(&self) -> Option<DateTime<FixedOffset>> {
        self.signing_time
    }

    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    pub fn id_strategy(&self) -> &IdStrategy {
        &self.id_strategy
    }

    pub fn include_key_value(&self) -> bool {
        self.include_key_value
    }

    pub fn wrap_base64(&self) -> bool {
        self.wrap_base64
    }

    pub fn body_id(&self) -> &str {
        &self.body_id
    }

    fn resolve_signing_time(&self) -> DateTime<FixedOffset> {
        self.signing_time
            .unwrap_or_else(|| Utc::now().with_timezone(&self.utc_offset))
    }
}

/// Base64 SHA-256 digests of the three signed references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDigests {
    body: String,
    key_info: String,
    signed_properties: String,
}

impl ReferenceDigests {
    pub(crate) fn new(body: String, key_info: String, signed_properties: String) -> Self {
        Self {
            body,
            key_info,
            signed_properties,
        }
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn key_info(&self) -> &str {
        &self.key_info
    }

    pub fn signed_properties(&self) -> &str {
        &self.signed_properties
    }
}

/// State shared by every step after key loading.
#[derive(Debug)]
struct SigningContext {
    document: String,
    keys: Arc<KeyMaterial>,
    ids: SignatureIds,
    signing_time: DateTime<FixedOffset>,
    options: SigningOptions,
}

/// A document that has not been touched yet.
#[derive(Debug)]
pub struct Unsigned {
    document: String,
}

impl Unsigned {
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
        }
    }

    pub fn load_keys(self, source: &KeySource) -> Result<KeysLoaded, SigningError> {
        let keys = load_key_material(source)?;
        Ok(self.with_keys(Arc::new(keys)))
    }

    pub fn with_keys(self, keys: Arc<KeyMaterial>) -> KeysLoaded {
        debug!("signing keys attached");
        KeysLoaded {
            document: self.document,
            keys,
        }
    }
}

#[derive(Debug)]
pub struct KeysLoaded {
    document: String,
    keys: Arc<KeyMaterial>,
}

impl KeysLoaded {
    pub fn keys(&self) -> &KeyMaterial {
        &self.keys
    }

    /// Mints the id family and renders `SignedProperties` and `KeyInfo`.
    pub fn build_properties(self, options: &SigningOptions) -> Result<PropertiesBuilt, SigningError> {
        let ids = SignatureIds::allocate(options.id_strategy())?;
        ids.check_unused(&self.document)?;
        ensure_unsigned(&self.document)?;

        let signing_time = options.resolve_signing_time();
        let keys = &self.keys;
        let signed_properties = signature::signed_properties(
            &ids,
            &SignedPropertiesFields {
                signing_time: &signing_time.format(SIGNING_TIME_FORMAT).to_string(),
                certificate_digest: &certificate_digest(keys.certificate_der()),
                issuer_name: &keys.issuer_name(),
                serial_number: &keys.serial_number(),
            },
        );

        let wrap = options.wrap_base64();
        let modulus = keys.modulus_base64(wrap);
        let exponent = keys.exponent_base64();
        let key_value = options.include_key_value().then_some(RsaKeyValue {
            modulus: &modulus,
            exponent: &exponent,
        });
        let key_info = signature::key_info(&ids, &keys.certificate_base64(wrap), wrap, key_value.as_ref());
        debug!("signature properties built for {}", ids.signature());

        Ok(PropertiesBuilt {
            context: SigningContext {
                document: self.document,
                keys: self.keys,
                ids,
                signing_time,
                options: options.clone(),
            },
            signed_properties,
            key_info,
        })
    }
}

#[derive(Debug)]
pub struct PropertiesBuilt {
    context: SigningContext,
    signed_properties: String,
    key_info: String,
}

impl PropertiesBuilt {
    pub fn ids(&self) -> &SignatureIds {
        &self.context.ids
    }

    pub fn signed_properties(&self) -> &str {
        &self.signed_properties
    }

    pub fn key_info(&self) -> &str {
        &self.key_info
    }

    /// Digests the body in place and both fragments in the scope they will occupy.
    pub fn compute_digests(self) -> Result<DigestsComputed, SigningError> {
        let document = &self.context.document;
        let body_id = self.context.options.body_id();

        let root = C14nContext::for_document_root(document).map_err(|source| {
            SigningError::DigestComputation {
                reference: "document root".to_string(),
                source,
            }
        })?;
        let signature_scope = root.with_namespace("ds", DS_NS);
        let qualifying_scope = signature_scope.clone().with_namespace("xades", XADES_NS);

        let body = canonicalize_element_by_id(document, body_id).map_err(|source| {
            SigningError::DigestComputation {
                reference: format!("#{body_id}"),
                source,
            }
        })?;
        let key_info = canonicalize(&self.key_info, &signature_scope).map_err(|source| {
            SigningError::DigestComputation {
                reference: format!("#{}", self.context.ids.key_info()),
                source,
            }
        })?;
        let signed_properties =
            canonicalize(&self.signed_properties, &qualifying_scope).map_err(|source| {
                SigningError::DigestComputation {
                    reference: format!("#{}", self.context.ids.signed_properties()),
                    source,
                }
            })?;

        let digests = ReferenceDigests::new(
            digest_base64(DigestAlgorithm::Sha256, body.as_bytes()),
            digest_base64(DigestAlgorithm::Sha256, key_info.as_bytes()),
            digest_base64(DigestAlgorithm::Sha256, signed_properties.as_bytes()),
        );
        debug!(
            "reference digests: body={} key_info={} signed_properties={}",
            digests.body(),
            digests.key_info(),
            digests.signed_properties()
        );

        Ok(DigestsComputed {
            context: self.context,
            signed_properties: self.signed_properties,
            key_info: self.key_info,
            signature_scope,
            digests,
        })
    }
}

#[derive(Debug)]
pub struct DigestsComputed {
    context: SigningContext,
    signed_properties: String,
    key_info: String,
    signature_scope: C14nContext,
    digests: ReferenceDigests,
}

impl DigestsComputed {
    pub fn digests(&self) -> &ReferenceDigests {
        &self.digests
    }

    pub fn canonicalize_info(self) -> Result<InfoCanonicalized, SigningError> {
        let signed_info = signature::signed_info(&self.context.ids, self.context.options.body_id(), &self.digests);
        let canonical = canonicalize(&signed_info, &self.signature_scope).map_err(|source| {
            SigningError::DigestComputation {
                reference: "SignedInfo".to_string(),
                source,
            }
        })?;
        trace!("canonical SignedInfo: {canonical}");

        Ok(InfoCanonicalized {
            context: self.context,
            signed_properties: self.signed_properties,
            key_info: self.key_info,
            digests: self.digests,
            signed_info,
            canonical_signed_info: canonical,
        })
    }
}

#[derive(Debug)]
pub struct InfoCanonicalized {
    context: SigningContext,
    signed_properties: String,
    key_info: String,
    digests: ReferenceDigests,
    signed_info: String,
    canonical_signed_info: String,
}

impl InfoCanonicalized {
    /// Canonical `SignedInfo` bytes, i.e. what gets signed.
    pub fn canonical_signed_info(&self) -> &str {
        &self.canonical_signed_info
    }

    pub fn compute_signature(self) -> Result<SignatureComputed, SigningError> {
        let signature_value = sign_base64(
            &self.context.keys,
            self.canonical_signed_info.as_bytes(),
            self.context.options.wrap_base64(),
        )?;
        debug!("SignedInfo signed for {}", self.context.ids.signature());

        Ok(SignatureComputed {
            context: self.context,
            signed_properties: self.signed_properties,
            key_info: self.key_info,
            digests: self.digests,
            signed_info: self.signed_info,
            signature_value,
        })
    }
}

#[derive(Debug)]
pub struct SignatureComputed {
    context: SigningContext,
    signed_properties: String,
    key_info: String,
    digests: ReferenceDigests,
    signed_info: String,
    signature_value: String,
}

impl SignatureComputed {
    pub fn signature_value(&self) -> &str {
        &self.signature_value
    }

    /// Appends `ds:Signature` as the last child of the root element.
    pub fn inject(self) -> Result<Injected, SigningError> {
        let SigningContext {
            document,
            ids,
            signing_time,
            ..
        } = self.context;
        let fragment = signature::signature(
            &ids,
            &self.signed_info,
            &self.signature_value,
            &self.key_info,
            &self.signed_properties,
        );

        let offset = root_end_offset(&document)?;
        let mut xml = String::with_capacity(document.len() + fragment.len());
        xml.push_str(&document[..offset]);
        xml.push_str(&fragment);
        xml.push_str(&document[offset..]);
        debug!("{} injected at byte {offset}", ids.signature());

        Ok(Injected {
            xml,
            ids,
            digests: self.digests,
            signature_value: self.signature_value,
            signing_time,
        })
    }
}

/// The signed document.
#[derive(Debug, Clone)]
pub struct Injected {
    xml: String,
    ids: SignatureIds,
    digests: ReferenceDigests,
    signature_value: String,
    signing_time: DateTime<FixedOffset>,
}

impl Injected {
    pub fn xml(&self) -> &str {
        &self.xml
    }

    pub fn into_xml(self) -> String {
        self.xml
    }

    pub fn digests(&self) -> &ReferenceDigests {
        &self.digests
    }

    pub fn ids(&self) -> &SignatureIds {
        &self.ids
    }
}

/// Output of [`DocumentSigner::sign`].
#[derive(Debug, Clone)]
pub struct SignedDocument {
    xml: String,
    ids: SignatureIds,
    digests: ReferenceDigests,
    signature_value: String,
    signing_time: DateTime<FixedOffset>,
}

impl SignedDocument {
    pub fn xml(&self) -> &str {
        &self.xml
    }

    pub fn into_xml(self) -> String {
        self.xml
    }

    pub fn ids(&self) -> &SignatureIds {
        &self.ids
    }

    pub fn digests(&self) -> &ReferenceDigests {
        &self.digests
    }

    /// Base64 `SignatureValue`, as written into the document.
    pub fn signature_value(&self) -> &str {
        &self.signature_value
    }

    pub fn signing_time(&self) -> DateTime<FixedOffset> {
        self.signing_time
    }
}

impl From<Injected> for SignedDocument {
    fn from(injected: Injected) -> Self {
        Self {
            xml: injected.xml,
            ids: injected.ids,
            digests: injected.digests,
            signature_value: injected.signature_value,
            signing_time: injected.signing_time,
        }
    }
}

/// Signs documents with one set of keys. Cheap to clone and safe to share between threads.
#[derive(Debug, Clone)]
pub struct DocumentSigner {
    keys: Arc<KeyMaterial>,
}

impl DocumentSigner {
    pub fn new(keys: Arc<KeyMaterial>) -> Self {
        Self { keys }
    }

    pub fn from_source(source: &KeySource) -> Result<Self, SigningError> {
        Ok(Self::new(Arc::new(load_key_material(source)?)))
    }

    pub fn keys(&self) -> &KeyMaterial {
        &self.keys
    }

    pub fn sign(&self, xml: &str, options: &SigningOptions) -> Result<SignedDocument, SigningError> {
        let injected = Unsigned::new(xml)
            .with_keys(Arc::clone(&self.keys))
            .build_properties(options)?
            .compute_digests()?
            .canonicalize_info()?
            .compute_signature()?
            .inject()?;
        info!("document signed as {}", injected.ids().signature());
        Ok(injected.into())
    }
}

fn load_key_material(source: &KeySource) -> Result<KeyMaterial, SigningError> {
    source.load().map_err(|err| match err {
        KeyLoadError::Certificate { message } => SigningError::CertificateParse { message },
        other => SigningError::KeyLoad(other),
    })
}

/// Fails when the document already carries an XML-DSig `Signature` element.
fn ensure_unsigned(document: &str) -> Result<(), SigningError> {
    let injection = |reason: String| SigningError::Injection { reason };
    let mut reader = NsReader::from_str(document);
    loop {
        let (resolved, event) = reader
            .read_resolved_event()
            .map_err(|e| injection(e.to_string()))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e)
                if e.local_name().as_ref() == b"Signature"
                    && matches!(resolved, ResolveResult::Bound(Namespace(ns)) if ns == DS_NS.as_bytes()) =>
            {
                return Err(injection("document is already signed".to_string()));
            }
            Event::Eof => return Ok(()),
            _ => {}
        }
    }
}

/// Byte offset of the root element's end tag.
fn root_end_offset(document: &str) -> Result<usize, SigningError> {
    let injection = |reason: String| SigningError::Injection { reason };
    let mut reader = Reader::from_str(document);
    let mut depth = 0usize;
    loop {
        let position = reader.buffer_position();
        match reader.read_event().map_err(|e| injection(e.to_string()))? {
            Event::Start(_) => depth += 1,
            Event::End(_) => match depth {
                0 => return Err(injection("unbalanced end tag".to_string())),
                1 => {
                    return usize::try_from(position)
                        .map_err(|_| injection("document offset out of range".to_string()));
                }
                _ => depth -= 1,
            },
            Event::Empty(_) if depth == 0 => {
                return Err(injection("root element is self-closing".to_string()));
            }
            Event::Eof if depth == 0 => return Err(injection("document has no root element".to_string())),
            Event::Eof => return Err(injection("root element is not closed".to_string())),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_end_offset_points_at_closing_tag() {
        let document = "<?xml version=\"1.0\"?>\n<r a=\"1\"><c/><d>x</d></r>\n<!-- trailer -->";
        let offset = root_end_offset(document).expect("offset");
        assert!(document[offset..].starts_with("</r>"));
    }

    #[test]
    fn root_end_offset_rejects_unusable_documents() {
        for document in ["<r/>", "", "<!-- only -->", "<r><c></c>"] {
            assert!(
                matches!(root_end_offset(document), Err(SigningError::Injection { .. })),
                "{document:?} accepted"
            );
        }
    }

    #[test]
    fn existing_dsig_signature_is_detected_by_namespace() {
        let signed = format!(r#"<r xmlns:sig="{DS_NS}"><b/><sig:Signature Id="s"/></r>"#);
        assert!(matches!(
            ensure_unsigned(&signed),
            Err(SigningError::Injection { reason }) if reason == "document is already signed"
        ));

        let default_ns = format!(r#"<r><Signature xmlns="{DS_NS}"></Signature></r>"#);
        assert!(ensure_unsigned(&default_ns).is_err());

        let foreign = r#"<r xmlns:x="urn:other"><x:Signature/><Signature/></r>"#;
        assert!(ensure_unsigned(foreign).is_ok());
    }

    #[test]
    fn default_options_use_guatemala_offset() {
        let options = SigningOptions::default();
        assert_eq!(options.utc_offset().local_minus_utc(), -6 * 3600);
        assert!(options.signing_time().is_none());
        assert!(options.include_key_value());
        assert!(options.wrap_base64());
        assert_eq!(options.body_id(), BODY_ID);
        assert_eq!(options.resolve_signing_time().offset().local_minus_utc(), -6 * 3600);
    }

    #[test]
    fn signing_time_format_includes_offset() {
        let time = DateTime::parse_from_rfc3339("2024-01-01T00:00:00-06:00").expect("time");
        assert_eq!(
            time.format(SIGNING_TIME_FORMAT).to_string(),
            "2024-01-01T00:00:00-06:00"
        );
    }
}
