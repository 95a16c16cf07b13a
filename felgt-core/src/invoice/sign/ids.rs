//! Cross-reference identifiers for one signature.
//!
//! All ids share a base; each is `<Kind>-<base>`, so members of a family are pairwise distinct.
use log::debug;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use rand::Rng;

use super::SigningError;
use super::c14n::ID_ATTRIBUTES;
use crate::config::IdStrategy;

const RANDOM_BASE_RANGE: std::ops::RangeInclusive<u32> = 0x1000_0000..=0x7FFF_FFFF;

/// The nine ids referenced from inside a `ds:Signature`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureIds {
    base: String,
    signature: String,
    signed_properties: String,
    signature_value: String,
    key_info: String,
    reference: String,
    reference_key_info: String,
    reference_signed_properties: String,
    qualifying_properties: String,
    object: String,
}

impl SignatureIds {
    /// Derives the family from `base`, which must be a non-empty run of `[A-Za-z0-9._-]`.
    pub fn derive(base: &str) -> Result<Self, SigningError> {
        if base.is_empty()
            || !base
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(SigningError::Identifier {
                message: format!("invalid id base '{base}'"),
            });
        }
        Ok(Self::with_base(base))
    }

    /// A family with a random decimal base drawn from the thread-local CSPRNG.
    pub fn random() -> Self {
        let base = rand::thread_rng().gen_range(RANDOM_BASE_RANGE).to_string();
        Self::with_base(&base)
    }

    fn with_base(base: &str) -> Self {
        Self {
            base: base.to_string(),
            signature: format!("Signature-{base}"),
            signed_properties: format!("SignedProperties-{base}"),
            signature_value: format!("SignatureValue-{base}"),
            key_info: format!("KeyInfo-{base}"),
            reference: format!("Reference-{base}"),
            reference_key_info: format!("ReferenceKeyInfo-{base}"),
            reference_signed_properties: format!("ReferenceSignedProperties-{base}"),
            qualifying_properties: format!("QualifyingProperties-{base}"),
            object: format!("Object-{base}"),
        }
    }

    pub fn allocate(strategy: &IdStrategy) -> Result<Self, SigningError> {
        let ids = match strategy {
            IdStrategy::Random => Self::random(),
            IdStrategy::Derived(base) => Self::derive(base)?,
        };
        debug!("allocated signature id base {}", ids.base);
        Ok(ids)
    }

    /// Fails when `document` already carries any id of this family.
    pub fn check_unused(&self, document: &str) -> Result<(), SigningError> {
        let mut reader = Reader::from_str(document);
        loop {
            let event = reader.read_event().map_err(|e| SigningError::Identifier {
                message: format!("document could not be scanned for ids: {e}"),
            })?;
            match event {
                Event::Start(e) | Event::Empty(e) => {
                    for attr in e.attributes() {
                        let attr = attr.map_err(|e| SigningError::Identifier {
                            message: format!("malformed attribute while scanning for ids: {e}"),
                        })?;
                        if !ID_ATTRIBUTES.iter().any(|name| attr.key.as_ref() == name.as_bytes()) {
                            continue;
                        }
                        let value = attr.unescape_value().map_err(|e| SigningError::Identifier {
                            message: format!("id attribute could not be unescaped: {e}"),
                        })?;
                        if self.all().any(|id| id == value) {
                            return Err(SigningError::Identifier {
                                message: format!("id '{value}' is already used in the document"),
                            });
                        }
                    }
                }
                Event::Eof => return Ok(()),
                _ => {}
            }
        }
    }

    pub fn all(&self) -> impl Iterator<Item = &str> {
        [
            &self.signature,
            &self.signed_properties,
            &self.signature_value,
            &self.key_info,
            &self.reference,
            &self.reference_key_info,
            &self.reference_signed_properties,
            &self.qualifying_properties,
            &self.object,
        ]
        .into_iter()
        .map(String::as_str)
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn signed_properties(&self) -> &str {
        &self.signed_properties
    }

    pub fn signature_value(&self) -> &str {
        &self.signature_value
    }

    pub fn key_info(&self) -> &str {
        &self.key_info
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn reference_key_info(&self) -> &str {
        &self.reference_key_info
    }

    pub fn reference_signed_properties(&self) -> &str {
        &self.reference_signed_properties
    }

    pub fn qualifying_properties(&self) -> &str {
        &self.qualifying_properties
    }

    pub fn object(&self) -> &str {
        &self.object
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn derive_builds_every_member() {
        let ids = SignatureIds::derive("fel-01").expect("ids");
        assert_eq!(ids.signature(), "Signature-fel-01");
        assert_eq!(ids.signed_properties(), "SignedProperties-fel-01");
        assert_eq!(ids.signature_value(), "SignatureValue-fel-01");
        assert_eq!(ids.key_info(), "KeyInfo-fel-01");
        assert_eq!(ids.reference(), "Reference-fel-01");
        assert_eq!(ids.reference_key_info(), "ReferenceKeyInfo-fel-01");
        assert_eq!(ids.reference_signed_properties(), "ReferenceSignedProperties-fel-01");
        assert_eq!(ids.qualifying_properties(), "QualifyingProperties-fel-01");
        assert_eq!(ids.object(), "Object-fel-01");
        assert_eq!(ids.all().collect::<HashSet<_>>().len(), 9);
    }

    #[test]
    fn derive_rejects_bad_bases() {
        for base in ["", "a b", "a\"b", "x<y", "ñ"] {
            assert!(
                matches!(SignatureIds::derive(base), Err(SigningError::Identifier { .. })),
                "{base:?} accepted"
            );
        }
    }

    #[test]
    fn random_base_is_in_range() {
        for _ in 0..32 {
            let ids = SignatureIds::random();
            let base: u32 = ids.base().parse().expect("decimal base");
            assert!(RANDOM_BASE_RANGE.contains(&base));
        }
    }

    #[test]
    fn check_unused_detects_collisions() {
        let ids = SignatureIds::derive("7").expect("ids");
        let clean = r#"<root><a ID="DatosEmision"/><b Id="Signature-8"/></root>"#;
        assert!(ids.check_unused(clean).is_ok());

        let taken = r#"<root><a ID="DatosEmision"/><b id="KeyInfo-7"/></root>"#;
        assert!(matches!(
            ids.check_unused(taken),
            Err(SigningError::Identifier { .. })
        ));
    }

    #[test]
    fn check_unused_compares_unescaped_values() {
        let ids = SignatureIds::derive("7").expect("ids");
        let escaped = r#"<root><b Id="KeyInfo&#45;7"/></root>"#;
        match ids.check_unused(escaped) {
            Err(SigningError::Identifier { message }) => assert!(message.contains("'KeyInfo-7'")),
            other => panic!("expected a collision, got {other:?}"),
        }
    }

    #[test]
    fn check_unused_reports_malformed_attributes() {
        let ids = SignatureIds::derive("7").expect("ids");
        let duplicated = r#"<root><b Id="x" Id="y"/></root>"#;
        match ids.check_unused(duplicated) {
            Err(SigningError::Identifier { message }) => assert!(message.contains("malformed attribute")),
            other => panic!("expected a malformed attribute error, got {other:?}"),
        }
    }

    #[test]
    fn allocate_follows_strategy() {
        let derived = SignatureIds::allocate(&IdStrategy::Derived("abc".into())).expect("derived");
        assert_eq!(derived.base(), "abc");
        let random = SignatureIds::allocate(&IdStrategy::Random).expect("random");
        assert_ne!(random.base(), "abc");
    }
}
