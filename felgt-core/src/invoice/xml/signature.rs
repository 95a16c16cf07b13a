//! Raw XML for the pieces of a XAdES-BES `ds:Signature`.
//!
//! Fragments use the `ds:`/`xades:` prefixes and rely on the declarations placed on
//! `ds:Signature` and `xades:QualifyingProperties`, so they are digested with that context.
use quick_xml::escape::escape;

use super::constants::{
    C14N_ALGORITHM, DS_NS, RSA_SHA256_ALGORITHM, SHA256_ALGORITHM, SIGNED_PROPERTIES_TYPE,
    XADES_NS,
};
use crate::invoice::sign::ReferenceDigests;
use crate::invoice::sign::ids::SignatureIds;

/// Values carried by `xades:SignedProperties`.
pub(crate) struct SignedPropertiesFields<'a> {
    pub signing_time: &'a str,
    pub certificate_digest: &'a str,
    pub issuer_name: &'a str,
    pub serial_number: &'a str,
}

/// `xades:SignedProperties`, on a single line.
pub(crate) fn signed_properties(ids: &SignatureIds, fields: &SignedPropertiesFields<'_>) -> String {
    format!(
        concat!(
            r#"<xades:SignedProperties Id="{id}">"#,
            "<xades:SignedSignatureProperties>",
            "<xades:SigningTime>{time}</xades:SigningTime>",
            "<xades:SigningCertificate>",
            "<xades:Cert>",
            "<xades:CertDigest>",
            r#"<ds:DigestMethod Algorithm="{sha256}"/>"#,
            "<ds:DigestValue>{digest}</ds:DigestValue>",
            "</xades:CertDigest>",
            "<xades:IssuerSerial>",
            "<ds:X509IssuerName>{issuer}</ds:X509IssuerName>",
            "<ds:X509SerialNumber>{serial}</ds:X509SerialNumber>",
            "</xades:IssuerSerial>",
            "</xades:Cert>",
            "</xades:SigningCertificate>",
            "</xades:SignedSignatureProperties>",
            "<xades:SignedDataObjectProperties>",
            r##"<xades:DataObjectFormat ObjectReference="#{reference}">"##,
            "<xades:MimeType>text/xml</xades:MimeType>",
            "<xades:Encoding>UTF-8</xades:Encoding>",
            "</xades:DataObjectFormat>",
            "</xades:SignedDataObjectProperties>",
            "</xades:SignedProperties>",
        ),
        id = ids.signed_properties(),
        time = escape(fields.signing_time),
        sha256 = SHA256_ALGORITHM,
        digest = fields.certificate_digest,
        issuer = escape(fields.issuer_name),
        serial = fields.serial_number,
        reference = ids.reference(),
    )
}

/// RSA public key parts for `ds:KeyValue`.
pub(crate) struct RsaKeyValue<'a> {
    pub modulus: &'a str,
    pub exponent: &'a str,
}

/// `ds:KeyInfo`. A wrapped certificate (ending in `\n`) starts on its own line.
pub(crate) fn key_info(
    ids: &SignatureIds,
    certificate: &str,
    wrapped: bool,
    key_value: Option<&RsaKeyValue<'_>>,
) -> String {
    let lead = if wrapped { "\n" } else { "" };
    let mut out = format!(
        "<ds:KeyInfo Id=\"{id}\">\n<ds:X509Data>\n<ds:X509Certificate>{lead}{certificate}</ds:X509Certificate>\n</ds:X509Data>\n",
        id = ids.key_info(),
    );
    if let Some(value) = key_value {
        out.push_str(&format!(
            "<ds:KeyValue>\n<ds:RSAKeyValue>\n<ds:Modulus>{modulus}</ds:Modulus>\n<ds:Exponent>{exponent}</ds:Exponent>\n</ds:RSAKeyValue>\n</ds:KeyValue>\n",
            modulus = value.modulus,
            exponent = value.exponent,
        ));
    }
    out.push_str("</ds:KeyInfo>");
    out
}

/// `ds:SignedInfo` with the body, `KeyInfo` and `SignedProperties` references, in that order.
pub(crate) fn signed_info(ids: &SignatureIds, body_id: &str, digests: &ReferenceDigests) -> String {
    format!(
        concat!(
            "<ds:SignedInfo>\n",
            r#"<ds:CanonicalizationMethod Algorithm="{c14n}"/>"#,
            r#"<ds:SignatureMethod Algorithm="{rsa}"/>"#,
            r##"<ds:Reference Id="{body_ref}" URI="#{body_id}">"##,
            "\n<ds:Transforms>\n",
            r#"<ds:Transform Algorithm="{c14n}"/>"#,
            "\n</ds:Transforms>\n",
            r#"<ds:DigestMethod Algorithm="{sha256}"/>"#,
            "\n<ds:DigestValue>{body_digest}</ds:DigestValue>\n",
            "</ds:Reference>\n",
            r##"<ds:Reference Id="{key_info_ref}" URI="#{key_info}">"##,
            "\n",
            r#"<ds:DigestMethod Algorithm="{sha256}"/>"#,
            "\n<ds:DigestValue>{key_info_digest}</ds:DigestValue>\n",
            "</ds:Reference>\n",
            r##"<ds:Reference Id="{props_ref}" Type="{props_type}" URI="#{props}">"##,
            "\n",
            r#"<ds:DigestMethod Algorithm="{sha256}"/>"#,
            "\n<ds:DigestValue>{props_digest}</ds:DigestValue>\n",
            "</ds:Reference>\n",
            "</ds:SignedInfo>",
        ),
        c14n = C14N_ALGORITHM,
        rsa = RSA_SHA256_ALGORITHM,
        sha256 = SHA256_ALGORITHM,
        body_ref = ids.reference(),
        body_id = escape(body_id),
        body_digest = digests.body(),
        key_info_ref = ids.reference_key_info(),
        key_info = ids.key_info(),
        key_info_digest = digests.key_info(),
        props_ref = ids.reference_signed_properties(),
        props_type = SIGNED_PROPERTIES_TYPE,
        props = ids.signed_properties(),
        props_digest = digests.signed_properties(),
    )
}

/// Complete `ds:Signature`, ready to be appended as the last child of the root.
pub(crate) fn signature(
    ids: &SignatureIds,
    signed_info: &str,
    signature_value: &str,
    key_info: &str,
    signed_properties: &str,
) -> String {
    format!(
        concat!(
            r#"<ds:Signature xmlns:ds="{ds}" Id="{signature_id}">"#,
            "\n{signed_info}\n",
            r#"<ds:SignatureValue Id="{value_id}">"#,
            "\n{signature_value}</ds:SignatureValue>\n",
            "{key_info}\n",
            r#"<ds:Object Id="{object_id}">"#,
            r##"<xades:QualifyingProperties xmlns:xades="{xades}" Id="{qualifying_id}" Target="#{signature_id}">"##,
            "{signed_properties}",
            "</xades:QualifyingProperties>",
            "</ds:Object>",
            "</ds:Signature>",
        ),
        ds = DS_NS,
        xades = XADES_NS,
        signature_id = ids.signature(),
        signed_info = signed_info,
        value_id = ids.signature_value(),
        signature_value = signature_value,
        key_info = key_info,
        object_id = ids.object(),
        qualifying_id = ids.qualifying_properties(),
        signed_properties = signed_properties,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::sign::c14n::{C14nContext, canonicalize};

    fn ids() -> SignatureIds {
        SignatureIds::derive("t1").expect("ids")
    }

    fn signature_context() -> C14nContext {
        C14nContext::new()
            .with_namespace("ds", DS_NS)
            .with_namespace("xades", XADES_NS)
    }

    #[test]
    fn signed_properties_is_single_line_and_escaped() {
        let xml = signed_properties(
            &ids(),
            &SignedPropertiesFields {
                signing_time: "2024-01-01T00:00:00-06:00",
                certificate_digest: "abc=",
                issuer_name: "CN=A & B,O=<x>",
                serial_number: "42",
            },
        );
        assert!(!xml.contains('\n'));
        assert!(xml.starts_with(r#"<xades:SignedProperties Id="SignedProperties-t1">"#));
        assert!(xml.contains("<ds:X509IssuerName>CN=A &amp; B,O=&lt;x&gt;</ds:X509IssuerName>"));
        assert!(xml.contains(r##"ObjectReference="#Reference-t1""##));
        canonicalize(&xml, &signature_context()).expect("well formed");
    }

    #[test]
    fn key_info_optionally_carries_key_value() {
        let with_value = key_info(
            &ids(),
            "QUJD\n",
            true,
            Some(&RsaKeyValue {
                modulus: "bW9k\n",
                exponent: "AQAB",
            }),
        );
        assert!(with_value.contains("<ds:X509Certificate>\nQUJD\n</ds:X509Certificate>"));
        assert!(with_value.contains("<ds:Exponent>AQAB</ds:Exponent>"));

        let bare = key_info(&ids(), "QUJD", false, None);
        assert!(bare.contains("<ds:X509Certificate>QUJD</ds:X509Certificate>"));
        assert!(!bare.contains("KeyValue"));
        canonicalize(&bare, &signature_context()).expect("well formed");
    }

    #[test]
    fn signed_info_lists_references_in_order() {
        let digests = ReferenceDigests::new("Ym9keQ==".into(), "a2V5".into(), "cHJvcHM=".into());
        let xml = signed_info(&ids(), "DatosEmision", &digests);
        let body = xml.find(r##"URI="#DatosEmision""##).expect("body reference");
        let key = xml.find(r##"URI="#KeyInfo-t1""##).expect("key info reference");
        let props = xml
            .find(r##"URI="#SignedProperties-t1""##)
            .expect("signed properties reference");
        assert!(body < key && key < props);
        assert!(xml.contains(r#"Type="http://uri.etsi.org/01903#SignedProperties""#));
        assert_eq!(xml.matches("<ds:Transform ").count(), 1);
        canonicalize(&xml, &signature_context()).expect("well formed");
    }

    #[test]
    fn signature_wraps_all_parts() {
        let xml = signature(
            &ids(),
            "<ds:SignedInfo></ds:SignedInfo>",
            "c2ln\n",
            r#"<ds:KeyInfo Id="KeyInfo-t1"></ds:KeyInfo>"#,
            r#"<xades:SignedProperties Id="SignedProperties-t1"></xades:SignedProperties>"#,
        );
        assert!(xml.starts_with(
            r#"<ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#" Id="Signature-t1">"#
        ));
        assert!(xml.contains(r##"Target="#Signature-t1""##));
        assert!(xml.ends_with("</ds:Object></ds:Signature>"));
        canonicalize(&xml, &C14nContext::new()).expect("well formed");
    }
}
