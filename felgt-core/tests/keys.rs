mod common;

use felgt_core::invoice::sign::digest::DigestAlgorithm;
use felgt_core::keys::{KeyLoadError, KeyMaterial, KeySource};
use std::io::Write;

const ISSUER_NAME: &str = "C=GT,O=Certificadora de Pruebas S.A.,CN=FEL Test CA";
const SERIAL_NUMBER: &str = "2246800662264969608";
const SHA256_FINGERPRINT: &str = "x8qRswhA2+DMBUUMz1CYAj9RdhOuogCiNyGjhUrQCoc=";
const SHA1_FINGERPRINT: &str = "aAl5EhJ8ONBYTS/TU0G0k4AExLw=";

fn load_pem(key: &str, passphrase: &str) -> Result<KeyMaterial, KeyLoadError> {
    KeyMaterial::load(
        &common::fixture("keys/signer-cert.pem"),
        Some(common::fixture(key).as_path()),
        passphrase,
    )
}

fn load_p12(bundle: &str, passphrase: &str) -> Result<KeyMaterial, KeyLoadError> {
    KeyMaterial::load(&common::fixture(bundle), None, passphrase)
}

fn assert_signer_identity(keys: &KeyMaterial) {
    assert_eq!(keys.issuer_name(), ISSUER_NAME);
    assert_eq!(keys.serial_number(), SERIAL_NUMBER);
    assert_eq!(keys.fingerprint(DigestAlgorithm::Sha256), SHA256_FINGERPRINT);
    assert_eq!(keys.fingerprint(DigestAlgorithm::Sha1), SHA1_FINGERPRINT);
    assert_eq!(keys.exponent_base64(), "AQAB");
}

#[test]
fn loads_pkcs8_pem_pair() {
    common::init_logging();
    let keys = load_pem("keys/signer-key.pem", "").expect("pkcs8 key");
    assert_signer_identity(&keys);
}

#[test]
fn loads_pkcs1_pem_key() {
    let keys = load_pem("keys/signer-key-pkcs1.pem", "").expect("pkcs1 key");
    assert_signer_identity(&keys);
}

#[test]
fn loads_encrypted_pkcs8_key() {
    let keys = load_pem("keys/signer-key-encrypted.pem", common::PASSPHRASE).expect("encrypted key");
    assert_signer_identity(&keys);
    assert!(matches!(
        load_pem("keys/signer-key-encrypted.pem", "wrong"),
        Err(KeyLoadError::WrongPassphrase)
    ));
}

#[test]
fn legacy_encrypted_rsa_key_is_unsupported() {
    assert!(matches!(
        load_pem("keys/signer-key-legacy-encrypted.pem", common::PASSPHRASE),
        Err(KeyLoadError::UnsupportedKeyFormat { .. })
    ));
}

#[test]
fn loads_pkcs12_bundles() {
    common::init_logging();
    let modern = load_p12("keys/signer.p12", common::PASSPHRASE).expect("AES bundle");
    assert_signer_identity(&modern);
    let legacy = load_p12("keys/signer-legacy.p12", common::PASSPHRASE).expect("RC2/3DES bundle");
    assert_signer_identity(&legacy);

    let pem = load_pem("keys/signer-key.pem", "").expect("pem");
    assert_eq!(modern.public_key(), pem.public_key());
    assert_eq!(legacy.certificate_der(), pem.certificate_der());
}

#[test]
fn wrong_pkcs12_passphrase_is_reported() {
    for bundle in ["keys/signer.p12", "keys/signer-legacy.p12"] {
        assert!(
            matches!(load_p12(bundle, "not-it"), Err(KeyLoadError::WrongPassphrase)),
            "{bundle}"
        );
    }
}

#[test]
fn certificate_and_key_must_match() {
    assert!(matches!(
        load_pem("keys/other-key.pem", ""),
        Err(KeyLoadError::KeyMismatch)
    ));
}

#[test]
fn key_source_loads_and_redacts() {
    let source = KeySource::pem(
        common::fixture("keys/signer-cert.pem"),
        common::fixture("keys/signer-key-encrypted.pem"),
        common::PASSPHRASE,
    );
    let keys = source.load().expect("load");
    assert_signer_identity(&keys);

    let debug = format!("{source:?}");
    assert!(!debug.contains(common::PASSPHRASE));
    assert!(debug.contains("<redacted>"));
}

#[test]
fn missing_and_unreadable_paths() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("missing.p12");
    match KeyMaterial::load(&missing, None, "") {
        Err(KeyLoadError::NotFound { path }) => assert_eq!(path, missing),
        other => panic!("expected NotFound, got {other:?}"),
    }

    assert!(matches!(
        KeyMaterial::load(dir.path(), None, ""),
        Err(KeyLoadError::Io { .. })
    ));
}

#[test]
fn garbage_inputs_are_rejected() {
    let mut bundle = tempfile::NamedTempFile::new().expect("temp bundle");
    bundle.write_all(b"definitely not DER").expect("write");
    assert!(matches!(
        KeyMaterial::load(bundle.path(), None, common::PASSPHRASE),
        Err(KeyLoadError::Pkcs12(_))
    ));

    let mut cert = tempfile::NamedTempFile::new().expect("temp cert");
    cert.write_all(b"no pem blocks here\n").expect("write");
    assert!(matches!(
        KeyMaterial::load(
            cert.path(),
            Some(common::fixture("keys/signer-key.pem").as_path()),
            ""
        ),
        Err(KeyLoadError::MissingCertificate)
    ));
}

#[test]
fn signatures_verify_with_the_certificate_key() {
    use rsa::pkcs1v15::{Signature, VerifyingKey};
    use rsa::signature::Verifier;
    use sha2::Sha256;

    let keys = load_pem("keys/signer-key.pem", "").expect("keys");
    let message = b"<ds:SignedInfo></ds:SignedInfo>";
    let signature = keys.sign(message).expect("sign");
    let signature = Signature::try_from(signature.as_slice()).expect("signature");
    VerifyingKey::<Sha256>::new(keys.public_key().clone())
        .verify(message, &signature)
        .expect("verify");
}
