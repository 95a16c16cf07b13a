//! PKCS#12 (PFX) reader (RFC 7292).
//!
//! Handles the bundles produced by current and legacy OpenSSL:
//! - MAC: HMAC-SHA1/SHA256/SHA512 keyed through the PKCS#12 KDF
//! - legacy PBE: `pbeWithSHAAnd3-KeyTripleDES-CBC`, `pbeWithSHAAnd40BitRC2-CBC`,
//!   `pbeWithSHAAnd128BitRC2-CBC`
//! - PBES2: PBKDF2 (HMAC-SHA1/SHA256/SHA512) with AES-128/192/256-CBC
//!
//! BER input is accepted, since PFX files are frequently not strict DER.
use cipher::block_padding::Pkcs7;
use cipher::{BlockCipher, BlockDecryptMut, InnerIvInit, KeyIvInit};
use hmac::digest::{FixedOutputReset, KeyInit};
use hmac::{Hmac, Mac};
use log::{debug, warn};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;
use yasna::models::ObjectIdentifier;
use yasna::{ASN1Error, ASN1ErrorKind, BERReader, BERReaderSeq, Tag};

/// Failure while reading a PFX bundle.
#[derive(Debug, Error)]
pub enum Pkcs12Error {
    #[error("failed to parse {structure}: {message}")]
    Asn1 {
        structure: &'static str,
        message: String,
    },
    #[error("unsupported PKCS#12 algorithm {oid}")]
    UnsupportedAlgorithm { oid: String },
    #[error("PKCS#12 MAC verification failed (wrong password?)")]
    MacMismatch,
    #[error("PKCS#12 decryption failed (wrong password?): {message}")]
    Decrypt { message: String },
}

/// Items extracted from a bundle.
#[derive(Debug, Default)]
pub struct Pkcs12Contents {
    /// PKCS#8 DER private keys.
    pub private_keys: Vec<Vec<u8>>,
    /// DER X.509 certificates, in bag order.
    pub certificates: Vec<Vec<u8>>,
}

const OID_DATA: &[u64] = &[1, 2, 840, 113549, 1, 7, 1];
const OID_ENCRYPTED_DATA: &[u64] = &[1, 2, 840, 113549, 1, 7, 6];

const OID_KEY_BAG: &[u64] = &[1, 2, 840, 113549, 1, 12, 10, 1, 1];
const OID_PKCS8_SHROUDED_KEY_BAG: &[u64] = &[1, 2, 840, 113549, 1, 12, 10, 1, 2];
const OID_CERT_BAG: &[u64] = &[1, 2, 840, 113549, 1, 12, 10, 1, 3];
const OID_X509_CERTIFICATE: &[u64] = &[1, 2, 840, 113549, 1, 9, 22, 1];

const OID_PBE_SHA1_RC2_128: &[u64] = &[1, 2, 840, 113549, 1, 12, 1, 5];
const OID_PBE_SHA1_RC2_40: &[u64] = &[1, 2, 840, 113549, 1, 12, 1, 6];
const OID_PBE_SHA1_3DES: &[u64] = &[1, 2, 840, 113549, 1, 12, 1, 3];
const OID_PBES2: &[u64] = &[1, 2, 840, 113549, 1, 5, 13];
const OID_PBKDF2: &[u64] = &[1, 2, 840, 113549, 1, 5, 12];

const OID_AES_128_CBC: &[u64] = &[2, 16, 840, 1, 101, 3, 4, 1, 2];
const OID_AES_192_CBC: &[u64] = &[2, 16, 840, 1, 101, 3, 4, 1, 22];
const OID_AES_256_CBC: &[u64] = &[2, 16, 840, 1, 101, 3, 4, 1, 42];

const OID_SHA1: &[u64] = &[1, 3, 14, 3, 2, 26];
const OID_SHA256: &[u64] = &[2, 16, 840, 1, 101, 3, 4, 2, 1];
const OID_SHA512: &[u64] = &[2, 16, 840, 1, 101, 3, 4, 2, 3];
const OID_HMAC_SHA1: &[u64] = &[1, 2, 840, 113549, 2, 7];
const OID_HMAC_SHA256: &[u64] = &[1, 2, 840, 113549, 2, 9];
const OID_HMAC_SHA512: &[u64] = &[1, 2, 840, 113549, 2, 11];

// PKCS#12 KDF diversifiers (RFC 7292 B.3).
const ID_KEY: u8 = 1;
const ID_IV: u8 = 2;
const ID_MAC: u8 = 3;

fn oid(components: &[u64]) -> ObjectIdentifier {
    ObjectIdentifier::from_slice(components)
}

fn oid_string(oid: &ObjectIdentifier) -> String {
    oid.components()
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AesKeySize {
    Aes128,
    Aes192,
    Aes256,
}

impl AesKeySize {
    fn key_len(self) -> usize {
        match self {
            AesKeySize::Aes128 => 16,
            AesKeySize::Aes192 => 24,
            AesKeySize::Aes256 => 32,
        }
    }
}

#[derive(Debug)]
enum EncryptionAlgorithm {
    PbeSha1Tdes {
        salt: Vec<u8>,
        iterations: u32,
    },
    PbeSha1Rc2 {
        salt: Vec<u8>,
        iterations: u32,
        key_bits: usize,
    },
    Pbes2 {
        salt: Vec<u8>,
        iterations: u32,
        prf: HashAlgorithm,
        cipher: AesKeySize,
        iv: Vec<u8>,
    },
    Unsupported {
        oid: String,
    },
}

struct MacData {
    algorithm: HashAlgorithm,
    digest: Vec<u8>,
    salt: Vec<u8>,
    iterations: u32,
}

enum ContentInfo {
    Data(Vec<u8>),
    Encrypted {
        algorithm: EncryptionAlgorithm,
        ciphertext: Vec<u8>,
    },
}

enum SafeBag {
    Key(Vec<u8>),
    ShroudedKey {
        algorithm: EncryptionAlgorithm,
        ciphertext: Vec<u8>,
    },
    Certificate(Vec<u8>),
    Other,
}

/// Password forms used by the key derivation functions.
struct Password<'a> {
    /// UTF-16BE with a two-byte terminator, for the PKCS#12 KDF.
    bmp: Vec<u8>,
    /// Raw UTF-8, for PBKDF2.
    utf8: &'a [u8],
}

/// Parses `data` and decrypts every bag with `passphrase`.
pub fn parse(data: &[u8], passphrase: &str) -> Result<Pkcs12Contents, Pkcs12Error> {
    let (auth_safe, mac) = yasna::parse_ber(data, |r| {
        r.read_sequence(|r| {
            let version = r.next().read_u32()?;
            if version != 3 {
                return Err(ASN1Error::new(ASN1ErrorKind::Invalid));
            }
            let auth_safe = read_data_content_info(r.next())?;
            let mac = r.read_optional(read_mac_data)?;
            Ok((auth_safe, mac))
        })
    })
    .map_err(|e| asn1("PFX", e))?;

    let mut password = Password {
        bmp: bmp_password(passphrase),
        utf8: passphrase.as_bytes(),
    };

    if let Some(mac) = &mac {
        if verify_mac(mac, &auth_safe, &password.bmp).is_err() {
            // Some producers key an empty password without the BMP terminator.
            if !passphrase.is_empty() || verify_mac(mac, &auth_safe, &[]).is_err() {
                return Err(Pkcs12Error::MacMismatch);
            }
            warn!("PKCS#12 MAC matched an unterminated empty password");
            password.bmp = Vec::new();
        }
    }

    let content_infos = yasna::parse_ber(&auth_safe, |r| r.collect_sequence_of(read_content_info))
        .map_err(|e| asn1("AuthenticatedSafe", e))?;

    let mut contents = Pkcs12Contents::default();
    for info in content_infos {
        let bags_der = match info {
            ContentInfo::Data(data) => data,
            ContentInfo::Encrypted {
                algorithm,
                ciphertext,
            } => decrypt(&algorithm, &ciphertext, &password)?,
        };
        let bags = yasna::parse_ber(&bags_der, |r| r.collect_sequence_of(read_safe_bag))
            .map_err(|e| asn1("SafeContents", e))?;

        for bag in bags {
            match bag {
                SafeBag::Key(pkcs8) => contents.private_keys.push(pkcs8),
                SafeBag::ShroudedKey {
                    algorithm,
                    ciphertext,
                } => contents
                    .private_keys
                    .push(decrypt(&algorithm, &ciphertext, &password)?),
                SafeBag::Certificate(der) => contents.certificates.push(der),
                SafeBag::Other => {}
            }
        }
    }

    debug!(
        "PKCS#12 bundle holds {} key(s) and {} certificate(s)",
        contents.private_keys.len(),
        contents.certificates.len()
    );
    Ok(contents)
}

fn asn1(structure: &'static str, err: ASN1Error) -> Pkcs12Error {
    Pkcs12Error::Asn1 {
        structure,
        message: err.to_string(),
    }
}

fn read_data_content_info(r: BERReader<'_, '_>) -> Result<Vec<u8>, ASN1Error> {
    r.read_sequence(|r| {
        let content_type = r.next().read_oid()?;
        if content_type != oid(OID_DATA) {
            return Err(ASN1Error::new(ASN1ErrorKind::Invalid));
        }
        r.next().read_tagged(Tag::context(0), |r| r.read_bytes())
    })
}

fn read_content_info(r: BERReader<'_, '_>) -> Result<ContentInfo, ASN1Error> {
    r.read_sequence(|r| {
        let content_type = r.next().read_oid()?;
        if content_type == oid(OID_DATA) {
            let data = r.next().read_tagged(Tag::context(0), |r| r.read_bytes())?;
            Ok(ContentInfo::Data(data))
        } else if content_type == oid(OID_ENCRYPTED_DATA) {
            r.next().read_tagged(Tag::context(0), |r| {
                r.read_sequence(|r| {
                    let _version = r.next().read_u32()?;
                    r.next().read_sequence(|r| {
                        let _content_type = r.next().read_oid()?;
                        let algorithm = read_encryption_algorithm(r.next())?;
                        let ciphertext = r
                            .next()
                            .read_tagged_implicit(Tag::context(0), |r| r.read_bytes())?;
                        Ok(ContentInfo::Encrypted {
                            algorithm,
                            ciphertext,
                        })
                    })
                })
            })
        } else {
            Err(ASN1Error::new(ASN1ErrorKind::Invalid))
        }
    })
}

fn skip_bag_attributes(r: &mut BERReaderSeq<'_, '_>) -> Result<(), ASN1Error> {
    r.read_optional(|r| r.read_set_of(|r| r.read_der().map(|_| ())))?;
    Ok(())
}

fn read_safe_bag(r: BERReader<'_, '_>) -> Result<SafeBag, ASN1Error> {
    r.read_sequence(|r| {
        let bag_type = r.next().read_oid()?;

        let bag = if bag_type == oid(OID_KEY_BAG) {
            SafeBag::Key(r.next().read_tagged(Tag::context(0), |r| r.read_der())?)
        } else if bag_type == oid(OID_PKCS8_SHROUDED_KEY_BAG) {
            let (algorithm, ciphertext) = r.next().read_tagged(Tag::context(0), |r| {
                r.read_sequence(|r| {
                    let algorithm = read_encryption_algorithm(r.next())?;
                    let ciphertext = r.next().read_bytes()?;
                    Ok((algorithm, ciphertext))
                })
            })?;
            SafeBag::ShroudedKey {
                algorithm,
                ciphertext,
            }
        } else if bag_type == oid(OID_CERT_BAG) {
            let der = r.next().read_tagged(Tag::context(0), |r| {
                r.read_sequence(|r| {
                    let cert_type = r.next().read_oid()?;
                    if cert_type != oid(OID_X509_CERTIFICATE) {
                        return Err(ASN1Error::new(ASN1ErrorKind::Invalid));
                    }
                    r.next().read_tagged(Tag::context(0), |r| r.read_bytes())
                })
            })?;
            SafeBag::Certificate(der)
        } else {
            r.next().read_tagged(Tag::context(0), |r| r.read_der())?;
            SafeBag::Other
        };

        skip_bag_attributes(r)?;
        Ok(bag)
    })
}

fn read_pbe_params(r: BERReader<'_, '_>) -> Result<(Vec<u8>, u32), ASN1Error> {
    r.read_sequence(|r| {
        let salt = r.next().read_bytes()?;
        let iterations = r.next().read_u32()?;
        Ok((salt, iterations))
    })
}

fn read_encryption_algorithm(r: BERReader<'_, '_>) -> Result<EncryptionAlgorithm, ASN1Error> {
    r.read_sequence(|r| {
        let algorithm = r.next().read_oid()?;

        if algorithm == oid(OID_PBE_SHA1_3DES) {
            let (salt, iterations) = read_pbe_params(r.next())?;
            Ok(EncryptionAlgorithm::PbeSha1Tdes { salt, iterations })
        } else if algorithm == oid(OID_PBE_SHA1_RC2_40) || algorithm == oid(OID_PBE_SHA1_RC2_128) {
            let (salt, iterations) = read_pbe_params(r.next())?;
            let key_bits = if algorithm == oid(OID_PBE_SHA1_RC2_40) { 40 } else { 128 };
            Ok(EncryptionAlgorithm::PbeSha1Rc2 {
                salt,
                iterations,
                key_bits,
            })
        } else if algorithm == oid(OID_PBES2) {
            r.next().read_sequence(|r| {
                let (salt, iterations, prf) = r.next().read_sequence(|r| {
                    let kdf = r.next().read_oid()?;
                    if kdf != oid(OID_PBKDF2) {
                        return Err(ASN1Error::new(ASN1ErrorKind::Invalid));
                    }
                    r.next().read_sequence(|r| {
                        let salt = r.next().read_bytes()?;
                        let iterations = r.next().read_u32()?;
                        let mut prf = HashAlgorithm::Sha1;
                        // keyLength (INTEGER) and prf (SEQUENCE) are both optional.
                        if let Some(next) = r.read_optional(|r| r.read_der())? {
                            if next.first() == Some(&0x30) {
                                prf = read_prf(&next)?;
                            } else if let Some(prf_der) = r.read_optional(|r| r.read_der())? {
                                prf = read_prf(&prf_der)?;
                            }
                        }
                        Ok((salt, iterations, prf))
                    })
                })?;

                r.next().read_sequence(|r| {
                    let scheme = r.next().read_oid()?;
                    let cipher = if scheme == oid(OID_AES_256_CBC) {
                        AesKeySize::Aes256
                    } else if scheme == oid(OID_AES_192_CBC) {
                        AesKeySize::Aes192
                    } else if scheme == oid(OID_AES_128_CBC) {
                        AesKeySize::Aes128
                    } else {
                        r.read_optional(|r| r.read_der())?;
                        return Ok(EncryptionAlgorithm::Unsupported {
                            oid: oid_string(&scheme),
                        });
                    };
                    let iv = r.next().read_bytes()?;
                    Ok(EncryptionAlgorithm::Pbes2 {
                        salt: salt.clone(),
                        iterations,
                        prf,
                        cipher,
                        iv,
                    })
                })
            })
        } else {
            r.read_optional(|r| r.read_der())?;
            Ok(EncryptionAlgorithm::Unsupported {
                oid: oid_string(&algorithm),
            })
        }
    })
}

fn read_prf(der: &[u8]) -> Result<HashAlgorithm, ASN1Error> {
    yasna::parse_der(der, |r| {
        r.read_sequence(|r| {
            let prf = r.next().read_oid()?;
            r.read_optional(|r| r.read_null())?;
            if prf == oid(OID_HMAC_SHA1) {
                Ok(HashAlgorithm::Sha1)
            } else if prf == oid(OID_HMAC_SHA256) {
                Ok(HashAlgorithm::Sha256)
            } else if prf == oid(OID_HMAC_SHA512) {
                Ok(HashAlgorithm::Sha512)
            } else {
                Err(ASN1Error::new(ASN1ErrorKind::Invalid))
            }
        })
    })
}

fn read_mac_data(r: BERReader<'_, '_>) -> Result<MacData, ASN1Error> {
    r.read_sequence(|r| {
        let (algorithm, digest) = r.next().read_sequence(|r| {
            let algorithm = r.next().read_sequence(|r| {
                let hash = r.next().read_oid()?;
                r.read_optional(|r| r.read_null())?;
                if hash == oid(OID_SHA1) {
                    Ok(HashAlgorithm::Sha1)
                } else if hash == oid(OID_SHA256) {
                    Ok(HashAlgorithm::Sha256)
                } else if hash == oid(OID_SHA512) {
                    Ok(HashAlgorithm::Sha512)
                } else {
                    Err(ASN1Error::new(ASN1ErrorKind::Invalid))
                }
            })?;
            let digest = r.next().read_bytes()?;
            Ok((algorithm, digest))
        })?;
        let salt = r.next().read_bytes()?;
        let iterations = r.read_optional(|r| r.read_u32())?.unwrap_or(1);
        Ok(MacData {
            algorithm,
            digest,
            salt,
            iterations,
        })
    })
}

fn verify_mac(mac: &MacData, auth_safe: &[u8], bmp: &[u8]) -> Result<(), Pkcs12Error> {
    match mac.algorithm {
        HashAlgorithm::Sha1 => {
            let key = pkcs12_kdf::<Sha1>(ID_MAC, bmp, &mac.salt, mac.iterations, 20, 64);
            verify_hmac::<Hmac<Sha1>>(&key, auth_safe, &mac.digest)
        }
        HashAlgorithm::Sha256 => {
            let key = pkcs12_kdf::<Sha256>(ID_MAC, bmp, &mac.salt, mac.iterations, 32, 64);
            verify_hmac::<Hmac<Sha256>>(&key, auth_safe, &mac.digest)
        }
        HashAlgorithm::Sha512 => {
            let key = pkcs12_kdf::<Sha512>(ID_MAC, bmp, &mac.salt, mac.iterations, 64, 128);
            verify_hmac::<Hmac<Sha512>>(&key, auth_safe, &mac.digest)
        }
    }
}

fn verify_hmac<M: Mac + KeyInit>(key: &[u8], data: &[u8], expected: &[u8]) -> Result<(), Pkcs12Error> {
    let mut mac = <M as KeyInit>::new_from_slice(key).map_err(|_| Pkcs12Error::MacMismatch)?;
    Mac::update(&mut mac, data);
    mac.verify_slice(expected).map_err(|_| Pkcs12Error::MacMismatch)
}

fn decrypt(
    algorithm: &EncryptionAlgorithm,
    ciphertext: &[u8],
    password: &Password<'_>,
) -> Result<Vec<u8>, Pkcs12Error> {
    match algorithm {
        EncryptionAlgorithm::PbeSha1Tdes { salt, iterations } => {
            let key = pkcs12_kdf::<Sha1>(ID_KEY, &password.bmp, salt, *iterations, 24, 64);
            let iv = pkcs12_kdf::<Sha1>(ID_IV, &password.bmp, salt, *iterations, 8, 64);
            cbc_decrypt::<des::TdesEde3>(&key, &iv, ciphertext)
        }
        EncryptionAlgorithm::PbeSha1Rc2 {
            salt,
            iterations,
            key_bits,
        } => {
            let key = pkcs12_kdf::<Sha1>(ID_KEY, &password.bmp, salt, *iterations, key_bits / 8, 64);
            let iv = pkcs12_kdf::<Sha1>(ID_IV, &password.bmp, salt, *iterations, 8, 64);
            let rc2 = rc2::Rc2::new_with_eff_key_len(&key, *key_bits);
            let decryptor = cbc::Decryptor::<rc2::Rc2>::inner_iv_slice_init(rc2, &iv)
                .map_err(|e| decrypt_error("RC2-CBC init", e))?;
            unpad(decryptor, ciphertext, "RC2-CBC")
        }
        EncryptionAlgorithm::Pbes2 {
            salt,
            iterations,
            prf,
            cipher,
            iv,
        } => {
            let mut key = vec![0u8; cipher.key_len()];
            match prf {
                HashAlgorithm::Sha1 => pbkdf2::pbkdf2_hmac::<Sha1>(password.utf8, salt, *iterations, &mut key),
                HashAlgorithm::Sha256 => pbkdf2::pbkdf2_hmac::<Sha256>(password.utf8, salt, *iterations, &mut key),
                HashAlgorithm::Sha512 => pbkdf2::pbkdf2_hmac::<Sha512>(password.utf8, salt, *iterations, &mut key),
            }
            match cipher {
                AesKeySize::Aes128 => cbc_decrypt::<aes::Aes128>(&key, iv, ciphertext),
                AesKeySize::Aes192 => cbc_decrypt::<aes::Aes192>(&key, iv, ciphertext),
                AesKeySize::Aes256 => cbc_decrypt::<aes::Aes256>(&key, iv, ciphertext),
            }
        }
        EncryptionAlgorithm::Unsupported { oid } => {
            Err(Pkcs12Error::UnsupportedAlgorithm { oid: oid.clone() })
        }
    }
}

fn decrypt_error(stage: &str, err: impl std::fmt::Display) -> Pkcs12Error {
    Pkcs12Error::Decrypt {
        message: format!("{stage}: {err}"),
    }
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, Pkcs12Error>
where
    C: BlockDecryptMut + BlockCipher,
    cbc::Decryptor<C>: KeyIvInit + BlockDecryptMut,
{
    let decryptor = cbc::Decryptor::<C>::new_from_slices(key, iv).map_err(|e| decrypt_error("CBC init", e))?;
    unpad(decryptor, ciphertext, "CBC")
}

fn unpad<D: BlockDecryptMut>(decryptor: D, ciphertext: &[u8], stage: &str) -> Result<Vec<u8>, Pkcs12Error> {
    let mut buf = ciphertext.to_vec();
    let plaintext = decryptor
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|e| decrypt_error(stage, e))?;
    Ok(plaintext.to_vec())
}

/// PKCS#12 key derivation (RFC 7292 appendix B). `v` is the hash block size in bytes.
fn pkcs12_kdf<D>(id: u8, password: &[u8], salt: &[u8], iterations: u32, output_len: usize, v: usize) -> Vec<u8>
where
    D: Digest + FixedOutputReset,
{
    let u = <D as Digest>::output_size();
    let diversifier = vec![id; v];

    let mut input = repeat_to_multiple(salt, v);
    input.extend_from_slice(&repeat_to_multiple(password, v));

    let blocks = output_len.div_ceil(u);
    let mut result = Vec::with_capacity(blocks * u);

    let mut hasher = D::new();
    for block in 0..blocks {
        Digest::update(&mut hasher, &diversifier);
        Digest::update(&mut hasher, &input);
        let mut a = hasher.finalize_reset();
        for _ in 1..iterations {
            Digest::update(&mut hasher, &a);
            a = hasher.finalize_reset();
        }
        result.extend_from_slice(&a);

        if block + 1 < blocks {
            let b = repeat_to_multiple(&a, v);
            for chunk in input.chunks_mut(v) {
                add_one_plus(chunk, &b);
            }
        }
    }

    result.truncate(output_len);
    result
}

fn repeat_to_multiple(data: &[u8], v: usize) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }
    let len = data.len().div_ceil(v) * v;
    data.iter().copied().cycle().take(len).collect()
}

/// `block = (block + b + 1) mod 2^(8 * len)`.
fn add_one_plus(block: &mut [u8], b: &[u8]) {
    let mut carry: u16 = 1;
    for (byte, add) in block.iter_mut().rev().zip(b.iter().rev()) {
        let sum = *byte as u16 + *add as u16 + carry;
        *byte = sum as u8;
        carry = sum >> 8;
    }
}

fn bmp_password(passphrase: &str) -> Vec<u8> {
    let mut bmp: Vec<u8> = passphrase.encode_utf16().flat_map(u16::to_be_bytes).collect();
    bmp.extend_from_slice(&[0, 0]);
    bmp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bmp_password_is_utf16_be_with_terminator() {
        assert_eq!(bmp_password(""), vec![0, 0]);
        assert_eq!(bmp_password("A"), vec![0x00, 0x41, 0x00, 0x00]);
        assert_eq!(bmp_password("ñ"), vec![0x00, 0xf1, 0x00, 0x00]);
    }

    #[test]
    fn kdf_is_deterministic_and_diversified() {
        let password = bmp_password("test");
        let key = pkcs12_kdf::<Sha1>(ID_KEY, &password, b"saltsalt", 2048, 24, 64);
        let again = pkcs12_kdf::<Sha1>(ID_KEY, &password, b"saltsalt", 2048, 24, 64);
        let iv = pkcs12_kdf::<Sha1>(ID_IV, &password, b"saltsalt", 2048, 8, 64);
        assert_eq!(key.len(), 24);
        assert_eq!(key, again);
        assert_ne!(&key[..8], &iv[..]);

        let long = pkcs12_kdf::<Sha256>(ID_MAC, &password, b"saltsalt", 1, 80, 64);
        assert_eq!(long.len(), 80);
    }

    #[test]
    fn add_one_plus_carries_across_bytes() {
        let mut block = [0x00, 0xff, 0xff];
        add_one_plus(&mut block, &[0x00, 0x00, 0x00]);
        assert_eq!(block, [0x01, 0x00, 0x00]);
    }

    #[test]
    fn truncated_input_is_an_asn1_error() {
        let err = parse(&[0x30, 0x82, 0x01], "pw").expect_err("truncated");
        assert!(matches!(err, Pkcs12Error::Asn1 { structure: "PFX", .. }));
    }
}
