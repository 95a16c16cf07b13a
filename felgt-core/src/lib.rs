//! Rust toolkit for Guatemalan FEL e-invoices: document rendering and XAdES-BES signing.
//!
//! # Examples
//! ```rust,no_run
//! use felgt_core::config::SigningConfig;
//! use felgt_core::invoice::sign::{DocumentSigner, SigningOptions};
//! use felgt_core::keys::KeySource;
//!
//! let options = SigningOptions::try_from(&SigningConfig::default())?;
//! let signer = DocumentSigner::from_source(&KeySource::pkcs12("signer.p12", "secret"))?;
//! let signed = signer.sign(&std::fs::read_to_string("factura.xml")?, &options)?;
//! # let _ = signed;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
pub mod config;
pub mod invoice;
pub mod keys;

use thiserror::Error;

/// Top-level error wrapper for core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Invoice(#[from] invoice::InvoiceError),
    #[error(transparent)]
    Signing(#[from] invoice::sign::SigningError),
    #[error(transparent)]
    Keys(#[from] keys::KeyLoadError),
    #[error(transparent)]
    Canonicalization(#[from] invoice::sign::c14n::C14nError),
    #[error(transparent)]
    Verification(#[from] invoice::sign::verify::VerificationError),
    #[error(transparent)]
    Xml(#[from] invoice::xml::InvoiceXmlError),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
}
