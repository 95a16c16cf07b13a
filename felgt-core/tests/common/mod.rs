use chrono::{DateTime, FixedOffset};
use felgt_core::config::IdStrategy;
use felgt_core::invoice::sign::SigningOptions;
use felgt_core::invoice::{
    Address, FinalizedInvoice, InvoiceBuilder, Issuer, ItemKind, LineItem, LineItemFields,
    Recipient,
};
use felgt_core::keys::KeyMaterial;
use std::path::PathBuf;
use std::sync::{Arc, Once};

#[allow(dead_code)]
pub const PASSPHRASE: &str = "fel-secret";
#[allow(dead_code)]
pub const FIXED_SIGNING_TIME: &str = "2024-01-01T00:00:00-06:00";

static LOGGING: Once = Once::new();

/// Routes `log` output to the test harness; set `RUST_LOG=debug` to see pipeline steps.
#[allow(dead_code)]
pub fn init_logging() {
    LOGGING.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

#[allow(dead_code)]
pub fn fixture(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(relative)
}

#[allow(dead_code)]
pub fn read_fixture(relative: &str) -> String {
    std::fs::read_to_string(fixture(relative)).expect("read fixture")
}

#[allow(dead_code)]
pub fn unsigned_document() -> String {
    read_fixture("invoices/unsigned-factura.xml")
}

#[allow(dead_code)]
pub fn pem_keys() -> Arc<KeyMaterial> {
    let keys = KeyMaterial::load(
        &fixture("keys/signer-cert.pem"),
        Some(fixture("keys/signer-key.pem").as_path()),
        "",
    )
    .expect("load PEM keys");
    Arc::new(keys)
}

#[allow(dead_code)]
pub fn signing_time() -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339(FIXED_SIGNING_TIME).expect("signing time")
}

/// Options that make the output reproducible.
#[allow(dead_code)]
pub fn fixed_options(base: &str) -> SigningOptions {
    SigningOptions::default()
        .with_signing_time(signing_time())
        .with_id_strategy(IdStrategy::Derived(base.into()))
}

#[allow(dead_code)]
pub fn sample_invoice() -> FinalizedInvoice {
    let issuer = Issuer::new(
        Issuer::GENERAL_AFFILIATION.into(),
        "1".into(),
        Some("ventas@example.com".into()),
        "12345679".into(),
        "Librería El Estudiante".into(),
        "Distribuidora Escolar, S.A.".into(),
        Address::guatemala("6a Avenida 1-23 Zona 1", "01001", "Guatemala", "Guatemala")
            .expect("issuer address"),
    )
    .expect("issuer");
    let recipient = Recipient::final_consumer("Consumidor Final").expect("recipient");
    let issued = DateTime::parse_from_rfc3339("2024-01-01T10:00:00-06:00").expect("issue date");

    InvoiceBuilder::new("100000001", issued, issuer, recipient)
        .item(
            LineItem::new(LineItemFields {
                kind: ItemKind::Good,
                unit_of_measure: "UNI".into(),
                description: "Cuaderno universitario & forro".into(),
                quantity: 2.0,
                unit_price: 56.0,
                discount: 0.0,
            })
            .expect("item"),
        )
        .item(
            LineItem::new(LineItemFields {
                kind: ItemKind::Service,
                unit_of_measure: "SER".into(),
                description: "Forrado".into(),
                quantity: 1.0,
                unit_price: 5.0,
                discount: 0.5,
            })
            .expect("item"),
        )
        .build()
        .expect("invoice")
}
