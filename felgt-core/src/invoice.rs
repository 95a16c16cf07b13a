//! FEL document types and builders.
mod builder;
pub mod sign;
pub mod xml;
pub use builder::{FinalizedInvoice, InvoiceBuilder, SignedInvoice};

use chrono::{DateTime, FixedOffset};
use felgt_derive::Validate;
use iso_currency::Currency;
use isocountry::CountryCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

type Result<T> = std::result::Result<T, InvoiceError>;

/// IVA rate applied to every line, as a fraction. Prices already include it.
pub const IVA_RATE: f64 = 0.12;

/// Invoice-related errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvoiceError {
    #[error("{message}")]
    InvalidField { message: String },
    #[error("line {line}: {message}")]
    InvalidLineItem { line: usize, message: String },
    #[error("an invoice needs at least one item")]
    MissingItems,
}

impl From<String> for InvoiceError {
    fn from(message: String) -> Self {
        InvoiceError::InvalidField { message }
    }
}

/// Postal address of an issuer or recipient.
///
/// # Examples
/// ```rust
/// use felgt_core::invoice::Address;
///
/// let address = Address::guatemala("6a Avenida 1-23 Zona 1", "01001", "Guatemala", "Guatemala")?;
/// assert_eq!(address.country_code().alpha2(), "GT");
/// # Ok::<(), felgt_core::invoice::InvoiceError>(())
/// ```
#[derive(Validate, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[validate_error(InvoiceError)]
#[validate(non_empty)]
pub struct Address {
    street: String,
    postal_code: String,
    municipality: String,
    department: String,
    #[validate(skip)]
    country_code: CountryCode,
}

impl Address {
    pub fn guatemala(
        street: impl Into<String>,
        postal_code: impl Into<String>,
        municipality: impl Into<String>,
        department: impl Into<String>,
    ) -> Result<Self> {
        Address::new(
            street.into(),
            postal_code.into(),
            municipality.into(),
            department.into(),
            CountryCode::GTM,
        )
    }

    pub fn street(&self) -> &str {
        &self.street
    }

    pub fn postal_code(&self) -> &str {
        &self.postal_code
    }

    pub fn municipality(&self) -> &str {
        &self.municipality
    }

    pub fn department(&self) -> &str {
        &self.department
    }

    pub fn country_code(&self) -> &CountryCode {
        &self.country_code
    }
}

/// The taxpayer issuing the invoice (`dte:Emisor`).
///
/// # Examples
/// ```rust
/// use felgt_core::invoice::{Address, Issuer};
///
/// let issuer = Issuer::new(
///     Issuer::GENERAL_AFFILIATION.into(),
///     "1".into(),
///     Some("facturas@example.com".into()),
///     "12345679".into(),
///     "Tienda Ejemplo".into(),
///     "Ejemplo, Sociedad Anonima".into(),
///     Address::guatemala("Zona 1", "01001", "Guatemala", "Guatemala")?,
/// )?;
/// assert_eq!(issuer.nit(), "12345679");
/// # Ok::<(), felgt_core::invoice::InvoiceError>(())
/// ```
#[derive(Validate, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[validate_error(InvoiceError)]
#[validate(non_empty)]
pub struct Issuer {
    iva_affiliation: String,
    establishment_code: String,
    #[validate(email)]
    email: Option<String>,
    #[validate(nit)]
    nit: String,
    commercial_name: String,
    legal_name: String,
    #[validate(skip)]
    address: Address,
}

impl Issuer {
    /// IVA affiliation of taxpayers under the general regime.
    pub const GENERAL_AFFILIATION: &'static str = "GEN";

    pub fn iva_affiliation(&self) -> &str {
        &self.iva_affiliation
    }

    pub fn establishment_code(&self) -> &str {
        &self.establishment_code
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn nit(&self) -> &str {
        &self.nit
    }

    pub fn commercial_name(&self) -> &str {
        &self.commercial_name
    }

    pub fn legal_name(&self) -> &str {
        &self.legal_name
    }

    pub fn address(&self) -> &Address {
        &self.address
    }
}

/// The buyer (`dte:Receptor`).
#[derive(Validate, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[validate_error(InvoiceError)]
pub struct Recipient {
    #[validate(nit)]
    id: String,
    #[validate(non_empty)]
    name: String,
    #[validate(email)]
    email: Option<String>,
    address: Option<Address>,
}

impl Recipient {
    /// Id used for a final consumer without a NIT.
    pub const FINAL_CONSUMER: &'static str = "CF";

    pub fn final_consumer(name: impl Into<String>) -> Result<Self> {
        Recipient::new(Self::FINAL_CONSUMER.into(), name.into(), None, None)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn address(&self) -> Option<&Address> {
        self.address.as_ref()
    }
}

/// A SAT phrase (`dte:Frase`), identified by scenario code and phrase type.
///
/// The default, `(1, 1)`, is the ISR withholding phrase that every invoice carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Phrase {
    scenario_code: u32,
    phrase_type: u32,
}

impl Phrase {
    pub fn new(scenario_code: u32, phrase_type: u32) -> Self {
        Self {
            scenario_code,
            phrase_type,
        }
    }

    pub fn scenario_code(&self) -> u32 {
        self.scenario_code
    }

    pub fn phrase_type(&self) -> u32 {
        self.phrase_type
    }
}

impl Default for Phrase {
    fn default() -> Self {
        Phrase::new(1, 1)
    }
}

/// Whether a line sells a good (`B`) or a service (`S`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ItemKind {
    Good,
    #[default]
    Service,
}

impl ItemKind {
    pub fn code(&self) -> &'static str {
        match self {
            ItemKind::Good => "B",
            ItemKind::Service => "S",
        }
    }
}

/// Inputs for [`LineItem::new`].
#[derive(Debug, Clone, PartialEq)]
pub struct LineItemFields {
    pub kind: ItemKind,
    pub unit_of_measure: String,
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub discount: f64,
}

/// Invoice line with IVA-inclusive amounts, all rounded to cents.
///
/// # Examples
/// ```rust
/// use felgt_core::invoice::{ItemKind, LineItem, LineItemFields};
///
/// let item = LineItem::new(LineItemFields {
///     kind: ItemKind::Good,
///     unit_of_measure: "UNI".into(),
///     description: "Cuaderno".into(),
///     quantity: 2.0,
///     unit_price: 56.0,
///     discount: 0.0,
/// })?;
/// assert_eq!(item.total(), 112.0);
/// assert_eq!(item.taxable_amount(), 100.0);
/// assert_eq!(item.tax(), 12.0);
/// # Ok::<(), felgt_core::invoice::InvoiceError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    kind: ItemKind,
    unit_of_measure: String,
    description: String,
    quantity: f64,
    unit_price: f64,
    price: f64,
    discount: f64,
    total: f64,
    taxable_amount: f64,
    tax: f64,
}

impl LineItem {
    /// # Errors
    /// Returns [`InvoiceError::InvalidLineItem`] (with `line` 0) for empty text, a
    /// non-positive quantity, a negative price or a discount outside `0..=price`.
    pub fn new(fields: LineItemFields) -> Result<Self> {
        let invalid = |message: &str| InvoiceError::InvalidLineItem {
            line: 0,
            message: message.to_string(),
        };
        if fields.description.trim().is_empty() {
            return Err(invalid("description must be non-empty"));
        }
        if fields.unit_of_measure.trim().is_empty() {
            return Err(invalid("unit_of_measure must be non-empty"));
        }
        if !(fields.quantity.is_finite() && fields.quantity > 0.0) {
            return Err(invalid("quantity must be positive"));
        }
        if !(fields.unit_price.is_finite() && fields.unit_price >= 0.0) {
            return Err(invalid("unit_price must not be negative"));
        }

        let price = round2(fields.quantity * fields.unit_price);
        let discount = round2(fields.discount);
        if !(discount.is_finite() && (0.0..=price).contains(&discount)) {
            return Err(invalid("discount must be between zero and the line price"));
        }
        let total = round2(price - discount);
        let taxable_amount = round2(total / (1.0 + IVA_RATE));
        let tax = round2(total - taxable_amount);

        Ok(Self {
            kind: fields.kind,
            unit_of_measure: fields.unit_of_measure,
            description: fields.description,
            quantity: fields.quantity,
            unit_price: fields.unit_price,
            price,
            discount,
            total,
            taxable_amount,
            tax,
        })
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn unit_of_measure(&self) -> &str {
        &self.unit_of_measure
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    pub fn unit_price(&self) -> f64 {
        self.unit_price
    }

    /// Quantity times unit price, before the discount.
    pub fn price(&self) -> f64 {
        self.price
    }

    pub fn discount(&self) -> f64 {
        self.discount
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn taxable_amount(&self) -> f64 {
        self.taxable_amount
    }

    pub fn tax(&self) -> f64 {
        self.tax
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Everything the `dte:DatosEmision` block is rendered from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceData {
    access_number: String,
    issue_datetime: DateTime<FixedOffset>,
    currency: Currency,
    issuer: Issuer,
    recipient: Recipient,
    phrases: Vec<Phrase>,
    items: Vec<LineItem>,
}

impl InvoiceData {
    pub fn access_number(&self) -> &str {
        &self.access_number
    }

    pub fn issue_datetime(&self) -> DateTime<FixedOffset> {
        self.issue_datetime
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn issuer(&self) -> &Issuer {
        &self.issuer
    }

    pub fn recipient(&self) -> &Recipient {
        &self.recipient
    }

    pub fn phrases(&self) -> &[Phrase] {
        &self.phrases
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }
}

/// Invoice-level sums of the line amounts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InvoiceTotals {
    tax_total: f64,
    grand_total: f64,
}

impl InvoiceTotals {
    pub fn from_items(items: &[LineItem]) -> Self {
        let (tax, total) = items
            .iter()
            .fold((0.0, 0.0), |(tax, total), item| (tax + item.tax(), total + item.total()));
        Self {
            tax_total: round2(tax),
            grand_total: round2(total),
        }
    }

    pub fn tax_total(&self) -> f64 {
        self.tax_total
    }

    pub fn grand_total(&self) -> f64 {
        self.grand_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::de::DeserializeOwned;

    fn assert_serde<T: Serialize + DeserializeOwned>() {}

    #[test]
    fn document_model_is_serde_ready() {
        assert_serde::<InvoiceData>();
        assert_serde::<Currency>();
    }

    fn item(quantity: f64, unit_price: f64, discount: f64) -> Result<LineItem> {
        LineItem::new(LineItemFields {
            kind: ItemKind::Service,
            unit_of_measure: "UNI".into(),
            description: "Servicio".into(),
            quantity,
            unit_price,
            discount,
        })
    }

    #[test]
    fn line_amounts_include_iva() {
        let line = item(3.0, 10.0, 2.5).expect("item");
        assert_eq!(line.price(), 30.0);
        assert_eq!(line.total(), 27.5);
        assert_eq!(line.taxable_amount(), 24.55);
        assert_eq!(line.tax(), 2.95);
    }

    #[test]
    fn line_rejects_bad_amounts() {
        assert!(matches!(item(0.0, 1.0, 0.0), Err(InvoiceError::InvalidLineItem { .. })));
        assert!(matches!(item(1.0, -1.0, 0.0), Err(InvoiceError::InvalidLineItem { .. })));
        assert!(matches!(item(1.0, 5.0, 6.0), Err(InvoiceError::InvalidLineItem { .. })));
        assert!(matches!(item(f64::NAN, 5.0, 0.0), Err(InvoiceError::InvalidLineItem { .. })));
    }

    #[test]
    fn totals_sum_rounded_lines() {
        let items = vec![item(1.0, 112.0, 0.0).expect("a"), item(2.0, 0.5, 0.0).expect("b")];
        let totals = InvoiceTotals::from_items(&items);
        assert_eq!(totals.grand_total(), 113.0);
        assert_eq!(totals.tax_total(), 12.11);
    }

    #[test]
    fn parties_validate_fields() {
        let address = Address::guatemala("Zona 1", "01001", "Guatemala", "Guatemala").expect("address");
        assert_eq!(address.country_code().alpha2(), "GT");
        assert!(Address::guatemala(" ", "01001", "Guatemala", "Guatemala").is_err());

        let issuer = Issuer::new(
            Issuer::GENERAL_AFFILIATION.into(),
            "1".into(),
            None,
            "1234567-K".into(),
            "Comercial".into(),
            "Legal".into(),
            address.clone(),
        );
        assert!(matches!(issuer, Err(InvoiceError::InvalidField { .. })));

        let issuer = Issuer::new(
            Issuer::GENERAL_AFFILIATION.into(),
            "1".into(),
            Some("not-an-email".into()),
            "12345679".into(),
            "Comercial".into(),
            "Legal".into(),
            address,
        );
        assert_eq!(
            issuer.err(),
            Some(InvoiceError::InvalidField {
                message: "email must be a valid e-mail address".into()
            })
        );

        let recipient = Recipient::final_consumer("Consumidor Final").expect("recipient");
        assert_eq!(recipient.id(), "CF");
        assert!(recipient.address().is_none());
    }

    #[test]
    fn default_phrase_is_one_one() {
        let phrase = Phrase::default();
        assert_eq!((phrase.scenario_code(), phrase.phrase_type()), (1, 1));
    }
}
