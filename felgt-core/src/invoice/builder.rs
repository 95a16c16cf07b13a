use super::xml::ToXml;
use super::{InvoiceData, InvoiceError, InvoiceTotals, Issuer, LineItem, Phrase, Recipient};
use crate::invoice::sign::{DocumentSigner, ReferenceDigests, SignedDocument, SigningError, SigningOptions};
use chrono::{DateTime, FixedOffset};
use iso_currency::Currency;

/// An invoice whose contents are fixed and ready to render or sign.
#[derive(Debug, Clone)]
pub struct FinalizedInvoice {
    data: InvoiceData,
    totals: InvoiceTotals,
}

#[derive(Debug)]
pub struct SignedInvoice {
    finalized: FinalizedInvoice,
    signed: SignedDocument,
}

/// Collects the parts of a `FACT` document.
///
/// The default phrase `(1, 1)` is always present and comes first.
///
/// # Examples
/// ```rust
/// use chrono::DateTime;
/// use felgt_core::invoice::{
///     Address, InvoiceBuilder, Issuer, ItemKind, LineItem, LineItemFields, Recipient,
/// };
///
/// let issuer = Issuer::new(
///     Issuer::GENERAL_AFFILIATION.into(),
///     "1".into(),
///     None,
///     "12345679".into(),
///     "Tienda Ejemplo".into(),
///     "Ejemplo, Sociedad Anonima".into(),
///     Address::guatemala("Zona 1", "01001", "Guatemala", "Guatemala")?,
/// )?;
/// let invoice = InvoiceBuilder::new(
///     "100000001",
///     DateTime::parse_from_rfc3339("2024-01-01T10:00:00-06:00").expect("date"),
///     issuer,
///     Recipient::final_consumer("Consumidor Final")?,
/// )
/// .item(LineItem::new(LineItemFields {
///     kind: ItemKind::Good,
///     unit_of_measure: "UNI".into(),
///     description: "Cuaderno".into(),
///     quantity: 1.0,
///     unit_price: 11.2,
///     discount: 0.0,
/// })?)
/// .build()?;
/// assert_eq!(invoice.totals().grand_total(), 11.2);
/// # Ok::<(), felgt_core::invoice::InvoiceError>(())
/// ```
pub struct InvoiceBuilder {
    invoice: InvoiceData,
}

impl InvoiceBuilder {
    pub fn new(
        access_number: impl Into<String>,
        issue_datetime: DateTime<FixedOffset>,
        issuer: Issuer,
        recipient: Recipient,
    ) -> Self {
        Self {
            invoice: InvoiceData {
                access_number: access_number.into(),
                issue_datetime,
                currency: Currency::GTQ,
                issuer,
                recipient,
                phrases: vec![Phrase::default()],
                items: Vec::new(),
            },
        }
    }

    pub fn currency(mut self, currency: Currency) -> Self {
        self.invoice.currency = currency;
        self
    }

    /// Adds a phrase; one already present is not repeated.
    pub fn phrase(mut self, phrase: Phrase) -> Self {
        if !self.invoice.phrases.contains(&phrase) {
            self.invoice.phrases.push(phrase);
        }
        self
    }

    pub fn item(mut self, item: LineItem) -> Self {
        self.invoice.items.push(item);
        self
    }

    pub fn items(mut self, items: impl IntoIterator<Item = LineItem>) -> Self {
        self.invoice.items.extend(items);
        self
    }

    pub fn build(self) -> Result<FinalizedInvoice, InvoiceError> {
        if self.invoice.items.is_empty() {
            return Err(InvoiceError::MissingItems);
        }
        if self.invoice.access_number.trim().is_empty() {
            return Err(InvoiceError::InvalidField {
                message: "access_number must be non-empty".into(),
            });
        }

        Ok(FinalizedInvoice {
            totals: InvoiceTotals::from_items(&self.invoice.items),
            data: self.invoice,
        })
    }
}

impl FinalizedInvoice {
    pub fn data(&self) -> &InvoiceData {
        &self.data
    }

    pub fn totals(&self) -> &InvoiceTotals {
        &self.totals
    }

    /// Renders the document and appends a XAdES-BES signature to it.
    pub fn sign(
        self,
        signer: &DocumentSigner,
        options: &SigningOptions,
    ) -> Result<SignedInvoice, SigningError> {
        let xml = self.to_xml()?;
        let signed = signer.sign(&xml, options)?;
        Ok(SignedInvoice {
            finalized: self,
            signed,
        })
    }
}

impl SignedInvoice {
    pub fn data(&self) -> &InvoiceData {
        self.finalized.data()
    }

    pub fn totals(&self) -> &InvoiceTotals {
        self.finalized.totals()
    }

    pub fn signed_document(&self) -> &SignedDocument {
        &self.signed
    }

    pub fn digests(&self) -> &ReferenceDigests {
        self.signed.digests()
    }

    pub fn signature_value(&self) -> &str {
        self.signed.signature_value()
    }

    pub fn xml(&self) -> &str {
        self.signed.xml()
    }

    pub fn into_xml(self) -> String {
        self.signed.into_xml()
    }

    pub fn to_xml_base64(&self) -> String {
        use base64ct::{Base64, Encoding};
        Base64::encode_string(self.xml().as_bytes())
    }
}
