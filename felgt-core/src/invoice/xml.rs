//! XML rendering of unsigned FEL documents.
use super::{Address, FinalizedInvoice, InvoiceData, Issuer, LineItem, Phrase, Recipient, SignedInvoice};

use constants::{
    CERTIFIED_DATA_ID, DOCUMENT_CLASS, DS_NS, DTE_NS, DTE_VERSION, INVOICE_TYPE, IVA_SHORT_NAME,
};
use helpers::{FixedPrecision, amount};
use quick_xml::se::{SeError, Serializer as QuickXmlSerializer};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use thiserror::Error;

pub(crate) mod constants;
pub(crate) mod signature;

pub use constants::BODY_ID;

/// Taxable-unit code for amounts subject to IVA.
const TAXABLE_UNIT_CODE: u32 = 1;
const ISSUE_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";

/// XML serialization error.
#[derive(Debug, Error)]
pub enum InvoiceXmlError {
    #[error("failed to serialize invoice to XML: {source}")]
    Serialize {
        #[from]
        source: SeError,
    },
}

/// XML formatting options.
#[derive(Debug, Clone, Copy, Default)]
pub enum XmlFormat {
    #[default]
    Compact,
    Pretty {
        indent_char: char,
        indent_size: usize,
    },
}

mod helpers {
    use serde::ser::{Serialize, Serializer};
    use std::fmt::{self, Display, Formatter};

    pub(super) struct FixedPrecision {
        value: f64,
        precision: usize,
    }

    impl FixedPrecision {
        pub(super) fn new(value: f64, precision: usize) -> Self {
            Self { value, precision }
        }
    }

    impl Display for FixedPrecision {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "{:.*}", self.precision, self.value)
        }
    }

    impl Serialize for FixedPrecision {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.collect_str(self)
        }
    }

    /// Monetary amount with two decimals.
    pub(super) fn amount(value: f64) -> FixedPrecision {
        FixedPrecision::new(value, 2)
    }
}

/// Wrapper for serializing invoices to XML.
pub struct InvoiceXml<'a>(pub &'a FinalizedInvoice);

struct GeneralDataXml<'a>(&'a InvoiceData);

impl<'a> Serialize for GeneralDataXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.0;
        let mut st = s.serialize_struct("dte:DatosGenerales", 4)?;
        st.serialize_field("@CodigoMoneda", data.currency().code())?;
        st.serialize_field(
            "@FechaHoraEmision",
            &data.issue_datetime().format(ISSUE_DATETIME_FORMAT).to_string(),
        )?;
        st.serialize_field("@NumeroAcceso", data.access_number())?;
        st.serialize_field("@Tipo", INVOICE_TYPE)?;
        st.end()
    }
}

struct AddressXml<'a> {
    tag: &'static str,
    address: &'a Address,
}

impl<'a> Serialize for AddressXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let address = self.address;
        let mut st = s.serialize_struct(self.tag, 5)?;
        st.serialize_field("dte:Direccion", address.street())?;
        st.serialize_field("dte:CodigoPostal", address.postal_code())?;
        st.serialize_field("dte:Municipio", address.municipality())?;
        st.serialize_field("dte:Departamento", address.department())?;
        st.serialize_field("dte:Pais", address.country_code().alpha2())?;
        st.end()
    }
}

struct IssuerXml<'a>(&'a Issuer);

impl<'a> Serialize for IssuerXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let issuer = self.0;
        let mut st = s.serialize_struct("dte:Emisor", 7)?;
        st.serialize_field("@AfiliacionIVA", issuer.iva_affiliation())?;
        st.serialize_field("@CodigoEstablecimiento", issuer.establishment_code())?;
        if let Some(email) = issuer.email() {
            st.serialize_field("@CorreoEmisor", email)?;
        }
        st.serialize_field("@NITEmisor", issuer.nit())?;
        st.serialize_field("@NombreComercial", issuer.commercial_name())?;
        st.serialize_field("@NombreEmisor", issuer.legal_name())?;
        st.serialize_field(
            "dte:DireccionEmisor",
            &AddressXml {
                tag: "dte:DireccionEmisor",
                address: issuer.address(),
            },
        )?;
        st.end()
    }
}

struct RecipientXml<'a>(&'a Recipient);

impl<'a> Serialize for RecipientXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let recipient = self.0;
        let mut st = s.serialize_struct("dte:Receptor", 4)?;
        if let Some(email) = recipient.email() {
            st.serialize_field("@CorreoReceptor", email)?;
        }
        st.serialize_field("@IDReceptor", recipient.id())?;
        st.serialize_field("@NombreReceptor", recipient.name())?;
        if let Some(address) = recipient.address() {
            st.serialize_field(
                "dte:DireccionReceptor",
                &AddressXml {
                    tag: "dte:DireccionReceptor",
                    address,
                },
            )?;
        }
        st.end()
    }
}

struct PhraseXml<'a>(&'a Phrase);

impl<'a> Serialize for PhraseXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("dte:Frase", 2)?;
        st.serialize_field("@CodigoEscenario", &self.0.scenario_code())?;
        st.serialize_field("@TipoFrase", &self.0.phrase_type())?;
        st.end()
    }
}

struct PhrasesXml<'a>(&'a [Phrase]);

impl<'a> Serialize for PhrasesXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("dte:Frases", self.0.len())?;
        for phrase in self.0 {
            st.serialize_field("dte:Frase", &PhraseXml(phrase))?;
        }
        st.end()
    }
}

struct ItemTaxXml<'a>(&'a LineItem);

impl<'a> Serialize for ItemTaxXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let item = self.0;
        let mut st = s.serialize_struct("dte:Impuesto", 4)?;
        st.serialize_field("dte:NombreCorto", IVA_SHORT_NAME)?;
        st.serialize_field("dte:CodigoUnidadGravable", &TAXABLE_UNIT_CODE)?;
        st.serialize_field("dte:MontoGravable", &amount(item.taxable_amount()))?;
        st.serialize_field("dte:MontoImpuesto", &amount(item.tax()))?;
        st.end()
    }
}

struct ItemTaxesXml<'a>(&'a LineItem);

impl<'a> Serialize for ItemTaxesXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("dte:Impuestos", 1)?;
        st.serialize_field("dte:Impuesto", &ItemTaxXml(self.0))?;
        st.end()
    }
}

struct ItemXml<'a>(usize, &'a LineItem);

impl<'a> Serialize for ItemXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let (line, item) = (self.0, self.1);
        let mut st = s.serialize_struct("dte:Item", 10)?;
        st.serialize_field("@BienOServicio", item.kind().code())?;
        st.serialize_field("@NumeroLinea", &line)?;
        st.serialize_field("dte:Cantidad", &FixedPrecision::new(item.quantity(), 2))?;
        st.serialize_field("dte:UnidadMedida", item.unit_of_measure())?;
        st.serialize_field("dte:Descripcion", item.description())?;
        st.serialize_field("dte:PrecioUnitario", &amount(item.unit_price()))?;
        st.serialize_field("dte:Precio", &amount(item.price()))?;
        st.serialize_field("dte:Descuento", &amount(item.discount()))?;
        st.serialize_field("dte:Impuestos", &ItemTaxesXml(item))?;
        st.serialize_field("dte:Total", &amount(item.total()))?;
        st.end()
    }
}

struct ItemsXml<'a>(&'a [LineItem]);

impl<'a> Serialize for ItemsXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("dte:Items", self.0.len())?;
        for (i, item) in self.0.iter().enumerate() {
            st.serialize_field("dte:Item", &ItemXml(i + 1, item))?;
        }
        st.end()
    }
}

fn totals(tax_total: f64, grand_total: f64) -> impl Serialize {
    struct TaxTotalSer(f64);

    impl Serialize for TaxTotalSer {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let mut st = s.serialize_struct("dte:TotalImpuesto", 2)?;
            st.serialize_field("@NombreCorto", IVA_SHORT_NAME)?;
            st.serialize_field("@TotalMontoImpuesto", &amount(self.0))?;
            st.end()
        }
    }

    struct TaxTotalsSer(f64);

    impl Serialize for TaxTotalsSer {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let mut st = s.serialize_struct("dte:TotalImpuestos", 1)?;
            st.serialize_field("dte:TotalImpuesto", &TaxTotalSer(self.0))?;
            st.end()
        }
    }

    struct TotalsSer {
        tax_total: f64,
        grand_total: f64,
    }

    impl Serialize for TotalsSer {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let mut st = s.serialize_struct("dte:Totales", 2)?;
            st.serialize_field("dte:TotalImpuestos", &TaxTotalsSer(self.tax_total))?;
            st.serialize_field("dte:GranTotal", &amount(self.grand_total))?;
            st.end()
        }
    }

    TotalsSer {
        tax_total,
        grand_total,
    }
}

struct IssuanceXml<'a>(&'a FinalizedInvoice);

impl<'a> Serialize for IssuanceXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.0.data();
        let sums = self.0.totals();
        let mut st = s.serialize_struct("dte:DatosEmision", 7)?;
        st.serialize_field("@ID", BODY_ID)?;
        st.serialize_field("dte:DatosGenerales", &GeneralDataXml(data))?;
        st.serialize_field("dte:Emisor", &IssuerXml(data.issuer()))?;
        st.serialize_field("dte:Receptor", &RecipientXml(data.recipient()))?;
        st.serialize_field("dte:Frases", &PhrasesXml(data.phrases()))?;
        st.serialize_field("dte:Items", &ItemsXml(data.items()))?;
        st.serialize_field(
            "dte:Totales",
            &totals(sums.tax_total(), sums.grand_total()),
        )?;
        st.end()
    }
}

struct DteXml<'a>(&'a FinalizedInvoice);

impl<'a> Serialize for DteXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("dte:DTE", 2)?;
        st.serialize_field("@ID", CERTIFIED_DATA_ID)?;
        st.serialize_field("dte:DatosEmision", &IssuanceXml(self.0))?;
        st.end()
    }
}

struct SatXml<'a>(&'a FinalizedInvoice);

impl<'a> Serialize for SatXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("dte:SAT", 2)?;
        st.serialize_field("@ClaseDocumento", DOCUMENT_CLASS)?;
        st.serialize_field("dte:DTE", &DteXml(self.0))?;
        st.end()
    }
}

impl<'a> Serialize for InvoiceXml<'a> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut root = serializer.serialize_struct("dte:GTDocumento", 4)?;
        root.serialize_field("@xmlns:dte", DTE_NS)?;
        root.serialize_field("@xmlns:ds", DS_NS)?;
        root.serialize_field("@Version", DTE_VERSION)?;
        root.serialize_field("dte:SAT", &SatXml(self.0))?;
        root.end()
    }
}

/// Serialize invoices to XML.
///
/// # Examples
/// ```rust,no_run
/// use felgt_core::invoice::xml::ToXml;
/// use felgt_core::invoice::FinalizedInvoice;
///
/// let invoice: FinalizedInvoice = unimplemented!();
/// let xml = invoice.to_xml()?;
/// # let _ = xml;
/// # Ok::<(), felgt_core::invoice::xml::InvoiceXmlError>(())
/// ```
pub trait ToXml {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, InvoiceXmlError>;

    fn to_xml(&self) -> Result<String, InvoiceXmlError> {
        self.to_xml_with_format(XmlFormat::Compact)
    }

    fn to_xml_pretty(&self) -> Result<String, InvoiceXmlError> {
        self.to_xml_with_format(XmlFormat::Pretty {
            indent_char: ' ',
            indent_size: 2,
        })
    }
}

impl ToXml for FinalizedInvoice {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, InvoiceXmlError> {
        let mut buffer = String::with_capacity(4096);
        buffer.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        buffer.push('\n');

        {
            let mut serializer = QuickXmlSerializer::new(&mut buffer);
            if let XmlFormat::Pretty {
                indent_char,
                indent_size,
            } = format
            {
                serializer.indent(indent_char, indent_size);
            }
            InvoiceXml(self).serialize(serializer)?;
        }

        Ok(buffer)
    }
}

/// A signed document is returned as signed; reformatting would break its digests.
impl ToXml for SignedInvoice {
    fn to_xml_with_format(&self, _format: XmlFormat) -> Result<String, InvoiceXmlError> {
        Ok(self.xml().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::sign::c14n::canonicalize_element_by_id;
    use crate::invoice::{
        Address, InvoiceBuilder, Issuer, ItemKind, LineItem, LineItemFields, Phrase, Recipient,
    };
    use chrono::DateTime;

    fn invoice(recipient: Recipient) -> FinalizedInvoice {
        let issuer = Issuer::new(
            Issuer::GENERAL_AFFILIATION.into(),
            "1".into(),
            Some("ventas@example.com".into()),
            "12345679".into(),
            "Tienda & Cia".into(),
            "Tienda, S.A.".into(),
            Address::guatemala("6a Avenida 1-23 Zona 1", "01001", "Guatemala", "Guatemala")
                .expect("address"),
        )
        .expect("issuer");
        let issued = DateTime::parse_from_rfc3339("2024-01-01T10:00:00-06:00").expect("date");
        InvoiceBuilder::new("100000001", issued, issuer, recipient)
            .phrase(Phrase::new(2, 1))
            .item(
                LineItem::new(LineItemFields {
                    kind: ItemKind::Good,
                    unit_of_measure: "UNI".into(),
                    description: "Cuaderno <rayado>".into(),
                    quantity: 2.0,
                    unit_price: 56.0,
                    discount: 0.0,
                })
                .expect("item"),
            )
            .build()
            .expect("invoice")
    }

    #[test]
    fn renders_fel_document_structure() {
        let xml = invoice(Recipient::final_consumer("Consumidor Final").expect("recipient"))
            .to_xml()
            .expect("xml");

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<dte:GTDocumento"));
        assert!(xml.contains(r#"xmlns:dte="http://www.sat.gob.gt/dte/fel/0.1.0""#));
        assert!(xml.contains(r#"Version="0.4""#));
        assert!(xml.contains(r#"<dte:SAT ClaseDocumento="dte"><dte:DTE ID="DatosCertificados"><dte:DatosEmision ID="DatosEmision">"#));
        assert!(xml.contains(
            r#"<dte:DatosGenerales CodigoMoneda="GTQ" FechaHoraEmision="2024-01-01T10:00:00-06:00" NumeroAcceso="100000001" Tipo="FACT"/>"#
        ));
        assert!(xml.contains(r#"NombreComercial="Tienda &amp; Cia""#));
        assert!(xml.contains("<dte:Pais>GT</dte:Pais>"));
        assert!(xml.contains(r#"<dte:Receptor IDReceptor="CF" NombreReceptor="Consumidor Final"/>"#));
        assert!(xml.contains(
            r#"<dte:Frases><dte:Frase CodigoEscenario="1" TipoFrase="1"/><dte:Frase CodigoEscenario="2" TipoFrase="1"/></dte:Frases>"#
        ));
        assert!(xml.contains(r#"<dte:Item BienOServicio="B" NumeroLinea="1">"#));
        assert!(xml.contains("<dte:Descripcion>Cuaderno &lt;rayado"));
        assert!(xml.contains("<dte:MontoGravable>100.00</dte:MontoGravable><dte:MontoImpuesto>12.00</dte:MontoImpuesto>"));
        assert!(xml.contains(
            r#"<dte:TotalImpuesto NombreCorto="IVA" TotalMontoImpuesto="12.00"/></dte:TotalImpuestos><dte:GranTotal>112.00</dte:GranTotal>"#
        ));
        assert!(xml.trim_end().ends_with("</dte:GTDocumento>"));
    }

    #[test]
    fn recipient_address_is_optional() {
        let address = Address::guatemala("Calle 1", "01010", "Mixco", "Guatemala").expect("address");
        let recipient = Recipient::new(
            "12345679".into(),
            "Cliente".into(),
            Some("cliente@example.com".into()),
            Some(address),
        )
        .expect("recipient");
        let xml = invoice(recipient).to_xml().expect("xml");
        assert!(xml.contains(r#"<dte:Receptor CorreoReceptor="cliente@example.com" IDReceptor="12345679""#));
        assert!(xml.contains("<dte:DireccionReceptor><dte:Direccion>Calle 1</dte:Direccion>"));
    }

    #[test]
    fn body_is_addressable_and_well_formed() {
        let finalized = invoice(Recipient::final_consumer("CF").expect("recipient"));
        for xml in [
            finalized.to_xml().expect("compact"),
            finalized.to_xml_pretty().expect("pretty"),
        ] {
            let body = canonicalize_element_by_id(&xml, BODY_ID).expect("body");
            assert!(body.starts_with(
                r#"<dte:DatosEmision xmlns:ds="http://www.w3.org/2000/09/xmldsig#" xmlns:dte="http://www.sat.gob.gt/dte/fel/0.1.0" ID="DatosEmision">"#
            ));
            assert!(body.ends_with("</dte:DatosEmision>"));
        }
    }
}
