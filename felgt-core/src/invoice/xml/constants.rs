pub(crate) const DTE_NS: &str = "http://www.sat.gob.gt/dte/fel/0.1.0";
pub(crate) const DS_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub(crate) const XADES_NS: &str = "http://uri.etsi.org/01903/v1.3.2#";
pub(crate) const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

pub(crate) const DTE_VERSION: &str = "0.4";
pub(crate) const DOCUMENT_CLASS: &str = "dte";
pub(crate) const INVOICE_TYPE: &str = "FACT";
pub(crate) const IVA_SHORT_NAME: &str = "IVA";

pub(crate) const CERTIFIED_DATA_ID: &str = "DatosCertificados";
/// Fixed id of the element covered by the body reference.
pub const BODY_ID: &str = "DatosEmision";

pub(crate) const C14N_ALGORITHM: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub(crate) const RSA_SHA256_ALGORITHM: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub(crate) const SHA256_ALGORITHM: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub(crate) const SHA1_ALGORITHM: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub(crate) const SIGNED_PROPERTIES_TYPE: &str = "http://uri.etsi.org/01903#SignedProperties";
