//! Inclusive Canonical XML 1.0 (comments omitted) for a single element and its subtree.
//!
//! Two entry points:
//! - [`canonicalize`] takes a pre-rendered fragment plus the namespace/`xml:*` context it will
//!   inherit once spliced into a document, and produces the bytes a verifier will compute for it
//!   in place.
//! - [`canonicalize_element_by_id`] locates the element whose `Id`/`ID` attribute matches and
//!   canonicalizes it with the context its ancestors provide.
//!
//! # Examples
//! ```rust
//! use felgt_core::invoice::sign::c14n::{C14nContext, canonicalize};
//!
//! let context = C14nContext::new().with_namespace("ds", "http://www.w3.org/2000/09/xmldsig#");
//! let canonical = canonicalize(r#"<ds:KeyInfo Id="k"><ds:X509Data/></ds:KeyInfo>"#, &context)?;
//! assert_eq!(
//!     canonical,
//!     r#"<ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#" Id="k"><ds:X509Data></ds:X509Data></ds:KeyInfo>"#
//! );
//! # Ok::<(), felgt_core::invoice::sign::c14n::C14nError>(())
//! ```
use crate::invoice::xml::constants::XML_NS;
use log::trace;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::collections::BTreeMap;
use std::fmt::Display;
use thiserror::Error;

/// Canonicalization failure.
#[derive(Debug, Error)]
pub enum C14nError {
    #[error("malformed XML near byte {position}: {message}")]
    Malformed { position: usize, message: String },
    #[error("input does not contain an element")]
    NoElement,
    #[error("no element carries Id \"{id}\"")]
    IdNotFound { id: String },
    #[error("Id \"{id}\" appears on more than one element")]
    DuplicateId { id: String },
    #[error("prefix '{prefix}' is not bound to a namespace")]
    UnboundPrefix { prefix: String },
    #[error("no {name} element found")]
    ElementNotFound { name: String },
    #[error("more than one {name} element found")]
    DuplicateElement { name: String },
}

/// Namespace declarations and `xml:*` attributes in scope at an element's position.
///
/// The default namespace is keyed by the empty prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct C14nContext {
    namespaces: BTreeMap<String, String>,
    xml_attributes: BTreeMap<String, String>,
}

impl C14nContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a declaration. An empty `uri` for the default prefix undeclares it.
    pub fn with_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.declare(prefix.into(), uri.into());
        self
    }

    /// Adds an inherited `xml:*` attribute, keyed by its local name (`lang`, `space`, ...).
    pub fn with_xml_attribute(mut self, local_name: impl Into<String>, value: impl Into<String>) -> Self {
        self.xml_attributes.insert(local_name.into(), value.into());
        self
    }

    pub fn namespace(&self, prefix: &str) -> Option<&str> {
        self.namespaces.get(prefix).map(String::as_str)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = (&str, &str)> {
        self.namespaces.iter().map(|(p, u)| (p.as_str(), u.as_str()))
    }

    pub fn xml_attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.xml_attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Context in force inside the document's root element: its declarations and `xml:*`
    /// attributes. Content appended as a child of the root inherits exactly this.
    pub fn for_document_root(document: &str) -> Result<Self, C14nError> {
        let mut reader = new_reader(document);
        loop {
            let position = reader_position(&reader);
            match reader.read_event().map_err(|e| malformed(position, e))? {
                Event::Start(e) | Event::Empty(e) => {
                    let element = OpenElement::parse(&e, &C14nContext::default(), position)?;
                    return Ok(element.scope);
                }
                Event::Eof => return Err(C14nError::NoElement),
                _ => {}
            }
        }
    }

    /// Context an element inherits from its ancestors (its own declarations excluded).
    pub fn context_of(document: &str, id: &str) -> Result<Self, C14nError> {
        walk(document, C14nContext::default(), Target::Id(id)).map(|found| found.context)
    }

    fn declare(&mut self, prefix: String, uri: String) {
        if prefix.is_empty() && uri.is_empty() {
            self.namespaces.remove("");
        } else {
            self.namespaces.insert(prefix, uri);
        }
    }

    fn resolve(&self, prefix: &str) -> Result<&str, C14nError> {
        if prefix == "xml" {
            return Ok(XML_NS);
        }
        self.namespace(prefix).ok_or_else(|| C14nError::UnboundPrefix {
            prefix: prefix.to_string(),
        })
    }
}

/// Canonicalizes the first element of `fragment` as it would appear in a document where
/// `context` is in scope.
pub fn canonicalize(fragment: &str, context: &C14nContext) -> Result<String, C14nError> {
    let found = walk(fragment, context.clone(), Target::First)?;
    trace!("canonical fragment: {}", found.canonical);
    Ok(found.canonical)
}

/// Canonicalizes the unique element carrying `Id`/`ID`/`id` equal to `id`.
pub fn canonicalize_element_by_id(document: &str, id: &str) -> Result<String, C14nError> {
    let found = walk(document, C14nContext::default(), Target::Id(id))?;
    trace!("canonical #{id}: {}", found.canonical);
    Ok(found.canonical)
}

/// Canonicalizes the unique element named `local` in `namespace`, in place.
pub fn canonicalize_element_by_name(document: &str, namespace: &str, local: &str) -> Result<String, C14nError> {
    let found = walk(document, C14nContext::default(), Target::Name { namespace, local })?;
    trace!("canonical {local}: {}", found.canonical);
    Ok(found.canonical)
}

/// Attribute names that identify an element for same-document references.
pub(crate) const ID_ATTRIBUTES: [&str; 3] = ["Id", "ID", "id"];

#[derive(Clone, Copy)]
enum Target<'a> {
    First,
    Id(&'a str),
    Name { namespace: &'a str, local: &'a str },
}

struct Found {
    canonical: String,
    context: C14nContext,
}

struct Capture {
    out: String,
    apex_depth: usize,
    context: C14nContext,
}

struct Attr {
    qname: String,
    namespace: String,
    local: String,
    value: String,
}

struct OpenElement {
    qname: String,
    scope: C14nContext,
    attributes: Vec<Attr>,
    ids: Vec<String>,
}

impl OpenElement {
    fn parse(e: &BytesStart<'_>, parent: &C14nContext, position: usize) -> Result<Self, C14nError> {
        let qname = utf8(e.name().as_ref(), position)?.to_string();
        let mut scope = parent.clone();
        let mut pending = Vec::new();
        let mut ids = Vec::new();

        for attr in e.attributes() {
            let attr = attr.map_err(|err| malformed(position, err))?;
            let key = utf8(attr.key.as_ref(), position)?;
            let value = attribute_value(utf8(&attr.value, position)?, position)?;

            if key == "xmlns" {
                scope.declare(String::new(), value);
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                scope.declare(prefix.to_string(), value);
            } else {
                if ID_ATTRIBUTES.contains(&key) {
                    ids.push(value.clone());
                }
                pending.push((key.to_string(), value));
            }
        }

        let (prefix, _) = split_qname(&qname);
        if let Some(prefix) = prefix {
            scope.resolve(prefix)?;
        }

        let mut attributes = Vec::with_capacity(pending.len());
        for (key, value) in pending {
            let (prefix, local) = split_qname(&key);
            let namespace = match prefix {
                Some(prefix) => scope.resolve(prefix)?.to_string(),
                None => String::new(),
            };
            if prefix == Some("xml") {
                scope.xml_attributes.insert(local.to_string(), value.clone());
            }
            attributes.push(Attr {
                local: local.to_string(),
                qname: key,
                namespace,
                value,
            });
        }

        Ok(Self {
            qname,
            scope,
            attributes,
            ids,
        })
    }

    fn has_id(&self, id: &str) -> bool {
        self.ids.iter().any(|value| value == id)
    }

    fn has_name(&self, namespace: &str, local: &str) -> bool {
        let (prefix, name) = split_qname(&self.qname);
        let uri = match prefix {
            Some(prefix) => self.scope.namespace(prefix),
            None => self.scope.namespace(""),
        };
        name == local && uri.unwrap_or("") == namespace
    }

    /// Writes the canonical start tag. `parent` is the scope of the nearest rendered ancestor,
    /// `None` for the apex of the output.
    fn render(mut self, out: &mut String, parent: Option<&C14nContext>) {
        out.push('<');
        out.push_str(&self.qname);

        let empty = BTreeMap::new();
        let rendered = parent.map(|p| &p.namespaces).unwrap_or(&empty);
        if !self.scope.namespaces.contains_key("") && rendered.get("").is_some_and(|u| !u.is_empty()) {
            out.push_str(" xmlns=\"\"");
        }
        for (prefix, uri) in &self.scope.namespaces {
            if prefix == "xml" || rendered.get(prefix) == Some(uri) {
                continue;
            }
            if prefix.is_empty() {
                out.push_str(" xmlns=\"");
            } else {
                out.push_str(" xmlns:");
                out.push_str(prefix);
                out.push_str("=\"");
            }
            escape_attr_into(out, uri);
            out.push('"');
        }

        if parent.is_none() {
            // The apex carries xml:* attributes inherited from ancestors outside the output.
            let inherited = self.inherited_xml_attributes();
            self.attributes.extend(inherited);
        }

        self.attributes
            .sort_by(|a, b| (a.namespace.as_str(), a.local.as_str()).cmp(&(b.namespace.as_str(), b.local.as_str())));
        for attr in &self.attributes {
            out.push(' ');
            out.push_str(&attr.qname);
            out.push_str("=\"");
            escape_attr_into(out, &attr.value);
            out.push('"');
        }
        out.push('>');
    }

    fn inherited_xml_attributes(&self) -> Vec<Attr> {
        self.scope
            .xml_attributes
            .iter()
            .filter(|(local, _)| {
                !self
                    .attributes
                    .iter()
                    .any(|a| a.namespace == XML_NS && &a.local == *local)
            })
            .map(|(local, value)| Attr {
                qname: format!("xml:{local}"),
                namespace: XML_NS.to_string(),
                local: local.clone(),
                value: value.clone(),
            })
            .collect()
    }
}

fn walk(document: &str, base: C14nContext, target: Target<'_>) -> Result<Found, C14nError> {
    let mut reader = new_reader(document);
    let mut stack: Vec<C14nContext> = vec![base];
    let mut capture: Option<Capture> = None;
    let mut found: Option<Found> = None;

    loop {
        let position = reader_position(&reader);
        match reader.read_event().map_err(|e| malformed(position, e))? {
            Event::Start(e) => {
                open(&e, &mut stack, &mut capture, &found, target, position)?;
            }
            Event::Empty(e) => {
                open(&e, &mut stack, &mut capture, &found, target, position)?;
                let qname = utf8(e.name().as_ref(), position)?.to_string();
                if close(&qname, &mut stack, &mut capture, &mut found) && matches!(target, Target::First) {
                    break;
                }
            }
            Event::End(e) => {
                let qname = utf8(e.name().as_ref(), position)?.to_string();
                if close(&qname, &mut stack, &mut capture, &mut found) && matches!(target, Target::First) {
                    break;
                }
            }
            Event::Text(e) => {
                if let Some(capture) = capture.as_mut() {
                    let raw = normalize_line_endings(utf8(&e, position)?);
                    let text = unescape(&raw).map_err(|err| malformed(position, err))?;
                    escape_text_into(&mut capture.out, &text);
                }
            }
            Event::CData(e) => {
                if let Some(capture) = capture.as_mut() {
                    let text = normalize_line_endings(utf8(&e, position)?);
                    escape_text_into(&mut capture.out, &text);
                }
            }
            Event::PI(e) => {
                if let Some(capture) = capture.as_mut() {
                    let raw = normalize_line_endings(utf8(&e, position)?);
                    let (pi_target, data) = match raw.find(char::is_whitespace) {
                        Some(split) => (&raw[..split], raw[split..].trim_start()),
                        None => (raw.as_str(), ""),
                    };
                    capture.out.push_str("<?");
                    capture.out.push_str(pi_target);
                    if !data.is_empty() {
                        capture.out.push(' ');
                        capture.out.push_str(data);
                    }
                    capture.out.push_str("?>");
                }
            }
            Event::Eof => {
                if capture.is_some() {
                    return Err(C14nError::Malformed {
                        position,
                        message: "input ended inside the selected element".into(),
                    });
                }
                break;
            }
            Event::Comment(_) | Event::Decl(_) | Event::DocType(_) => {}
        }
    }

    found.ok_or_else(|| match target {
        Target::First => C14nError::NoElement,
        Target::Id(id) => C14nError::IdNotFound { id: id.to_string() },
        Target::Name { local, .. } => C14nError::ElementNotFound {
            name: local.to_string(),
        },
    })
}

fn open(
    e: &BytesStart<'_>,
    stack: &mut Vec<C14nContext>,
    capture: &mut Option<Capture>,
    found: &Option<Found>,
    target: Target<'_>,
    position: usize,
) -> Result<(), C14nError> {
    let Some(parent) = stack.last() else {
        return Err(C14nError::Malformed {
            position,
            message: "unbalanced element nesting".into(),
        });
    };
    let element = OpenElement::parse(e, parent, position)?;
    let matches_target = match target {
        Target::First => found.is_none(),
        Target::Id(id) => element.has_id(id),
        Target::Name { namespace, local } => element.has_name(namespace, local),
    };

    if matches_target && (found.is_some() || capture.is_some()) {
        match target {
            Target::First => {}
            Target::Id(id) => return Err(C14nError::DuplicateId { id: id.to_string() }),
            Target::Name { local, .. } => {
                return Err(C14nError::DuplicateElement {
                    name: local.to_string(),
                });
            }
        }
    }

    let scope = element.scope.clone();
    match capture.as_mut() {
        Some(capture) => element.render(&mut capture.out, Some(parent)),
        None if matches_target => {
            let mut out = String::new();
            let context = parent.clone();
            element.render(&mut out, None);
            *capture = Some(Capture {
                out,
                apex_depth: stack.len(),
                context,
            });
        }
        None => {}
    }
    stack.push(scope);
    Ok(())
}

/// Returns true when this end tag completes the captured element.
fn close(qname: &str, stack: &mut Vec<C14nContext>, capture: &mut Option<Capture>, found: &mut Option<Found>) -> bool {
    stack.pop();
    let Some(active) = capture.as_mut() else {
        return false;
    };
    active.out.push_str("</");
    active.out.push_str(qname);
    active.out.push('>');
    if stack.len() != active.apex_depth {
        return false;
    }
    if let Some(done) = capture.take() {
        *found = Some(Found {
            canonical: done.out,
            context: done.context,
        });
    }
    true
}

fn new_reader(input: &str) -> Reader<&[u8]> {
    let mut reader = Reader::from_str(input);
    let config = reader.config_mut();
    config.trim_text(false);
    config.check_end_names = true;
    reader
}

fn reader_position<R>(reader: &Reader<R>) -> usize {
    usize::try_from(reader.buffer_position()).unwrap_or(usize::MAX)
}

fn malformed(position: usize, err: impl Display) -> C14nError {
    C14nError::Malformed {
        position,
        message: err.to_string(),
    }
}

fn utf8(bytes: &[u8], position: usize) -> Result<&str, C14nError> {
    std::str::from_utf8(bytes).map_err(|err| malformed(position, err))
}

fn split_qname(qname: &str) -> (Option<&str>, &str) {
    match qname.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, qname),
    }
}

pub(crate) fn normalize_line_endings(raw: &str) -> String {
    raw.replace("\r\n", "\n").replace('\r', "\n")
}

/// Attribute-value normalization for CDATA attributes followed by reference expansion.
fn attribute_value(raw: &str, position: usize) -> Result<String, C14nError> {
    let normalized = normalize_line_endings(raw).replace(['\t', '\n'], " ");
    unescape(&normalized)
        .map(|v| v.into_owned())
        .map_err(|err| malformed(position, err))
}

fn escape_text_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr_into(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}
