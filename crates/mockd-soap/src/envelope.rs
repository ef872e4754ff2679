//! SOAP envelope parsing
//!
//! Understands SOAP 1.1 (`http://schemas.xmlsoap.org/soap/envelope/`)
//! and 1.2 (`http://www.w3.org/2003/05/soap-envelope`) envelopes via
//! roxmltree, plus a child-axis XPath subset for match conditions.

use mockd_core::{Error, Result};

pub const SOAP11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";

/// Envelope version, decided by the Envelope element's namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoapVersion {
    V11,
    V12,
}

impl SoapVersion {
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::V11 => SOAP11_NS,
            Self::V12 => SOAP12_NS,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::V11 => "text/xml; charset=utf-8",
            Self::V12 => "application/soap+xml; charset=utf-8",
        }
    }

    /// Fault code mapping: 1.1 Client/Server become 1.2 Sender/Receiver.
    pub fn fault_code(&self, declared: &str) -> String {
        match (self, declared) {
            (Self::V11, "Sender") => "Client".to_string(),
            (Self::V11, "Receiver") => "Server".to_string(),
            (Self::V12, "Client") => "Sender".to_string(),
            (Self::V12, "Server") => "Receiver".to_string(),
            _ => declared.to_string(),
        }
    }
}

/// Parsed view of one request envelope.
#[derive(Debug, Clone)]
pub struct ParsedEnvelope {
    pub version: SoapVersion,
    /// Local name of the first child element of Body.
    pub operation: String,
    /// Raw XML of the whole request, re-parsed for XPath evaluation.
    pub raw: String,
}

/// Parse and validate an envelope. `ProtocolViolation` on invalid XML or
/// a missing Envelope/Body.
pub fn parse_envelope(raw: &str) -> Result<ParsedEnvelope> {
    let doc = roxmltree::Document::parse(raw)
        .map_err(|e| Error::protocol(format!("invalid XML: {e}")))?;
    let root = doc.root_element();
    if root.tag_name().name() != "Envelope" {
        return Err(Error::protocol("missing SOAP Envelope"));
    }
    let version = match root.tag_name().namespace() {
        Some(SOAP11_NS) => SoapVersion::V11,
        Some(SOAP12_NS) => SoapVersion::V12,
        other => {
            return Err(Error::protocol(format!(
                "unknown envelope namespace {other:?}"
            )));
        }
    };
    let body = root
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == "Body")
        .ok_or_else(|| Error::protocol("missing SOAP Body"))?;
    let operation = body
        .children()
        .find(|n| n.is_element())
        .map(|n| n.tag_name().name().to_string())
        .unwrap_or_default();

    Ok(ParsedEnvelope { version, operation, raw: raw.to_string() })
}

/// Evaluate a child-axis XPath subset against the envelope: `//Name`
/// finds the first element with that local name anywhere; `/a/b/c`
/// descends from the document root by local names. Returns the element's
/// text content.
pub fn eval_xpath(raw: &str, expr: &str) -> Option<String> {
    let doc = roxmltree::Document::parse(raw).ok()?;
    if let Some(name) = expr.strip_prefix("//") {
        let node = doc
            .descendants()
            .find(|n| n.is_element() && n.tag_name().name() == name)?;
        return Some(collect_text(node));
    }
    let mut current = doc.root();
    for segment in expr.split('/').filter(|s| !s.is_empty()) {
        current = current
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == segment)?;
    }
    Some(collect_text(current))
}

fn collect_text(node: roxmltree::Node) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .map(|n| n.text().unwrap_or(""))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Wrap rendered body XML in an envelope of the right version.
pub fn wrap_envelope(version: SoapVersion, inner: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
<soap:Envelope xmlns:soap=\"{}\"><soap:Body>{}</soap:Body></soap:Envelope>",
        version.namespace(),
        inner
    )
}

/// Build a fault envelope. The declared code ("Client"/"Server") is
/// mapped to the envelope version's vocabulary.
pub fn fault_envelope(
    version: SoapVersion,
    code: &str,
    message: &str,
    detail: Option<&str>,
) -> String {
    let code = version.fault_code(code);
    let inner = match version {
        SoapVersion::V11 => format!(
            "<soap:Fault><faultcode>soap:{code}</faultcode>\
<faultstring>{}</faultstring>{}</soap:Fault>",
            escape_xml(message),
            detail
                .map(|d| format!("<detail>{}</detail>", escape_xml(d)))
                .unwrap_or_default(),
        ),
        SoapVersion::V12 => format!(
            "<soap:Fault><soap:Code><soap:Value>soap:{code}</soap:Value></soap:Code>\
<soap:Reason><soap:Text xml:lang=\"en\">{}</soap:Text></soap:Reason>{}</soap:Fault>",
            escape_xml(message),
            detail
                .map(|d| format!("<soap:Detail>{}</soap:Detail>", escape_xml(d)))
                .unwrap_or_default(),
        ),
    };
    wrap_envelope(version, &inner)
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
