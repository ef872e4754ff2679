//! # mockd SOAP
//!
//! SOAP 1.1/1.2 mock handler. POST requests carry envelopes; the
//! operation is identified by the SOAPAction header (1.1), the `action`
//! parameter of the Content-Type (1.2), or the first child element of
//! the envelope Body. Optional XPath conditions gate each operation;
//! configured responses are rendered inside an envelope matching the
//! request's SOAP version, and WSDL is served on `GET ?wsdl`.

pub mod envelope;

pub use envelope::{
    eval_xpath, fault_envelope, parse_envelope, wrap_envelope, SoapVersion, SOAP11_NS, SOAP12_NS,
};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mockd_core::model::{MockSpec, SoapOperationSpec, SoapSpec};
use mockd_core::{
    MockCatalogue, Protocol, RequestFingerprint, RequestLog, RequestLogEntry, TemplateContext,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Shared state for the SOAP plane.
#[derive(Clone)]
pub struct SoapState {
    pub catalogue: Arc<MockCatalogue>,
    pub request_log: RequestLog,
}

impl SoapState {
    pub fn new(catalogue: Arc<MockCatalogue>, request_log: RequestLog) -> Self {
        Self { catalogue, request_log }
    }
}

/// Find the SOAP mock declared for a path.
pub fn find_soap_mock(state: &SoapState, path: &str) -> Option<(String, SoapSpec)> {
    let snapshot = state.catalogue.snapshot();
    for stored in snapshot.iter_protocol(Protocol::Soap) {
        if let MockSpec::Soap(spec) = &stored.mock.spec {
            if spec.path == path {
                return Some((stored.mock.id.clone(), spec.clone()));
            }
        }
    }
    None
}

/// Serve one request against a SOAP mock. `GET ?wsdl` (case-insensitive)
/// returns the WSDL; POST processes the envelope. Returns `None` when no
/// SOAP mock is declared for the path.
pub async fn handle_soap(state: &SoapState, fp: &RequestFingerprint) -> Option<Response> {
    let (mock_id, spec) = find_soap_mock(state, &fp.path)?;
    let started = Instant::now();

    let response = if fp.method == "GET" && wants_wsdl(fp) {
        (
            StatusCode::OK,
            [("content-type", "text/xml; charset=utf-8")],
            spec.wsdl.clone(),
        )
            .into_response()
    } else if fp.method == "POST" {
        process_envelope(&spec, fp)
    } else {
        StatusCode::METHOD_NOT_ALLOWED.into_response()
    };

    let status = response.status().as_u16();
    state
        .request_log
        .record(RequestLogEntry::new(
            Protocol::Soap,
            &fp.method,
            &fp.path,
            Some(mock_id),
            status,
            started.elapsed().as_millis() as u64,
        ))
        .await;
    Some(response)
}

fn wants_wsdl(fp: &RequestFingerprint) -> bool {
    fp.query.keys().any(|k| k.eq_ignore_ascii_case("wsdl"))
}

fn process_envelope(spec: &SoapSpec, fp: &RequestFingerprint) -> Response {
    let body = fp.body_text();
    let parsed = match parse_envelope(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("envelope rejected: {e}");
            // No version to honor; answer in 1.1 vocabulary.
            let fault = fault_envelope(SoapVersion::V11, "Client", &e.to_string(), None);
            return soap_response(StatusCode::INTERNAL_SERVER_ERROR, SoapVersion::V11, fault);
        }
    };

    let operation_name = resolve_operation(fp, &parsed.operation, parsed.version);
    let Some(operation) = lookup_operation(spec, &operation_name, &parsed) else {
        info!(operation = %operation_name, "unknown SOAP operation");
        let fault = fault_envelope(
            parsed.version,
            "Client",
            &format!("Unknown operation: {operation_name}"),
            None,
        );
        return soap_response(StatusCode::INTERNAL_SERVER_ERROR, parsed.version, fault);
    };

    if let Some(fault) = &operation.fault {
        let envelope = fault_envelope(
            parsed.version,
            &fault.code,
            &fault.message,
            fault.detail.as_deref(),
        );
        return soap_response(StatusCode::INTERNAL_SERVER_ERROR, parsed.version, envelope);
    }

    // Render the response with xpath: expressions resolved against the
    // request envelope.
    let ctx = TemplateContext::for_request(fp.clone());
    let raw = parsed.raw.clone();
    let hook = move |expr: &str| {
        expr.strip_prefix("xpath:")
            .map(|xp| eval_xpath(&raw, xp.trim()).unwrap_or_default())
    };
    let inner = mockd_core::expand_with_hook(&operation.response, &ctx, Some(&hook));
    let envelope = wrap_envelope(parsed.version, &inner);
    soap_response(StatusCode::OK, parsed.version, envelope)
}

/// SOAPAction header (1.1) → Content-Type `action` parameter (1.2) →
/// first Body child element.
fn resolve_operation(fp: &RequestFingerprint, body_child: &str, version: SoapVersion) -> String {
    if version == SoapVersion::V11 {
        if let Some(action) = fp.header("soapaction") {
            let action = action.trim_matches('"');
            if !action.is_empty() {
                return action.rsplit('/').next().unwrap_or(action).to_string();
            }
        }
    }
    if version == SoapVersion::V12 {
        if let Some(content_type) = fp.header("content-type") {
            for part in content_type.split(';') {
                if let Some(action) = part.trim().strip_prefix("action=") {
                    let action = action.trim_matches('"');
                    return action.rsplit('/').next().unwrap_or(action).to_string();
                }
            }
        }
    }
    body_child.to_string()
}

/// Operation lookup by configured name or SOAPAction binding, then XPath
/// condition check — any mismatch treats the operation as unknown.
fn lookup_operation<'a>(
    spec: &'a SoapSpec,
    name: &str,
    parsed: &envelope::ParsedEnvelope,
) -> Option<&'a SoapOperationSpec> {
    let operation = spec.operations.get(name).or_else(|| {
        spec.operations.values().find(|op| {
            op.soap_action
                .as_deref()
                .is_some_and(|a| a == name || a.rsplit('/').next() == Some(name))
        })
    })?;
    for (expr, expected) in &operation.xpath_match {
        if eval_xpath(&parsed.raw, expr).as_deref() != Some(expected.as_str()) {
            return None;
        }
    }
    Some(operation)
}

fn soap_response(status: StatusCode, version: SoapVersion, body: String) -> Response {
    (status, [("content-type", version.content_type())], body).into_response()
}
