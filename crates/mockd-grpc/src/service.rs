//! Dynamic gRPC dispatch
//!
//! One service instance per gRPC mock. Requests arrive over h2c as
//! `POST /{package.Service}/{Method}` with `application/grpc` framing;
//! dispatch follows the method's configured behavior — error status,
//! unary response, server-stream, client-stream collection, or bidi
//! pairing. Responses always carry `grpc-status` trailers.

use crate::codec::{decode_message, encode_message, frame, status_code, FrameDecoder};
use crate::proto::{parse_proto_file, ParsedProto, ProtoMethod};
use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request, Response};
use futures::StreamExt;
use http_body::Frame;
use http_body_util::{BodyExt, StreamBody};
use mockd_core::model::{GrpcMethodSpec, GrpcSpec};
use mockd_core::{Error, RequestFingerprint, Result, TemplateContext};
use prost_reflect::MessageDescriptor;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

/// Resolved method: descriptor-level shape plus input/output types.
struct ResolvedMethod {
    method: ProtoMethod,
    input: MessageDescriptor,
    output: MessageDescriptor,
    config: Option<GrpcMethodSpec>,
}

/// One mock's gRPC service.
pub struct GrpcMockService {
    spec: GrpcSpec,
    methods: HashMap<String, ResolvedMethod>,
}

impl GrpcMockService {
    /// Load the proto schema and index configured methods. Fails fast on
    /// a parse error or an unknown message reference.
    pub fn load(spec: GrpcSpec) -> Result<Arc<Self>> {
        let parsed: ParsedProto = parse_proto_file(&spec.proto_file)?;
        let mut methods = HashMap::new();
        for service in &parsed.services {
            for method in &service.methods {
                let key = format!("{}/{}", service.name, method.name);
                let input = message_descriptor(&parsed, &method.input_type)?;
                let output = message_descriptor(&parsed, &method.output_type)?;
                let config = lookup_config(&spec, &service.name, &method.name);
                methods.insert(
                    key,
                    ResolvedMethod { method: method.clone(), input, output, config },
                );
            }
        }
        info!(
            proto = %spec.proto_file,
            methods = methods.len(),
            "gRPC mock schema loaded"
        );
        Ok(Arc::new(Self { spec, methods }))
    }

    /// Handle one gRPC request.
    pub async fn handle(&self, request: Request<Body>) -> Response<Body> {
        let path = request.uri().path().to_string();
        debug!(%path, "grpc call");

        if path == "/grpc.health.v1.Health/Check" {
            return health_response(self.spec.health_status);
        }

        let Some(resolved) = self.methods.get(path.trim_start_matches('/')) else {
            return trailers_only(12, &format!("method {path} is not implemented"));
        };
        let Some(config) = resolved.config.clone() else {
            return trailers_only(12, &format!("method {path} is not configured"));
        };

        if let Some(error) = &config.error {
            return trailers_only(status_code(&error.code), &error.message);
        }

        match (resolved.method.client_streaming, resolved.method.server_streaming) {
            (false, false) => self.unary(resolved, &config, request, &path).await,
            (false, true) => self.server_stream(resolved, &config, request, &path).await,
            (true, false) => self.client_stream(resolved, &config, request, &path).await,
            (true, true) => self.bidi(resolved, &config, request, &path),
        }
    }

    async fn unary(
        &self,
        resolved: &ResolvedMethod,
        config: &GrpcMethodSpec,
        request: Request<Body>,
        path: &str,
    ) -> Response<Body> {
        let inbound = match read_messages(request, &resolved.input, 1).await {
            Ok(messages) => messages,
            Err(e) => return trailers_only(13, &e.to_string()),
        };
        let Some(template) = &config.response else {
            return trailers_only(12, "no unary response configured");
        };
        let ctx = message_context(path, inbound.first());
        match render_message(&resolved.output, template, &ctx) {
            Ok(bytes) => single_message_response(bytes),
            Err(e) => trailers_only(13, &e.to_string()),
        }
    }

    async fn client_stream(
        &self,
        resolved: &ResolvedMethod,
        config: &GrpcMethodSpec,
        request: Request<Body>,
        path: &str,
    ) -> Response<Body> {
        // Receive everything the client sends, then answer once.
        let inbound = match read_messages(request, &resolved.input, usize::MAX).await {
            Ok(messages) => messages,
            Err(e) => return trailers_only(13, &e.to_string()),
        };
        let Some(template) = &config.response else {
            return trailers_only(12, "no response configured");
        };
        let ctx = message_context(path, inbound.last());
        match render_message(&resolved.output, template, &ctx) {
            Ok(bytes) => single_message_response(bytes),
            Err(e) => trailers_only(13, &e.to_string()),
        }
    }

    async fn server_stream(
        &self,
        resolved: &ResolvedMethod,
        config: &GrpcMethodSpec,
        request: Request<Body>,
        path: &str,
    ) -> Response<Body> {
        let inbound = match read_messages(request, &resolved.input, 1).await {
            Ok(messages) => messages,
            Err(e) => return trailers_only(13, &e.to_string()),
        };
        let ctx = message_context(path, inbound.first());

        // Render up front so schema mismatches fail the call instead of
        // truncating the stream midway.
        let mut rendered = Vec::with_capacity(config.responses.len());
        for template in &config.responses {
            match render_message(&resolved.output, template, &ctx) {
                Ok(bytes) => rendered.push(bytes),
                Err(e) => return trailers_only(13, &e.to_string()),
            }
        }

        let delay = config.stream_delay_ms.map(Duration::from_millis);
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            for (i, bytes) in rendered.into_iter().enumerate() {
                if i > 0 {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                }
                if tx.send(Ok(Frame::data(frame(&bytes)))).is_err() {
                    return;
                }
            }
            let _ = tx.send(Ok(Frame::trailers(trailers(0, ""))));
        });
        stream_response(rx)
    }

    fn bidi(
        &self,
        resolved: &ResolvedMethod,
        config: &GrpcMethodSpec,
        request: Request<Body>,
        path: &str,
    ) -> Response<Body> {
        let input = resolved.input.clone();
        let output = resolved.output.clone();
        let responses = config.responses.clone();
        let cycle = config.cycle;
        let path = path.to_string();

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut decoder = FrameDecoder::default();
            let mut body = request.into_body().into_data_stream();
            let mut cursor = 0usize;

            // Pair each inbound message with the next outbound one,
            // cycling or terminating once the list is exhausted.
            'outer: while let Some(chunk) = body.next().await {
                let Ok(chunk) = chunk else { break };
                decoder.push(&chunk);
                loop {
                    let message = match decoder.next_frame() {
                        Ok(Some(message)) => message,
                        Ok(None) => break,
                        Err(e) => {
                            warn!("bidi stream decode failed: {e}");
                            break 'outer;
                        }
                    };
                    if responses.is_empty() || (!cycle && cursor >= responses.len()) {
                        break 'outer;
                    }
                    let template = &responses[cursor % responses.len()];
                    cursor += 1;
                    let json = decode_message(&input, &message).ok();
                    let ctx = message_context(&path, json.as_ref());
                    match render_message(&output, template, &ctx) {
                        Ok(bytes) => {
                            if tx.send(Ok(Frame::data(frame(&bytes)))).is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!("bidi response render failed: {e}");
                            break 'outer;
                        }
                    }
                }
            }
            let _ = tx.send(Ok(Frame::trailers(trailers(0, ""))));
        });
        stream_response(rx)
    }
}

fn lookup_config(spec: &GrpcSpec, service: &str, method: &str) -> Option<GrpcMethodSpec> {
    let short_service = service.rsplit('.').next().unwrap_or(service);
    spec.methods
        .get(&format!("{service}/{method}"))
        .or_else(|| spec.methods.get(&format!("{short_service}/{method}")))
        .or_else(|| spec.methods.get(method))
        .cloned()
}

fn message_descriptor(parsed: &ParsedProto, type_name: &str) -> Result<MessageDescriptor> {
    let name = type_name.trim_start_matches('.');
    parsed
        .pool
        .get_message_by_name(name)
        .ok_or_else(|| Error::validation(format!("unknown message type {name}")))
}

/// Template context for a decoded request message: the JSON body feeds
/// `request.body.*`, the call path feeds `request.path`.
fn message_context(path: &str, json: Option<&serde_json::Value>) -> TemplateContext {
    let body = json.map(|v| v.to_string().into_bytes()).unwrap_or_default();
    TemplateContext::for_request(RequestFingerprint::new(
        "POST",
        path,
        path,
        None,
        HashMap::new(),
        body,
    ))
}

fn render_message(
    output: &MessageDescriptor,
    template: &serde_json::Value,
    ctx: &TemplateContext,
) -> Result<Vec<u8>> {
    let expanded = mockd_core::expand_json(template, ctx);
    encode_message(output, &expanded)
}

/// Read up to `limit` inbound messages (decoded to JSON).
async fn read_messages(
    request: Request<Body>,
    input: &MessageDescriptor,
    limit: usize,
) -> Result<Vec<serde_json::Value>> {
    let bytes = request
        .into_body()
        .collect()
        .await
        .map_err(|e| Error::protocol(format!("request body error: {e}")))?
        .to_bytes();
    let mut decoder = FrameDecoder::default();
    decoder.push(&bytes);
    let mut messages = Vec::new();
    while messages.len() < limit {
        match decoder.next_frame()? {
            Some(message) => messages.push(decode_message(input, &message)?),
            None => break,
        }
    }
    Ok(messages)
}

fn trailers(status: i32, message: &str) -> HeaderMap {
    let mut map = HeaderMap::new();
    map.insert("grpc-status", HeaderValue::from_str(&status.to_string()).unwrap_or(HeaderValue::from_static("2")));
    if !message.is_empty() {
        if let Ok(value) = HeaderValue::from_str(message) {
            map.insert("grpc-message", value);
        }
    }
    map
}

type FrameResult = std::result::Result<Frame<bytes::Bytes>, axum::Error>;

fn stream_response(rx: tokio::sync::mpsc::UnboundedReceiver<FrameResult>) -> Response<Body> {
    let body = Body::new(StreamBody::new(UnboundedReceiverStream::new(rx)));
    grpc_http_response(body)
}

fn single_message_response(message: Vec<u8>) -> Response<Body> {
    let frames = vec![
        Ok::<_, axum::Error>(Frame::data(frame(&message))),
        Ok(Frame::trailers(trailers(0, ""))),
    ];
    let body = Body::new(StreamBody::new(futures::stream::iter(frames)));
    grpc_http_response(body)
}

fn trailers_only(status: i32, message: &str) -> Response<Body> {
    let frames = vec![Ok::<_, axum::Error>(Frame::trailers(trailers(status, message)))];
    let body = Body::new(StreamBody::new(futures::stream::iter(frames)));
    grpc_http_response(body)
}

/// Health/Check answer: a `HealthCheckResponse` with the status enum in
/// field 1, hand-encoded (the health proto is fixed by contract).
fn health_response(status: i32) -> Response<Body> {
    let message = if status == 0 {
        Vec::new()
    } else {
        vec![0x08, status as u8]
    };
    single_message_response(message)
}

fn grpc_http_response(body: Body) -> Response<Body> {
    Response::builder()
        .status(200)
        .header("content-type", "application/grpc")
        .body(body)
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
