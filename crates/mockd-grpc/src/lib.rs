//! # mockd gRPC
//!
//! Dynamic gRPC mock servers. Each gRPC mock declares a port and a
//! .proto file; the schema is parsed at mock start ([`proto`]) into a
//! `prost-reflect` descriptor pool, and a per-mock server answers calls
//! with configured responses encoded as dynamic messages ([`service`]).
//! Unary, server-streaming, client-streaming and bidirectional methods
//! are supported, plus the reserved `grpc.health.v1.Health/Check`
//! method; everything else returns UNIMPLEMENTED.

pub mod codec;
pub mod proto;
pub mod service;

pub use codec::{decode_message, encode_message, status_code, FrameDecoder};
pub use proto::{parse_proto, parse_proto_file, ParsedProto, ProtoMethod, ProtoService};
pub use service::GrpcMockService;

use axum::extract::State;
use axum::Router;
use mockd_core::model::GrpcSpec;
use mockd_core::{Error, Result, ShutdownToken};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// A running per-mock gRPC server.
pub struct GrpcServer {
    local_addr: SocketAddr,
    task: tokio::task::JoinHandle<()>,
}

impl GrpcServer {
    /// Load the schema and start serving on the mock's port (h2c).
    /// Fails fast on proto parse errors and unavailable ports.
    pub async fn start(spec: GrpcSpec, shutdown: ShutdownToken) -> Result<Self> {
        let port = spec.port;
        let service = GrpcMockService::load(spec)?;
        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port)))
            .await
            .map_err(|e| Error::bind(format!("gRPC port {port}: {e}")))?;
        let local_addr = listener.local_addr()?;
        info!("gRPC mock server listening on {local_addr}");

        let router = Router::new()
            .fallback(handle)
            .with_state(service);
        let mut shutdown = shutdown;
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = serve.await {
                tracing::warn!("gRPC server error: {e}");
            }
        });
        Ok(Self { local_addr, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

async fn handle(
    State(service): State<Arc<GrpcMockService>>,
    request: axum::http::Request<axum::body::Body>,
) -> axum::http::Response<axum::body::Body> {
    service.handle(request).await
}
