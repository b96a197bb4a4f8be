//! HTTP adapters: route registration for inbound ingestion and POST
//! delivery outbound.
//!
//! Grounded on the teacher's `server.rs` (`axum::Router`, graceful shutdown
//! via `CancellationToken`) for the inbound listener shape, and on
//! [`crate::adapter::mllp::reply_code`] for the non-2xx reply-code
//! evaluation outbound uses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Router, body::Bytes};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::adapter::{AdapterError, OutboundAdapter, OutboundOutcome};
use crate::domain::{Direction, HeaderStatus, MessageEnvelope, MessageHeader};
use crate::host::Host;
use crate::trace_store::{TraceStore, TraceWriter};

const CONTENT_TYPE: &str = "application/octet-stream";

/// Static configuration an [`HttpInboundAdapter`] binds with.
#[derive(Debug, Clone)]
pub struct HttpInboundConfig {
    /// Port to bind.
    pub port: u16,
    /// Path prefix to register the route under.
    pub path: String,
}

struct SharedState {
    target: Arc<Host>,
    trace_store: Arc<dyn TraceStore>,
    trace_writer: Arc<TraceWriter>,
    project_id: String,
    item_name: String,
}

/// Registers a dedicated HTTP server for one service item: each request to
/// `config.path` becomes one envelope, `201` after enqueue is the "ACK".
pub struct HttpInboundAdapter {
    config: HttpInboundConfig,
    state: Arc<SharedState>,
}

impl HttpInboundAdapter {
    /// Builds an adapter bound to `target`'s queue.
    #[must_use]
    pub fn new(
        config: HttpInboundConfig,
        target: Arc<Host>,
        trace_store: Arc<dyn TraceStore>,
        trace_writer: Arc<TraceWriter>,
        project_id: impl Into<String>,
        item_name: impl Into<String>,
    ) -> Self {
        Self {
            config,
            state: Arc::new(SharedState {
                target,
                trace_store,
                trace_writer,
                project_id: project_id.into(),
                item_name: item_name.into(),
            }),
        }
    }

    /// Binds the listener and serves until `cancel` fires.
    ///
    /// Signals `ready` with the bind outcome before serving, so the caller
    /// can surface a bind failure synchronously instead of only discovering
    /// it in a background task's logs.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::StartFailed`] if the port cannot be bound.
    #[instrument(skip(self, cancel, ready), fields(item_name = %self.state.item_name, port = self.config.port))]
    pub async fn serve(
        self: Arc<Self>,
        cancel: CancellationToken,
        ready: tokio::sync::oneshot::Sender<Result<(), AdapterError>>,
    ) -> Result<(), AdapterError> {
        let addr = format!("0.0.0.0:{}", self.config.port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(err) => {
                let message = err.to_string();
                let _ = ready.send(Err(AdapterError::StartFailed(message.clone())));
                return Err(AdapterError::StartFailed(message));
            }
        };
        let _ = ready.send(Ok(()));
        let app = Router::new()
            .route(&self.config.path, post(ingest))
            .with_state(Arc::clone(&self.state));
        info!(%addr, path = %self.config.path, "http inbound listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|err| AdapterError::Fatal(err.to_string()))
    }
}

async fn ingest(State(state): State<Arc<SharedState>>, body: Bytes) -> StatusCode {
    if body.is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    let raw_payload = body.to_vec();

    let body_id = match state.trace_store.store_body(&raw_payload, CONTENT_TYPE, "1.0").await {
        Ok(id) => id,
        Err(err) => {
            error!(error = %err, "failed to persist inbound http body");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };
    let mut header = MessageHeader::new_pending(
        &state.project_id,
        &state.item_name,
        "service",
        Direction::Inbound,
        None,
        body_id,
        "Raw",
    );
    header.destination_item = Some(state.item_name.clone());
    let header_id = header.header_id;
    state.trace_writer.record_header(header);

    let mut envelope = MessageEnvelope::new_inbound(CONTENT_TYPE, "1.0", raw_payload);
    envelope.destination_host = Some(state.item_name.clone());
    match state.target.submit(envelope).await {
        Ok(()) => {
            state
                .trace_writer
                .finish_header(header_id, HeaderStatus::Completed, None, None);
            StatusCode::CREATED
        }
        Err(err) => {
            state
                .trace_writer
                .finish_header(header_id, HeaderStatus::Error, Some(err.to_string()), None);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Static configuration an [`HttpOutboundAdapter`] delivers with.
#[derive(Debug, Clone)]
pub struct HttpOutboundConfig {
    /// Destination URL.
    pub url: String,
    /// HTTP method to use.
    pub method: String,
    /// Content-Type header to send.
    pub content_type: String,
    /// Time allowed for the whole request/response round trip.
    pub timeout: Duration,
}

/// POSTs (or otherwise sends) `raw_payload` to a configured URL.
///
/// Status evaluation mirrors MLLP's reply-code-action table in spirit: 2xx
/// is success, `408`/`429`/5xx are transient and retried by the caller's
/// outbound send loop, any other non-2xx is fatal. There is no configurable
/// per-code table in the authoritative HTTP option set, unlike MLLP's
/// `ReplyCodeActions`, so this mapping is fixed.
pub struct HttpOutboundAdapter {
    config: HttpOutboundConfig,
    client: reqwest::Client,
}

impl HttpOutboundAdapter {
    /// Builds an adapter with a dedicated `reqwest` client honoring `config.timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::StartFailed`] if the client cannot be built.
    pub fn new(config: HttpOutboundConfig) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| AdapterError::StartFailed(err.to_string()))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl OutboundAdapter for HttpOutboundAdapter {
    #[instrument(skip(self, envelope), fields(message_id = %envelope.message_id, url = %self.config.url))]
    async fn send(&self, envelope: &MessageEnvelope) -> Result<OutboundOutcome, AdapterError> {
        let method = reqwest::Method::from_bytes(self.config.method.as_bytes())
            .map_err(|err| AdapterError::Fatal(format!("invalid http method: {err}")))?;
        let response = self
            .client
            .request(method, &self.config.url)
            .header(reqwest::header::CONTENT_TYPE, &self.config.content_type)
            .body(envelope.raw_payload.clone())
            .send()
            .await
            .map_err(|err| AdapterError::Transient(format!("http send failed: {err}")))?;

        let status = response.status();
        let ack_payload = response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .unwrap_or_default();

        if status.is_success() {
            return Ok(OutboundOutcome::success_with_ack(ack_payload));
        }
        if status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error() {
            warn!(%status, "http outbound transient failure");
            return Err(AdapterError::Transient(format!("remote returned {status}")));
        }
        Err(AdapterError::RemoteNak(format!("remote returned {status}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_outbound_config_method_parses() {
        let method = reqwest::Method::from_bytes(b"POST").unwrap();
        assert_eq!(method, reqwest::Method::POST);
    }
}
