//! MLLP inbound adapter: accepts TCP connections, frames HL7 messages off
//! the wire, ACKs synchronously, and submits each envelope to a host queue.
//!
//! Grounded on the teacher's `server.rs` graceful-shutdown pattern
//! (`tokio_util::sync::CancellationToken` raced against the accept loop via
//! `tokio::select!`) for the listener's own lifecycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::adapter::mllp::ack::{self, ValidationOutcome};
use crate::adapter::mllp::framing::{self, Framer};
use crate::adapter::AdapterError;
use crate::domain::{AckMode, Direction, HeaderStatus, MessageEnvelope, MessageHeader};
use crate::hl7;
use crate::host::Host;
use crate::trace_store::TraceStore;
use crate::trace_store::TraceWriter;

const HL7_CONTENT_TYPE: &str = "application/hl7-v2+er7";

/// Static configuration an [`MllpInboundAdapter`] binds with.
#[derive(Debug, Clone)]
pub struct MllpInboundConfig {
    /// Address to bind, e.g. `0.0.0.0`.
    pub bind_host: String,
    /// TCP port to listen on.
    pub port: u16,
    /// Maximum concurrent peer connections.
    pub max_connections: usize,
    /// How long a read may stay idle before the connection is dropped.
    pub read_timeout: Duration,
    /// When to emit an ACK and what `MSA-1` to claim.
    pub ack_mode: AckMode,
}

/// TCP listener framing HL7/MLLP off the wire and handing envelopes to the
/// owning item's [`Host`].
pub struct MllpInboundAdapter {
    config: MllpInboundConfig,
    target: Arc<Host>,
    bad_message_handler: Option<Arc<Host>>,
    trace_store: Arc<dyn TraceStore>,
    trace_writer: Arc<TraceWriter>,
    project_id: String,
    item_name: String,
    connections_dropped: AtomicU64,
}

impl MllpInboundAdapter {
    /// Builds an adapter bound to `target`'s queue, with an optional
    /// secondary host to forward structurally malformed messages to.
    #[must_use]
    pub fn new(
        config: MllpInboundConfig,
        target: Arc<Host>,
        bad_message_handler: Option<Arc<Host>>,
        trace_store: Arc<dyn TraceStore>,
        trace_writer: Arc<TraceWriter>,
        project_id: impl Into<String>,
        item_name: impl Into<String>,
    ) -> Self {
        Self {
            config,
            target,
            bad_message_handler,
            trace_store,
            trace_writer,
            project_id: project_id.into(),
            item_name: item_name.into(),
            connections_dropped: AtomicU64::new(0),
        }
    }

    /// Number of connections refused because `max_connections` was reached.
    #[must_use]
    pub fn connections_dropped(&self) -> u64 {
        self.connections_dropped.load(Ordering::Relaxed)
    }

    /// Binds the listener and accepts connections until `cancel` fires.
    ///
    /// Signals `ready` with the bind outcome before entering the accept
    /// loop, so the caller can surface a bind failure synchronously instead
    /// of only discovering it in a background task's logs.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::StartFailed`] if the port cannot be bound.
    #[instrument(skip(self, cancel, ready), fields(item_name = %self.item_name, port = self.config.port))]
    pub async fn serve(
        self: Arc<Self>,
        cancel: CancellationToken,
        ready: tokio::sync::oneshot::Sender<Result<(), AdapterError>>,
    ) -> Result<(), AdapterError> {
        let addr = format!("{}:{}", self.config.bind_host, self.config.port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(err) => {
                let message = err.to_string();
                let _ = ready.send(Err(AdapterError::StartFailed(message.clone())));
                return Err(AdapterError::StartFailed(message));
            }
        };
        let _ = ready.send(Ok(()));
        info!(%addr, "mllp inbound listening");
        let semaphore = Arc::new(Semaphore::new(self.config.max_connections));
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("mllp inbound shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            warn!(error = %err, "accept failed");
                            continue;
                        }
                    };
                    let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                        warn!(%peer, "max_connections reached, dropping connection");
                        self.connections_dropped.fetch_add(1, Ordering::Relaxed);
                        drop(stream);
                        continue;
                    };
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        let _permit = permit;
                        this.handle_connection(stream).await;
                    });
                }
            }
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) {
        let mut framer = Framer::new();
        let mut byte = [0u8; 1];
        loop {
            let read = tokio::time::timeout(self.config.read_timeout, stream.read(&mut byte)).await;
            let n = match read {
                Ok(Ok(n)) => n,
                Ok(Err(err)) => {
                    warn!(error = %err, "mllp inbound read failed");
                    return;
                }
                Err(_) => {
                    warn!("mllp inbound read timed out");
                    return;
                }
            };
            if n == 0 {
                return;
            }
            match framer.feed(byte[0]) {
                Ok(None) => {}
                Ok(Some(payload)) => {
                    if let Some(ack_bytes) = self.handle_message(payload).await {
                        match framing::frame(&ack_bytes) {
                            Ok(framed) => {
                                if let Err(err) = stream.write_all(&framed).await {
                                    warn!(error = %err, "failed to write ack");
                                    return;
                                }
                            }
                            Err(err) => warn!(error = %err, "failed to frame ack"),
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "mllp framing error, closing connection");
                    return;
                }
            }
        }
    }

    async fn handle_message(&self, payload: Vec<u8>) -> Option<Vec<u8>> {
        let view = hl7::parse(&payload);
        let outcome = if hl7::message_type(&view).is_some() {
            ValidationOutcome::Valid
        } else {
            ValidationOutcome::StructurallyInvalid
        };

        let body_id = match self
            .trace_store
            .store_body(&payload, HL7_CONTENT_TYPE, "2.x")
            .await
        {
            Ok(id) => id,
            Err(err) => {
                error!(error = %err, "failed to persist inbound body");
                return ack::ack_code(self.config.ack_mode, outcome)
                    .map(|code| hl7::build_ack(&view, code));
            }
        };

        let mut header = MessageHeader::new_pending(
            &self.project_id,
            &self.item_name,
            "service",
            Direction::Inbound,
            None,
            body_id,
            "HL7v2",
        );
        header.destination_item = Some(self.item_name.clone());
        let header_id = header.header_id;
        self.trace_writer.record_header(header);

        if outcome == ValidationOutcome::StructurallyInvalid {
            self.trace_writer.finish_header(
                header_id,
                HeaderStatus::Error,
                Some("structurally malformed HL7 message".to_string()),
                None,
            );
            if let Some(handler) = &self.bad_message_handler {
                let envelope = self.build_envelope(payload, view.clone());
                if let Err(err) = handler.submit(envelope).await {
                    warn!(error = %err, "failed to forward malformed message to bad_message_handler");
                }
            }
            return ack::ack_code(self.config.ack_mode, outcome).map(|code| hl7::build_ack(&view, code));
        }

        let envelope = self.build_envelope(payload, view.clone());
        let ack_bytes = ack::ack_code(self.config.ack_mode, outcome).map(|code| hl7::build_ack(&view, code));

        // The spec requires the ACK to reach the peer before the message is
        // forwarded downstream: hand the submit off to a background task so
        // the caller can write the ACK immediately instead of waiting on
        // whatever `submit` does under `block` overflow policy.
        let target = Arc::clone(&self.target);
        let trace_writer = Arc::clone(&self.trace_writer);
        tokio::spawn(async move {
            match target.submit(envelope).await {
                Ok(()) => {
                    trace_writer.finish_header(header_id, HeaderStatus::Completed, None, None);
                }
                Err(err) => {
                    trace_writer.finish_header(header_id, HeaderStatus::Error, Some(err.to_string()), None);
                }
            }
        });

        ack_bytes
    }

    fn build_envelope(&self, payload: Vec<u8>, view: crate::domain::ParsedView) -> MessageEnvelope {
        let mut envelope = MessageEnvelope::new_inbound(HL7_CONTENT_TYPE, "2.x", payload);
        envelope.destination_host = Some(self.item_name.clone());
        envelope.parsed_view = Some(view);
        envelope
    }
}
