//! [`TraceStore`]: the per-leg message trace persisted by every host.
//!
//! Grounded on the teacher's `database.rs` (functional-core/imperative-shell
//! split for connection setup) and `storage/message_storage.rs` (SQL as
//! `const` strings, row-parsing helpers). Writes are fire-and-forget from
//! the processing path's point of view: see [`TraceWriter`].

pub mod memory;
pub mod reconciler;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use crate::domain::{BodyId, HeaderId, HeaderStatus, MessageBody, MessageHeader, SessionId};

/// Errors raised by a [`TraceStore`] implementation.
#[derive(Debug, Error)]
pub enum TraceError {
    /// The backing store reported a failure.
    #[error("trace store backend error: {0}")]
    Backend(String),
    /// `update_header_status` was called for a header that does not exist.
    #[error("header not found: {0}")]
    HeaderNotFound(HeaderId),
}

/// Filters accepted by [`TraceStore::list_headers`].
#[derive(Debug, Clone, Default)]
pub struct HeaderFilter {
    /// Restrict to one project.
    pub project_id: Option<String>,
    /// Restrict to one session.
    pub session_id: Option<SessionId>,
    /// Restrict to one item.
    pub item_name: Option<String>,
    /// Restrict to one status.
    pub status: Option<HeaderStatus>,
    /// Maximum rows to return.
    pub limit: u32,
}

/// Append-only store of per-leg headers and content-deduplicated bodies.
///
/// Implementations must never block the calling host for longer than an
/// in-memory enqueue: see [`TraceWriter`] for the fire-and-forget wrapper
/// every host actually calls through.
#[async_trait]
pub trait TraceStore: Send + Sync {
    /// Stores `raw_payload`, returning the existing `body_id` if an
    /// identical `(checksum, content_type, schema_version)` row exists.
    async fn store_body(
        &self,
        raw_payload: &[u8],
        content_type: &str,
        schema_version: &str,
    ) -> Result<BodyId, TraceError>;

    /// Appends a new header row.
    async fn store_header(&self, header: MessageHeader) -> Result<(), TraceError>;

    /// Finalizes a pending header.
    async fn update_header_status(
        &self,
        header_id: HeaderId,
        status: HeaderStatus,
        error_message: Option<String>,
        ack_body_id: Option<BodyId>,
    ) -> Result<(), TraceError>;

    /// Lists headers matching `filter`, most recent first.
    async fn list_headers(&self, filter: HeaderFilter) -> Result<Vec<MessageHeader>, TraceError>;

    /// Fetches one body by id.
    async fn get_body(&self, body_id: BodyId) -> Result<Option<MessageBody>, TraceError>;

    /// Assigns `session_id` to every header currently missing one that the
    /// reconciler has determined belongs to that session.
    async fn assign_session(
        &self,
        header_ids: &[HeaderId],
        session_id: SessionId,
    ) -> Result<(), TraceError>;

    /// Lists headers with no `session_id`, oldest first, for the reconciler
    /// to chain.
    async fn list_unassigned(&self, limit: u32) -> Result<Vec<MessageHeader>, TraceError>;
}

enum TraceCommand {
    StoreHeader(MessageHeader),
    UpdateStatus {
        header_id: HeaderId,
        status: HeaderStatus,
        error_message: Option<String>,
        ack_body_id: Option<BodyId>,
    },
}

/// Fire-and-forget wrapper around a [`TraceStore`].
///
/// Hosts call [`TraceWriter::record_header`]/[`TraceWriter::finish_header`],
/// which enqueue onto a bounded internal buffer and return immediately; a
/// dedicated background task drains the buffer into the underlying store.
/// If the buffer saturates, the write is dropped and a counter is bumped —
/// the processing path must never block on tracing.
pub struct TraceWriter {
    sender: mpsc::Sender<TraceCommand>,
    dropped: std::sync::atomic::AtomicU64,
}

impl TraceWriter {
    /// Spawns the background drain task and returns a writer handle.
    #[must_use]
    pub fn spawn(store: std::sync::Arc<dyn TraceStore>, buffer_size: usize) -> std::sync::Arc<Self> {
        let (sender, mut receiver) = mpsc::channel(buffer_size);
        tokio::spawn(async move {
            while let Some(command) = receiver.recv().await {
                let result = match command {
                    TraceCommand::StoreHeader(header) => store.store_header(header).await,
                    TraceCommand::UpdateStatus {
                        header_id,
                        status,
                        error_message,
                        ack_body_id,
                    } => {
                        store
                            .update_header_status(header_id, status, error_message, ack_body_id)
                            .await
                    }
                };
                if let Err(err) = result {
                    warn!(error = %err, "trace write failed");
                }
            }
        });
        std::sync::Arc::new(Self {
            sender,
            dropped: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Enqueues a header write; never blocks the caller beyond a bounded
    /// channel send, and drops (counting) rather than backing up
    /// indefinitely if the buffer is full.
    pub fn record_header(&self, header: MessageHeader) {
        if self.sender.try_send(TraceCommand::StoreHeader(header)).is_err() {
            self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    /// Enqueues a status finalization.
    pub fn finish_header(
        &self,
        header_id: HeaderId,
        status: HeaderStatus,
        error_message: Option<String>,
        ack_body_id: Option<BodyId>,
    ) {
        let command = TraceCommand::UpdateStatus {
            header_id,
            status,
            error_message,
            ack_body_id,
        };
        if self.sender.try_send(command).is_err() {
            self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    /// Number of trace writes dropped because the buffer was saturated.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }
}
