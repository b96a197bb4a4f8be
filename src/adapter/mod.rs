//! [`Adapter`]: the I/O endpoint a service/operation [`crate::host::Host`] owns.
//!
//! Grounded on `message_router/traits.rs`'s `DeliveryEngine`/`MessageRouter`
//! async-trait shape: a narrow interface the worker pool calls through,
//! never touching sockets/files directly.

pub mod file;
pub mod http;
pub mod mllp;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::MessageEnvelope;

/// Errors raised by an adapter's `send`/`start` operations.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The adapter could not acquire its resources (bind/connect/open).
    #[error("adapter failed to start: {0}")]
    StartFailed(String),
    /// A transient transport failure; the caller may retry.
    #[error("transient transport error: {0}")]
    Transient(String),
    /// A fatal transport failure; retries are exhausted or pointless.
    #[error("fatal transport error: {0}")]
    Fatal(String),
    /// The remote peer returned a negative acknowledgment.
    #[error("remote nak: {0}")]
    RemoteNak(String),
}

/// An outbound delivery endpoint: the half of the `Adapter` contract a
/// [`crate::host::MessageHandler`] implementation calls on every envelope.
///
/// Inbound adapters additionally run an ingress pump (a task spawned in
/// [`crate::host::Host::start`]) that calls [`crate::host::Host::submit`]
/// directly; they do not implement this trait.
#[async_trait]
pub trait OutboundAdapter: Send + Sync + 'static {
    /// Delivers one envelope's `raw_payload` to the configured remote.
    async fn send(&self, envelope: &MessageEnvelope) -> Result<OutboundOutcome, AdapterError>;
}

/// What happened when an outbound adapter attempted delivery.
#[derive(Debug, Clone)]
pub struct OutboundOutcome {
    /// Raw bytes of the acknowledgment received, if the transport has one.
    pub ack_payload: Option<Vec<u8>>,
    /// True if the outcome should be traced as a warning despite success.
    pub warning: bool,
}

impl OutboundOutcome {
    /// A plain success with no acknowledgment payload (e.g. HTTP 2xx, file write).
    #[must_use]
    pub fn success() -> Self {
        Self {
            ack_payload: None,
            warning: false,
        }
    }

    /// A success carrying the remote's acknowledgment bytes.
    #[must_use]
    pub fn success_with_ack(ack_payload: Vec<u8>) -> Self {
        Self {
            ack_payload: Some(ack_payload),
            warning: false,
        }
    }

    /// A success carrying an acknowledgment, flagged as a warning outcome.
    #[must_use]
    pub fn warning_with_ack(ack_payload: Vec<u8>) -> Self {
        Self {
            ack_payload: Some(ack_payload),
            warning: true,
        }
    }
}
