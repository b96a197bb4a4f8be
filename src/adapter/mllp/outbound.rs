//! MLLP outbound adapter: delivers envelopes over a maintained TCP
//! connection and evaluates the remote `MSA-1` against `reply_code_actions`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{instrument, warn};

use crate::adapter::mllp::framing::{self, Framer};
use crate::adapter::mllp::reply_code::{ReplyAction, ReplyCodeActions};
use crate::adapter::{AdapterError, OutboundAdapter, OutboundOutcome};
use crate::domain::MessageEnvelope;
use crate::hl7;

/// Static configuration an [`MllpOutboundAdapter`] connects with.
#[derive(Debug, Clone)]
pub struct MllpOutboundConfig {
    /// Remote host to connect to.
    pub ip_address: String,
    /// Remote port.
    pub port: u16,
    /// Time allowed to establish the TCP connection.
    pub connect_timeout: Duration,
    /// Time allowed to wait for the remote ACK frame.
    pub ack_timeout: Duration,
    /// Maximum send attempts (including the first) before declaring fatal failure.
    pub max_retries: u32,
    /// Delay between send retries.
    pub retry_interval: Duration,
    /// Ordered `pattern=action` rule list evaluated against the remote `MSA-1`.
    pub reply_code_actions: ReplyCodeActions,
}

/// Delivers envelopes over a maintained MLLP connection to `(host, port)`.
///
/// Holds one connection behind a mutex rather than a full pool: a single
/// outbound operation processes envelopes off its queue sequentially (one
/// worker is the common case per SPEC_FULL.md's `pool_size` guidance for
/// order-preserving operations), so one reusable socket is sufficient.
pub struct MllpOutboundAdapter {
    config: MllpOutboundConfig,
    connection: Mutex<Option<TcpStream>>,
}

impl MllpOutboundAdapter {
    /// Builds an adapter with no connection yet established.
    #[must_use]
    pub fn new(config: MllpOutboundConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
        }
    }

    async fn ensure_connected(&self, slot: &mut Option<TcpStream>) -> Result<(), AdapterError> {
        if slot.is_some() {
            return Ok(());
        }
        let addr = format!("{}:{}", self.config.ip_address, self.config.port);
        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| AdapterError::Transient(format!("connect to {addr} timed out")))?
            .map_err(|err| AdapterError::Transient(format!("connect to {addr} failed: {err}")))?;
        *slot = Some(stream);
        Ok(())
    }

    async fn send_once(&self, envelope: &MessageEnvelope) -> Result<OutboundOutcome, AdapterError> {
        let framed = framing::frame(&envelope.raw_payload)
            .map_err(|err| AdapterError::Fatal(format!("cannot frame outbound payload: {err}")))?;

        let mut guard = self.connection.lock().await;
        self.ensure_connected(&mut guard).await?;
        let stream = guard.as_mut().expect("just connected");

        if let Err(err) = stream.write_all(&framed).await {
            *guard = None;
            return Err(AdapterError::Transient(format!("write failed: {err}")));
        }

        let ack_payload = match read_frame(stream, self.config.ack_timeout).await {
            Ok(bytes) => bytes,
            Err(err) => {
                *guard = None;
                return Err(err);
            }
        };
        drop(guard);

        let ack_view = hl7::parse(&ack_payload);
        let reply_code = ack_view.field("MSA", 1, 0);
        let action = self.config.reply_code_actions.evaluate(reply_code);
        match action {
            ReplyAction::Success => Ok(OutboundOutcome::success_with_ack(ack_payload)),
            ReplyAction::Warn => Ok(OutboundOutcome::warning_with_ack(ack_payload)),
            ReplyAction::Retry => Err(AdapterError::Transient(format!(
                "remote returned retryable reply code {reply_code}"
            ))),
            ReplyAction::Fail => Err(AdapterError::RemoteNak(format!(
                "remote returned {reply_code}"
            ))),
        }
    }
}

async fn read_frame(stream: &mut TcpStream, timeout: Duration) -> Result<Vec<u8>, AdapterError> {
    let mut framer = Framer::new();
    let mut byte = [0u8; 1];
    loop {
        let read = tokio::time::timeout(timeout, stream.read(&mut byte))
            .await
            .map_err(|_| AdapterError::Transient("timed out waiting for remote ack".to_string()))?
            .map_err(|err| AdapterError::Transient(format!("read failed: {err}")))?;
        if read == 0 {
            return Err(AdapterError::Transient(
                "connection closed before ack frame completed".to_string(),
            ));
        }
        match framer.feed(byte[0]) {
            Ok(Some(payload)) => return Ok(payload),
            Ok(None) => {}
            Err(err) => return Err(AdapterError::Transient(format!("malformed ack frame: {err}"))),
        }
    }
}

#[async_trait]
impl OutboundAdapter for MllpOutboundAdapter {
    #[instrument(skip(self, envelope), fields(message_id = %envelope.message_id, host = %self.config.ip_address, port = self.config.port))]
    async fn send(&self, envelope: &MessageEnvelope) -> Result<OutboundOutcome, AdapterError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send_once(envelope).await {
                Ok(outcome) => return Ok(outcome),
                Err(AdapterError::Transient(reason)) if attempt < self.config.max_retries => {
                    warn!(attempt, %reason, "mllp outbound send failed, retrying");
                    tokio::time::sleep(self.config.retry_interval).await;
                }
                Err(AdapterError::Transient(reason)) => {
                    return Err(AdapterError::Fatal(format!(
                        "exhausted {attempt} attempts: {reason}"
                    )));
                }
                Err(other) => return Err(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_timeout_to_unroutable_address_is_transient_then_fatal() {
        let config = MllpOutboundConfig {
            ip_address: "10.255.255.1".to_string(),
            port: 1,
            connect_timeout: Duration::from_millis(50),
            ack_timeout: Duration::from_millis(50),
            max_retries: 1,
            retry_interval: Duration::from_millis(1),
            reply_code_actions: ReplyCodeActions::parse(":*=S").unwrap(),
        };
        let adapter = MllpOutboundAdapter::new(config);
        let envelope = MessageEnvelope::new_inbound("application/hl7-v2+er7", "2.x", b"MSH|^~\\&|\r".to_vec());
        let result = adapter.send(&envelope).await;
        assert!(result.is_err());
    }
}
