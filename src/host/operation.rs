//! [`OperationHandler`]: the [`MessageHandler`] every `operation`-kind item
//! runs, wrapping an [`OutboundAdapter`] with the trace-writing and
//! error-routing behavior common to MLLP/File/HTTP delivery.
//!
//! Grounded on `crate::router::RouterHost`'s own `MessageHandler` impl for
//! the pending-header/finish-header sequencing, generalized from "evaluate
//! routing rules" to "hand off to one adapter".

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{instrument, warn};

use crate::adapter::{AdapterError, OutboundAdapter};
use crate::domain::{Direction, HeaderStatus, MessageEnvelope, MessageHeader};
use crate::host::{Host, MessageHandler};
use crate::trace_store::{TraceStore, TraceWriter};

/// Wraps one [`OutboundAdapter`] as the [`MessageHandler`] an `operation`
/// host's worker pool calls for every envelope it dequeues.
///
/// On delivery failure, forwards the envelope unchanged to `error_target`
/// if one is configured (an `error`-kind [`crate::domain::Connection`] from
/// this item), otherwise only records the failed trace row.
pub struct OperationHandler {
    adapter: Arc<dyn OutboundAdapter>,
    trace_store: Arc<dyn TraceStore>,
    trace_writer: Arc<TraceWriter>,
    project_id: String,
    item_name: String,
    error_target: RwLock<Option<Arc<Host>>>,
}

impl OperationHandler {
    /// Builds a handler around `adapter`, with no error target wired yet.
    #[must_use]
    pub fn new(
        adapter: Arc<dyn OutboundAdapter>,
        trace_store: Arc<dyn TraceStore>,
        trace_writer: Arc<TraceWriter>,
        project_id: impl Into<String>,
        item_name: impl Into<String>,
    ) -> Self {
        Self {
            adapter,
            trace_store,
            trace_writer,
            project_id: project_id.into(),
            item_name: item_name.into(),
            error_target: RwLock::new(None),
        }
    }

    /// Wires (or clears) the host envelopes are forwarded to on delivery
    /// failure. Called by the engine once every host in a deploy/reload
    /// batch has been instantiated, so forward references resolve
    /// regardless of declaration order.
    pub async fn set_error_target(&self, target: Option<Arc<Host>>) {
        *self.error_target.write().await = target;
    }
}

#[async_trait]
impl MessageHandler for OperationHandler {
    #[instrument(skip(self, envelope), fields(item_name = %self.item_name, message_id = %envelope.message_id))]
    async fn on_message(&self, envelope: MessageEnvelope) -> Result<(), String> {
        let body_id = self
            .trace_store
            .store_body(&envelope.raw_payload, &envelope.content_type, &envelope.schema_version)
            .await
            .map_err(|err| err.to_string())?;
        let mut header = MessageHeader::new_pending(
            self.project_id.clone(),
            self.item_name.clone(),
            "operation",
            Direction::Outbound,
            Some(envelope.session_id),
            body_id,
            "HL7v2",
        );
        header.source_item = envelope.source_host.clone();
        let header_id = header.header_id;
        self.trace_writer.record_header(header);

        match self.adapter.send(&envelope).await {
            Ok(outcome) => {
                let ack_body_id = match &outcome.ack_payload {
                    Some(ack) => self.trace_store.store_body(ack, &envelope.content_type, &envelope.schema_version).await.ok(),
                    None => None,
                };
                if outcome.warning {
                    warn!("outbound delivery succeeded with a warning reply code");
                }
                self.trace_writer
                    .finish_header(header_id, HeaderStatus::Sent, None, ack_body_id);
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                self.trace_writer
                    .finish_header(header_id, HeaderStatus::Failed, Some(reason.clone()), None);
                self.forward_to_error_target(envelope).await;
                Err(reason)
            }
        }
    }
}

impl OperationHandler {
    async fn forward_to_error_target(&self, envelope: MessageEnvelope) {
        let Some(target) = self.error_target.read().await.clone() else {
            return;
        };
        if let Err(err) = target.submit(envelope).await {
            warn!(error = %err, "failed to forward to error target");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::OutboundOutcome;
    use crate::domain::{HostSettings, ItemName};
    use crate::trace_store::memory::MemoryTraceStore;
    use tokio::sync::Mutex as TokioMutex;

    struct StubAdapter {
        result: TokioMutex<Option<Result<OutboundOutcome, AdapterError>>>,
    }

    #[async_trait]
    impl OutboundAdapter for StubAdapter {
        async fn send(&self, _envelope: &MessageEnvelope) -> Result<OutboundOutcome, AdapterError> {
            self.result
                .lock()
                .await
                .take()
                .unwrap_or_else(|| Ok(OutboundOutcome::success()))
        }
    }

    fn envelope() -> MessageEnvelope {
        MessageEnvelope::new_inbound("application/hl7-v2+er7", "2.x", b"MSH|^~\\&|\r".to_vec())
    }

    #[tokio::test]
    async fn successful_send_writes_sent_header() {
        let store = MemoryTraceStore::new() as Arc<dyn TraceStore>;
        let writer = TraceWriter::spawn(Arc::clone(&store), 16);
        let adapter = Arc::new(StubAdapter {
            result: TokioMutex::new(Some(Ok(OutboundOutcome::success()))),
        });
        let handler = OperationHandler::new(adapter, Arc::clone(&store), writer, "proj", "Out");
        handler.on_message(envelope()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let headers = store
            .list_headers(crate::trace_store::HeaderFilter::default())
            .await
            .unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].status, HeaderStatus::Sent);
    }

    #[tokio::test]
    async fn failed_send_forwards_to_error_target() {
        let store = MemoryTraceStore::new() as Arc<dyn TraceStore>;
        let writer = TraceWriter::spawn(Arc::clone(&store), 16);
        let adapter = Arc::new(StubAdapter {
            result: TokioMutex::new(Some(Err(AdapterError::Fatal("boom".to_string())))),
        });
        let handler = OperationHandler::new(adapter, Arc::clone(&store), Arc::clone(&writer), "proj", "Out");

        let received = Arc::new(TokioMutex::new(Vec::new()));
        struct Capture(Arc<TokioMutex<Vec<MessageEnvelope>>>);
        #[async_trait]
        impl MessageHandler for Capture {
            async fn on_message(&self, envelope: MessageEnvelope) -> Result<(), String> {
                self.0.lock().await.push(envelope);
                Ok(())
            }
        }
        let error_host = Host::new(
            ItemName::try_from("ErrOut".to_string()).unwrap(),
            "proj",
            "operation",
            HostSettings::default(),
            Arc::new(Capture(Arc::clone(&received))),
            Arc::clone(&store),
        );
        error_host.start().await.unwrap();
        handler.set_error_target(Some(error_host)).await;

        assert!(handler.on_message(envelope()).await.is_err());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(received.lock().await.len(), 1);
        let headers = store
            .list_headers(crate::trace_store::HeaderFilter::default())
            .await
            .unwrap();
        assert_eq!(headers[0].status, HeaderStatus::Failed);
    }
}
