//! In-memory [`TraceStore`], grounded on the teacher's pervasive `DashMap`
//! usage (`message_router::router::ThroughputTracker`) for lock-free
//! concurrent maps shared across worker tasks.
//!
//! Used by tests and by `hub-engine` when no `--trace-db` path is given;
//! never durable across process restart, matching the non-goal that
//! queue/trace state is in-memory only.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::domain::{BodyId, HeaderId, HeaderStatus, MessageBody, MessageHeader, SessionId};
use crate::hl7;

use super::{HeaderFilter, TraceError, TraceStore};

/// Key bodies are deduplicated by: `(checksum, content_type, schema_version)`.
type BodyKey = (String, String, String);

/// `DashMap`-backed [`TraceStore`] with no persistence.
#[derive(Default)]
pub struct MemoryTraceStore {
    bodies_by_key: DashMap<BodyKey, BodyId>,
    bodies: DashMap<BodyId, MessageBody>,
    headers: DashMap<HeaderId, MessageHeader>,
    // Insertion order, since `DashMap` iteration order is unspecified and
    // `list_headers`/`list_unassigned` promise most-recent-first/oldest-first.
    header_order: RwLock<Vec<HeaderId>>,
}

impl MemoryTraceStore {
    /// Builds an empty store.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl TraceStore for MemoryTraceStore {
    async fn store_body(
        &self,
        raw_payload: &[u8],
        content_type: &str,
        schema_version: &str,
    ) -> Result<BodyId, TraceError> {
        let checksum = MessageBody::checksum_of(raw_payload);
        let key = (checksum.clone(), content_type.to_string(), schema_version.to_string());
        if let Some(existing) = self.bodies_by_key.get(&key) {
            return Ok(*existing);
        }
        let body_id = BodyId::generate();
        let view = hl7::parse(raw_payload);
        let body = MessageBody {
            body_id,
            checksum,
            content_type: content_type.to_string(),
            schema_version: schema_version.to_string(),
            size_bytes: raw_payload.len() as i64,
            raw_payload: raw_payload.to_vec(),
            hl7_message_type: hl7::message_type(&view),
            hl7_sending_facility: hl7::sending_facility(&view),
        };
        self.bodies_by_key.insert(key, body_id);
        self.bodies.insert(body_id, body);
        Ok(body_id)
    }

    async fn store_header(&self, header: MessageHeader) -> Result<(), TraceError> {
        let id = header.header_id;
        self.headers.insert(id, header);
        self.header_order.write().await.push(id);
        Ok(())
    }

    async fn update_header_status(
        &self,
        header_id: HeaderId,
        status: HeaderStatus,
        error_message: Option<String>,
        ack_body_id: Option<BodyId>,
    ) -> Result<(), TraceError> {
        let mut entry = self
            .headers
            .get_mut(&header_id)
            .ok_or(TraceError::HeaderNotFound(header_id))?;
        entry.finish(status, error_message);
        if ack_body_id.is_some() {
            entry.ack_body_id = ack_body_id;
        }
        Ok(())
    }

    async fn list_headers(&self, filter: HeaderFilter) -> Result<Vec<MessageHeader>, TraceError> {
        let order = self.header_order.read().await;
        let mut out: Vec<MessageHeader> = order
            .iter()
            .rev()
            .filter_map(|id| self.headers.get(id).map(|h| h.clone()))
            .filter(|h| {
                filter.project_id.as_deref().is_none_or(|p| h.project_id == p)
                    && filter.session_id.is_none_or(|s| h.session_id == Some(s))
                    && filter.item_name.as_deref().is_none_or(|n| h.item_name == n)
                    && filter.status.is_none_or(|s| h.status == s)
            })
            .collect();
        if filter.limit > 0 {
            out.truncate(filter.limit as usize);
        }
        Ok(out)
    }

    async fn get_body(&self, body_id: BodyId) -> Result<Option<MessageBody>, TraceError> {
        Ok(self.bodies.get(&body_id).map(|b| b.clone()))
    }

    async fn assign_session(
        &self,
        header_ids: &[HeaderId],
        session_id: SessionId,
    ) -> Result<(), TraceError> {
        for id in header_ids {
            if let Some(mut header) = self.headers.get_mut(id) {
                header.session_id = Some(session_id);
            }
        }
        Ok(())
    }

    async fn list_unassigned(&self, limit: u32) -> Result<Vec<MessageHeader>, TraceError> {
        let order = self.header_order.read().await;
        let mut out: Vec<MessageHeader> = order
            .iter()
            .filter_map(|id| self.headers.get(id).map(|h| h.clone()))
            .filter(|h| h.session_id.is_none())
            .collect();
        if limit > 0 {
            out.truncate(limit as usize);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Direction;

    #[tokio::test]
    async fn store_body_dedups_by_checksum_type_and_version() {
        let store = MemoryTraceStore::new();
        let a = store.store_body(b"hello", "application/octet-stream", "1.0").await.unwrap();
        let b = store.store_body(b"hello", "application/octet-stream", "1.0").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.bodies.len(), 1);
    }

    #[tokio::test]
    async fn different_schema_version_is_a_distinct_body() {
        let store = MemoryTraceStore::new();
        let a = store.store_body(b"hello", "application/hl7-v2+er7", "2.3").await.unwrap();
        let b = store.store_body(b"hello", "application/hl7-v2+er7", "2.4").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn update_header_status_finalizes_pending_header() {
        let store = MemoryTraceStore::new();
        let body_id = store.store_body(b"x", "application/octet-stream", "1.0").await.unwrap();
        let header = MessageHeader::new_pending("proj", "Svc", "service", Direction::Inbound, None, body_id, "Raw");
        let header_id = header.header_id;
        store.store_header(header).await.unwrap();
        store
            .update_header_status(header_id, HeaderStatus::Completed, None, None)
            .await
            .unwrap();
        let headers = store
            .list_headers(HeaderFilter {
                project_id: Some("proj".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].status, HeaderStatus::Completed);
    }

    #[tokio::test]
    async fn update_unknown_header_errors() {
        let store = MemoryTraceStore::new();
        let err = store
            .update_header_status(HeaderId::generate(), HeaderStatus::Completed, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TraceError::HeaderNotFound(_)));
    }

    #[tokio::test]
    async fn list_unassigned_only_returns_headers_without_session() {
        let store = MemoryTraceStore::new();
        let body_id = store.store_body(b"x", "application/octet-stream", "1.0").await.unwrap();
        let with_session = MessageHeader::new_pending(
            "proj",
            "Svc",
            "service",
            Direction::Inbound,
            Some(SessionId::generate()),
            body_id,
            "Raw",
        );
        let without_session =
            MessageHeader::new_pending("proj", "Svc", "service", Direction::Inbound, None, body_id, "Raw");
        store.store_header(with_session).await.unwrap();
        store.store_header(without_session).await.unwrap();
        let unassigned = store.list_unassigned(10).await.unwrap();
        assert_eq!(unassigned.len(), 1);
    }
}
