//! [`MessageHeader`] and [`MessageBody`]: the per-leg trace record persisted
//! by [`crate::trace_store`].

use chrono_like::Timestamp;
use serde::{Deserialize, Serialize};

use super::ids::{BodyId, HeaderId, SessionId};

/// Minimal wall-clock timestamp type so this module does not need to choose
/// between `chrono` and `std::time` for serde purposes; stored as RFC 3339.
pub mod chrono_like {
    use serde::{Deserialize, Serialize};
    use std::time::{SystemTime, UNIX_EPOCH};

    /// Milliseconds since the Unix epoch.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
    pub struct Timestamp(pub i64);

    impl Timestamp {
        /// Captures the current time.
        #[must_use]
        pub fn now() -> Self {
            let dur = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            #[allow(clippy::cast_possible_wrap)]
            Self(dur.as_millis() as i64)
        }

        /// Milliseconds elapsed between `self` and a later timestamp.
        #[must_use]
        pub fn elapsed_ms_until(self, later: Self) -> i64 {
            later.0 - self.0
        }
    }
}

/// Whether a leg entered or left the item that recorded it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// The item received this leg.
    Inbound,
    /// The item produced/forwarded this leg.
    Outbound,
}

/// Outcome of processing one leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderStatus {
    /// Written before the outcome is known; must be finalized later.
    Pending,
    /// Processing finished successfully.
    Completed,
    /// An outbound operation transmitted and received a non-error ACK.
    Sent,
    /// An outbound operation exhausted retries or received a fatal NAK.
    Failed,
    /// Parse/validation/framing/queue-overflow error.
    Error,
    /// A router evaluated rules and nothing matched, with no default target.
    NoMatch,
}

impl HeaderStatus {
    /// True for any status that will not change again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, HeaderStatus::Pending)
    }
}

/// One per-leg trace record, the unit [`crate::trace_store::TraceStore`] persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Primary key.
    pub header_id: HeaderId,
    /// Ties this leg to every other leg of the same external ingress.
    pub session_id: Option<SessionId>,
    /// Owning production/project.
    pub project_id: String,
    /// Item that recorded this leg.
    pub item_name: String,
    /// Service, process, or operation — stored as a string to decouple the
    /// trace schema from `ItemKind`'s exact variant set.
    pub item_kind: String,
    /// Inbound or outbound relative to `item_name`.
    pub direction: Direction,
    /// Current outcome.
    pub status: HeaderStatus,
    /// Upstream item, if known.
    pub source_item: Option<String>,
    /// Downstream item(s); comma-joined for fan-out.
    pub destination_item: Option<String>,
    /// When the leg was received/produced.
    pub received_at: Timestamp,
    /// When processing of the leg finished, if it has.
    pub completed_at: Option<Timestamp>,
    /// Milliseconds between `received_at` and `completed_at`.
    pub latency_ms: Option<i64>,
    /// Body this header references.
    pub body_id: BodyId,
    /// Concrete payload class, e.g. `"HL7v2"`, `"FHIR"`, `"Raw"`.
    pub body_class_name: String,
    /// Body of the ACK received for this leg, if any.
    pub ack_body_id: Option<BodyId>,
    /// Human-readable failure detail, set alongside `Error`/`Failed`.
    pub error_message: Option<String>,
}

impl MessageHeader {
    /// Starts a new pending header for a leg that has just begun processing.
    #[must_use]
    pub fn new_pending(
        project_id: impl Into<String>,
        item_name: impl Into<String>,
        item_kind: impl Into<String>,
        direction: Direction,
        session_id: Option<SessionId>,
        body_id: BodyId,
        body_class_name: impl Into<String>,
    ) -> Self {
        Self {
            header_id: HeaderId::generate(),
            session_id,
            project_id: project_id.into(),
            item_name: item_name.into(),
            item_kind: item_kind.into(),
            direction,
            status: HeaderStatus::Pending,
            source_item: None,
            destination_item: None,
            received_at: Timestamp::now(),
            completed_at: None,
            latency_ms: None,
            body_id,
            body_class_name: body_class_name.into(),
            ack_body_id: None,
            error_message: None,
        }
    }

    /// Finalizes a pending header with a terminal status.
    pub fn finish(&mut self, status: HeaderStatus, error_message: Option<String>) {
        let now = Timestamp::now();
        self.completed_at = Some(now);
        self.latency_ms = Some(self.received_at.elapsed_ms_until(now));
        self.status = status;
        self.error_message = error_message;
    }
}

/// Content-deduplicated message payload.
///
/// Rows are unique by `(checksum, content_type, schema_version)`; two
/// identical payloads of the same type share one row across any number of
/// headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBody {
    /// Primary key.
    pub body_id: BodyId,
    /// SHA-256 hex digest of `raw_payload`.
    pub checksum: String,
    /// MIME-like content type.
    pub content_type: String,
    /// Protocol/schema version.
    pub schema_version: String,
    /// Byte length of `raw_payload`.
    pub size_bytes: i64,
    /// The verbatim payload bytes.
    pub raw_payload: Vec<u8>,
    /// HL7 message type (`MSH-9.1`), populated for HL7 payloads.
    pub hl7_message_type: Option<String>,
    /// HL7 sending facility (`MSH-4`), populated for HL7 payloads.
    pub hl7_sending_facility: Option<String>,
}

impl MessageBody {
    /// Computes the checksum a [`crate::trace_store::TraceStore`] would use
    /// to deduplicate `raw_payload`.
    #[must_use]
    pub fn checksum_of(raw_payload: &[u8]) -> String {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(raw_payload);
        format!("{digest:x}")
    }
}
