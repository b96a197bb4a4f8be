//! [`MessageEnvelope`]: the unit of work passed between hosts.

use std::collections::HashMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use super::config_types::Priority;
use super::ids::{CorrelationId, MessageId, SessionId};

/// A single value carried in [`MessageEnvelope::properties`].
///
/// Routing-visible fields and trace context live here; anything richer
/// belongs in `raw_payload` and is reached through parsing, not properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// A UTF-8 string value.
    Text(String),
    /// A signed integer value.
    Integer(i64),
    /// A boolean flag.
    Flag(bool),
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// A field or segment successfully extracted the first time the envelope's
/// payload was parsed.
///
/// Populated lazily by whichever host first needs it (typically a
/// [`crate::router::RouterHost`] evaluating a rule condition) and never
/// mutated afterward; a later host that needs the same field reuses it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedView {
    /// Segment-indexed, component-indexed field values, e.g. `("MSH", 9, 1)`.
    ///
    /// Keyed by `(segment, field, component)`; component `0` denotes the
    /// whole field before component splitting.
    pub fields: HashMap<(String, u32, u32), String>,
}

impl ParsedView {
    /// Looks up a field by segment name, 1-indexed field and component.
    ///
    /// Returns an empty string for an absent field, matching the condition
    /// language's "missing field never matches a non-empty comparison" rule.
    #[must_use]
    pub fn field(&self, segment: &str, index: u32, component: u32) -> &str {
        self.fields
            .get(&(segment.to_string(), index, component))
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Immutable-after-creation record carrying one message between hosts.
///
/// `raw_payload` is never mutated once set; a parse failure never
/// invalidates the envelope, it is recorded in `properties` and
/// `parsed_view` is simply left `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Identity of this specific leg.
    pub message_id: MessageId,
    /// Ties a reply back to the request that produced it.
    pub correlation_id: Option<CorrelationId>,
    /// Shared by every leg produced from one external ingress.
    pub session_id: SessionId,
    /// Name of the item that produced this leg.
    pub source_host: Option<String>,
    /// Name of the item this leg is addressed to.
    pub destination_host: Option<String>,
    /// MIME-like content type, e.g. `application/hl7-v2+er7`.
    pub content_type: String,
    /// Protocol/schema version, e.g. `"2.4"` or `"R4"`.
    pub schema_version: String,
    /// 0 = highest priority, 9 = lowest.
    pub priority: Priority,
    /// Optional delivery deadline.
    pub ttl: Option<SystemTime>,
    /// Number of times this envelope has been retried after a failure.
    pub retry_count: u32,
    /// The verbatim bytes received; never mutated.
    pub raw_payload: Vec<u8>,
    /// Lazily populated parse result; `None` until something parses it.
    pub parsed_view: Option<ParsedView>,
    /// Routing-visible properties and trace context.
    pub properties: HashMap<String, PropertyValue>,
}

impl MessageEnvelope {
    /// Builds a brand-new envelope for a freshly ingested message.
    ///
    /// Starts a new session: use [`Self::derive`] when forwarding or
    /// transforming an envelope that already belongs to a session.
    #[must_use]
    pub fn new_inbound(content_type: impl Into<String>, schema_version: impl Into<String>, raw_payload: Vec<u8>) -> Self {
        Self {
            message_id: MessageId::generate(),
            correlation_id: None,
            session_id: SessionId::generate(),
            source_host: None,
            destination_host: None,
            content_type: content_type.into(),
            schema_version: schema_version.into(),
            priority: Priority::default(),
            ttl: None,
            retry_count: 0,
            raw_payload,
            parsed_view: None,
            properties: HashMap::new(),
        }
    }

    /// Produces a new envelope inheriting `session_id` and `correlation_id`
    /// from `self`, with a fresh `message_id`.
    ///
    /// Used by router `transform` actions and by any host that forwards a
    /// derived message rather than the original bytes.
    #[must_use]
    pub fn derive(&self, raw_payload: Vec<u8>) -> Self {
        Self {
            message_id: MessageId::generate(),
            correlation_id: self.correlation_id,
            session_id: self.session_id,
            source_host: self.destination_host.clone(),
            destination_host: None,
            content_type: self.content_type.clone(),
            schema_version: self.schema_version.clone(),
            priority: self.priority,
            ttl: self.ttl,
            retry_count: 0,
            raw_payload,
            parsed_view: None,
            properties: self.properties.clone(),
        }
    }

    /// Returns a clone addressed at `target`, incrementing nothing else.
    #[must_use]
    pub fn addressed_to(&self, target: &str) -> Self {
        let mut next = self.clone();
        next.destination_host = Some(target.to_string());
        next
    }

    /// Resolves a condition-language field accessor against the parsed view,
    /// falling back to the empty string when unparsed or absent.
    #[must_use]
    pub fn field(&self, segment: &str, index: u32, component: u32) -> &str {
        self.parsed_view
            .as_ref()
            .map_or("", |view| view.field(segment, index, component))
    }
}
