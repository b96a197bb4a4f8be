//! Identifier newtypes used throughout the engine.
//!
//! Every id that flows between hosts is a `Uuid`-backed `nutype` rather than
//! a bare `String`, so a `SessionId` can never be passed where a `BodyId` is
//! expected.

use nutype::nutype;
use uuid::Uuid;

/// Identifies one [`crate::domain::envelope::MessageEnvelope`] in flight.
///
/// A new id is minted every time an envelope is created, including when a
/// router `transform` action produces a derived envelope.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Identifies every leg produced from one external ingress.
///
/// Propagates unchanged across every forwarding hop so the full path of one
/// inbound message can be reconstructed from trace headers alone.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Ties a reply envelope back to the request that produced it.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Primary key of a [`crate::domain::trace::MessageHeader`] row.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct HeaderId(Uuid);

impl HeaderId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Primary key of a [`crate::domain::trace::MessageBody`] row.
///
/// Bodies are deduplicated by checksum, so this id is not minted per
/// envelope: it is assigned the first time a given payload is stored and
/// reused for every later header that references the same checksum.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct BodyId(Uuid);

impl BodyId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Name of one item (service, process, or operation) within a production.
///
/// Unique within a production; used as the key of the [`crate::engine::ServiceRegistry`].
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 128),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct ItemName(String);
