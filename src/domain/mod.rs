//! Domain types: the engine's vocabulary, independent of any I/O.
//!
//! Functional core of the crate — every type here is plain data or a pure
//! function over plain data. The imperative shell (sockets, files, SQLite)
//! lives in [`crate::adapter`], [`crate::trace_store`] and [`crate::engine`].

pub mod config_types;
pub mod envelope;
pub mod host_state;
pub mod ids;
pub mod item_config;
pub mod routing_rule;
pub mod trace;

pub use config_types::{
    AckTimeoutSecs, ConnectTimeoutSecs, GracefulShutdownTimeoutSecs, MaxRestarts, MaxSendRetries,
    PoolSize, Priority, QueueCapacity, RestartDelaySecs, RetryIntervalSecs,
};
pub use envelope::{MessageEnvelope, ParsedView, PropertyValue};
pub use host_state::HostState;
pub use ids::{BodyId, CorrelationId, HeaderId, ItemName, MessageId, SessionId};
pub use item_config::{
    AckMode, AdapterSettings, AdapterType, HostSettings, ItemConfig, ItemConfigError, ItemKind,
    MessagingPattern, RestartPolicy,
};
pub use routing_rule::{Connection, ConnectionKind, RoutingRule, RuleAction};
pub use trace::{Direction, HeaderStatus, MessageBody, MessageHeader};
