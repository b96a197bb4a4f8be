//! Configuration that fully determines how to build one [`crate::host::Host`].
//!
//! Follows the teacher's `message_router::config::RouterConfig` shape: a
//! plain serde struct plus a builder that runs `validate()` before handing
//! back a usable value, rather than leaving cross-field invariants to be
//! discovered at runtime.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::config_types::{
    AckTimeoutSecs, ConnectTimeoutSecs, GracefulShutdownTimeoutSecs, MaxRestarts, MaxSendRetries,
    PoolSize, QueueCapacity, RestartDelaySecs, RetryIntervalSecs,
};
use super::ids::ItemName;
use crate::queue::{Discipline, OverflowPolicy};

/// What kind of item a host is standing in for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Receives messages from the outside world.
    Service,
    /// Evaluates content-based routing rules; see [`crate::router::RouterHost`].
    Process,
    /// Delivers messages to a downstream system.
    Operation,
}

/// How a host's `submit` call behaves with respect to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagingPattern {
    /// `submit` returns once the envelope is enqueued.
    AsyncReliable,
    /// `submit` returns only once the downstream operation has transmitted
    /// and been acknowledged.
    SyncReliable,
    /// Hint to size the pool for parallelism; semantically `AsyncReliable`.
    ConcurrentAsync,
    /// Hint to size the pool for parallelism; semantically `SyncReliable`.
    ConcurrentSync,
}

/// When a host restarts itself after a worker/adapter fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Never restart; stay in `error` until an operator intervenes.
    Never,
    /// Restart only when the most recent stop was due to an error.
    OnFailure,
    /// Restart on any exit, clean or not.
    Always,
}

/// Which transport an item's adapter speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterType {
    /// HL7 v2 over MLLP, inbound.
    MllpInbound,
    /// HL7 v2 over MLLP, outbound.
    MllpOutbound,
    /// Directory-polling file ingestion.
    FileInbound,
    /// Directory-writing file delivery.
    FileOutbound,
    /// HTTP route registration.
    HttpInbound,
    /// HTTP POST delivery.
    HttpOutbound,
    /// No adapter; used by `process`-kind items (routers).
    None,
}

/// Typed adapter settings, keyed by [`AdapterType`].
///
/// Mirrors the authoritative option sets named in the external interfaces:
/// each variant carries exactly the fields that transport accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterSettings {
    /// `Port`, `Host`, `MaxConnections`, `ReadTimeout`, `AckMode`, …
    MllpInbound {
        /// TCP port to listen on.
        port: u16,
        /// Bind address; defaults to `0.0.0.0`.
        #[serde(default = "default_bind_host")]
        host: String,
        /// Maximum concurrent inbound connections.
        #[serde(default = "default_max_connections")]
        max_connections: usize,
        /// Seconds before an idle read is abandoned.
        #[serde(default = "default_read_timeout_secs")]
        read_timeout_secs: u64,
        /// When to emit an ACK and what `MSA-1` to report.
        #[serde(default)]
        ack_mode: AckMode,
        /// Item to forward structurally malformed messages to, if any.
        #[serde(default)]
        bad_message_handler: Option<ItemName>,
    },
    /// `IPAddress`, `Port`, timeouts, retry and reply-code-action settings.
    MllpOutbound {
        /// Remote host to connect to.
        ip_address: String,
        /// Remote port.
        port: u16,
        /// Connection attempt timeout.
        #[serde(default)]
        connect_timeout: ConnectTimeoutSecs,
        /// How long to wait for the remote ACK frame.
        #[serde(default)]
        ack_timeout: AckTimeoutSecs,
        /// Maximum send attempts before declaring fatal failure.
        #[serde(default)]
        max_retries: MaxSendRetries,
        /// Delay between send retries.
        #[serde(default)]
        retry_interval: RetryIntervalSecs,
        /// Ordered `pattern=action` pairs; see [`crate::adapter::mllp::ReplyCodeActions`].
        #[serde(default = "default_reply_code_actions")]
        reply_code_actions: String,
    },
    /// Directory to poll, how often, and where to archive processed files.
    FileInbound {
        /// Directory to poll for new files.
        directory: String,
        /// Poll interval in seconds.
        #[serde(default = "default_poll_interval_secs")]
        poll_interval_secs: u64,
        /// Directory to move processed files into.
        archive_directory: Option<String>,
        /// Glob pattern restricting which files are picked up.
        #[serde(default = "default_file_glob")]
        file_glob: String,
    },
    /// Directory and filename pattern to write delivered payloads into.
    FileOutbound {
        /// Directory to write files into.
        directory: String,
        /// Filename pattern; `{message_id}` is substituted.
        #[serde(default = "default_filename_pattern")]
        filename_pattern: String,
    },
    /// HTTP route prefix to register.
    HttpInbound {
        /// Port to bind.
        port: u16,
        /// Path prefix to register the route under.
        path: String,
    },
    /// URL and method to deliver payloads to.
    HttpOutbound {
        /// Destination URL.
        url: String,
        /// HTTP method; defaults to `POST`.
        #[serde(default = "default_http_method")]
        method: String,
        /// Content-Type header to send.
        #[serde(default = "default_http_content_type")]
        content_type: String,
    },
    /// No adapter.
    None,
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}
fn default_max_connections() -> usize {
    100
}
fn default_read_timeout_secs() -> u64 {
    30
}
fn default_reply_code_actions() -> String {
    ":*=S".to_string()
}
fn default_poll_interval_secs() -> u64 {
    5
}
fn default_file_glob() -> String {
    "*".to_string()
}
fn default_filename_pattern() -> String {
    "{message_id}.hl7".to_string()
}
fn default_http_method() -> String {
    "POST".to_string()
}
fn default_http_content_type() -> String {
    "application/octet-stream".to_string()
}

/// When an inbound MLLP adapter emits an ACK, and what it claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Always accept, no validation performed.
    #[default]
    Immediate,
    /// Accept only if application-level validation passes.
    Application,
    /// Never emit an ACK.
    Never,
}

/// Settings that govern a host's runtime behavior, independent of its
/// adapter's transport-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    /// Number of concurrent worker tasks.
    #[serde(default)]
    pub pool_size: PoolSize,
    /// Queue dequeue discipline.
    #[serde(default)]
    pub queue_discipline: Discipline,
    /// Queue capacity before the overflow policy engages.
    #[serde(default)]
    pub queue_capacity: QueueCapacity,
    /// What happens when the queue is full.
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    /// Restart behavior on worker/adapter fault.
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    /// Ceiling on restarts within the rolling window.
    #[serde(default)]
    pub max_restarts: MaxRestarts,
    /// Delay between restart attempts.
    #[serde(default)]
    pub restart_delay: RestartDelaySecs,
    /// How `submit` behaves with respect to its caller.
    #[serde(default = "default_messaging_pattern")]
    pub messaging_pattern: MessagingPattern,
    /// Default forwarding targets, used when no routing rule matches.
    #[serde(default)]
    pub target_names: Vec<ItemName>,
    /// How long a graceful stop waits for workers to drain.
    #[serde(default)]
    pub graceful_shutdown_timeout: GracefulShutdownTimeoutSecs,
}

fn default_messaging_pattern() -> MessagingPattern {
    MessagingPattern::AsyncReliable
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            pool_size: PoolSize::default(),
            queue_discipline: Discipline::default(),
            queue_capacity: QueueCapacity::default(),
            overflow_policy: OverflowPolicy::default(),
            restart_policy: RestartPolicy::OnFailure,
            max_restarts: MaxRestarts::default(),
            restart_delay: RestartDelaySecs::default(),
            messaging_pattern: MessagingPattern::AsyncReliable,
            target_names: Vec::new(),
            graceful_shutdown_timeout: GracefulShutdownTimeoutSecs::default(),
        }
    }
}

/// Fully determines how to build one host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemConfig {
    /// Unique within a production.
    pub name: ItemName,
    /// Service, process, or operation.
    pub kind: ItemKind,
    /// Which transport, if any.
    pub adapter_type: AdapterType,
    /// Transport-specific settings.
    pub adapter_settings: AdapterSettings,
    /// Runtime behavior settings.
    #[serde(default)]
    pub host_settings: HostSettings,
    /// Whether the engine should start this item at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Free-form properties surfaced to adapters/handlers that need them.
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

/// Errors raised validating an [`ItemConfig`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ItemConfigError {
    /// A process-kind item was given a non-`None` adapter type.
    #[error("process item '{0}' must not declare an adapter")]
    ProcessHasAdapter(ItemName),
    /// A service/operation item was given `AdapterType::None`.
    #[error("{0:?} item '{1}' must declare an adapter")]
    MissingAdapter(ItemKind, ItemName),
    /// The declared `adapter_type` and the `adapter_settings` variant disagree.
    #[error("item '{0}' adapter_type does not match adapter_settings variant")]
    AdapterMismatch(ItemName),
}

impl ItemConfig {
    /// Validates cross-field invariants not expressible through types alone.
    pub fn validate(&self) -> Result<(), ItemConfigError> {
        match (self.kind, &self.adapter_type) {
            (ItemKind::Process, AdapterType::None) => {}
            (ItemKind::Process, _) => {
                return Err(ItemConfigError::ProcessHasAdapter(self.name.clone()));
            }
            (ItemKind::Service | ItemKind::Operation, AdapterType::None) => {
                return Err(ItemConfigError::MissingAdapter(self.kind, self.name.clone()));
            }
            _ => {}
        }
        let matches = matches!(
            (&self.adapter_type, &self.adapter_settings),
            (AdapterType::MllpInbound, AdapterSettings::MllpInbound { .. })
                | (AdapterType::MllpOutbound, AdapterSettings::MllpOutbound { .. })
                | (AdapterType::FileInbound, AdapterSettings::FileInbound { .. })
                | (AdapterType::FileOutbound, AdapterSettings::FileOutbound { .. })
                | (AdapterType::HttpInbound, AdapterSettings::HttpInbound { .. })
                | (AdapterType::HttpOutbound, AdapterSettings::HttpOutbound { .. })
                | (AdapterType::None, AdapterSettings::None)
        );
        if !matches {
            return Err(ItemConfigError::AdapterMismatch(self.name.clone()));
        }
        Ok(())
    }
}
