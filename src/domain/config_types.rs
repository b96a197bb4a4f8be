//! Validated numeric/string settings shared by host, queue and adapter config.
//!
//! Mirrors the teacher's `message_router/domain_types.rs` pattern: every
//! tunable is a bounded `nutype` with a sane default rather than a bare
//! primitive, so an out-of-range value is rejected at config build time
//! instead of surfacing as a confusing runtime error later.

use nutype::nutype;

/// Number of worker tasks a host runs concurrently.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 256),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 1
)]
pub struct PoolSize(usize);

impl PoolSize {
    /// Value as `usize`, for sizing a worker `Vec`/`JoinSet`.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Maximum number of buffered envelopes in a host's [`crate::queue::BoundedQueue`].
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 1000
)]
pub struct QueueCapacity(usize);

impl QueueCapacity {
    /// Value as `usize`, for sizing the underlying channel/deque.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Seconds to wait between restart attempts under `on_failure`/`always`.
#[nutype(
    validate(greater_or_equal = 0, less_or_equal = 3600),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 10
)]
pub struct RestartDelaySecs(u64);

impl RestartDelaySecs {
    /// Value as a [`std::time::Duration`].
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.into_inner())
    }
}

/// Ceiling on restart attempts within the rolling restart window.
///
/// `-1` means unlimited, matching the authoritative option set's
/// `MaxRestarts` default of `100` with `-1` reserved for "never give up".
#[nutype(
    validate(greater_or_equal = -1),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 100
)]
pub struct MaxRestarts(i64);

impl MaxRestarts {
    /// True if this ceiling permits unlimited restarts.
    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.into_inner() < 0
    }
}

/// Seconds a graceful stop waits for workers to drain before cancelling them.
#[nutype(
    validate(greater_or_equal = 0, less_or_equal = 3600),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 30
)]
pub struct GracefulShutdownTimeoutSecs(u64);

impl GracefulShutdownTimeoutSecs {
    /// Value as a [`std::time::Duration`].
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.into_inner())
    }
}

/// Seconds an MLLP outbound connection attempt is allowed to take.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 600),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 10
)]
pub struct ConnectTimeoutSecs(u64);

impl ConnectTimeoutSecs {
    /// Value as a [`std::time::Duration`].
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.into_inner())
    }
}

/// Seconds an MLLP outbound send waits for the remote ACK frame.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 600),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 30
)]
pub struct AckTimeoutSecs(u64);

impl AckTimeoutSecs {
    /// Value as a [`std::time::Duration`].
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.into_inner())
    }
}

/// Maximum send attempts for one envelope on an outbound adapter.
#[nutype(
    validate(greater_or_equal = 0, less_or_equal = 100),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 3
)]
pub struct MaxSendRetries(u32);

impl MaxSendRetries {
    /// Value as `u32`.
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.into_inner()
    }
}

/// Seconds to wait between outbound send retries.
#[nutype(
    validate(greater_or_equal = 0, less_or_equal = 3600),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 5
)]
pub struct RetryIntervalSecs(u64);

impl RetryIntervalSecs {
    /// Value as a [`std::time::Duration`].
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.into_inner())
    }
}

/// Routing priority, 0 = highest, 9 = lowest, matching the wire contract.
#[nutype(
    validate(greater_or_equal = 0, less_or_equal = 9),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 5
)]
pub struct Priority(u8);

impl Priority {
    /// Value as `u8`.
    #[must_use]
    pub fn as_u8(&self) -> u8 {
        self.into_inner()
    }
}
