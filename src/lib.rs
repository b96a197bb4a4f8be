//! # `hub_engine`
//!
//! Runtime engine for a configurable healthcare message-integration bus,
//! modeled on the InterSystems-style Production/Service/Process/Operation
//! pattern and specialized for HL7 v2 over MLLP (plus symmetric File and
//! HTTP transports).
//!
//! A *production* is a running graph of independently configured *items*:
//! *services* receive messages from the outside world, *processes*
//! (routers) evaluate content-based routing rules, and *operations*
//! deliver messages to downstream systems. This crate covers exactly the
//! runtime core: item lifecycle and worker pools, bounded per-item queues,
//! MLLP framing and ACK generation, the rule-evaluated router, the per-leg
//! trace store, and the hot-reload deployment protocol that wires a
//! configuration snapshot into a live graph of hosts.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use hub_engine::engine::Engine;
//! use hub_engine::trace_store::TraceStore;
//! use hub_engine::trace_store::memory::MemoryTraceStore;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = MemoryTraceStore::new() as Arc<dyn TraceStore>;
//! let engine = Engine::new(store, Duration::from_secs(30));
//! // engine.deploy("clinic-a", snapshot).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`domain`] — the engine's vocabulary (envelopes, item configuration,
//!   routing rules, trace records): plain data, no I/O.
//! - [`queue`] — the bounded, discipline-configurable work buffer each host
//!   owns.
//! - [`host`] — the lifecycle unit: worker pool, restart supervisor,
//!   `submit` entry point.
//! - [`adapter`] — MLLP/File/HTTP I/O endpoints a service or operation host
//!   wraps.
//! - [`router`] — the content-based router (`RouterHost`) and its
//!   HL7-field/IRIS-path condition language.
//! - [`trace_store`] — the append-only per-leg header/body trace log.
//! - [`engine`] — the orchestrator: deploy/start/stop/reload/status over a
//!   production's hosts.
//! - [`hl7`] — the minimal ER7 parser routing conditions and MLLP ACK
//!   generation read fields through.

pub mod adapter;
pub mod config;
pub mod domain;
pub mod engine;
pub mod hl7;
pub mod host;
pub mod queue;
pub mod router;
pub mod server;
pub mod trace_store;

// Re-exported so downstream crates wiring a production together don't need
// their own direct dependency on these for the common cases.
pub use ::tracing::{debug, error, info, instrument, warn};
pub use serde::{Deserialize, Serialize};
pub use std::collections::HashMap;
pub use std::time::Duration;
pub use thiserror::Error;
pub use uuid::Uuid;
