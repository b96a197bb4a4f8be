//! File adapters: directory-polling ingestion and atomic-rename delivery.
//!
//! Grounded on the teacher's `server.rs` graceful-shutdown shape (a
//! `CancellationToken` raced against a loop via `tokio::select!`) for the
//! inbound poller, and on [`crate::adapter::mllp::inbound`] for the
//! trace-header/submit sequencing an ingress pump follows.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::adapter::{AdapterError, OutboundAdapter, OutboundOutcome};
use crate::domain::{Direction, HeaderStatus, MessageEnvelope, MessageHeader};
use crate::host::Host;
use crate::trace_store::{TraceStore, TraceWriter};

const CONTENT_TYPE: &str = "application/octet-stream";

/// Static configuration a [`FileInboundAdapter`] polls with.
#[derive(Debug, Clone)]
pub struct FileInboundConfig {
    /// Directory to poll for new files.
    pub directory: PathBuf,
    /// How often to list `directory`.
    pub poll_interval: Duration,
    /// Directory to move claimed files into once processing completes.
    pub archive_directory: Option<PathBuf>,
    /// Glob pattern restricting which entries are picked up.
    pub file_glob: String,
}

/// Polls a directory, claims each matching file by renaming it in place, and
/// submits one envelope per file to the owning item's [`Host`].
pub struct FileInboundAdapter {
    config: FileInboundConfig,
    target: Arc<Host>,
    trace_store: Arc<dyn TraceStore>,
    trace_writer: Arc<TraceWriter>,
    project_id: String,
    item_name: String,
}

impl FileInboundAdapter {
    /// Builds an adapter bound to `target`'s queue.
    #[must_use]
    pub fn new(
        config: FileInboundConfig,
        target: Arc<Host>,
        trace_store: Arc<dyn TraceStore>,
        trace_writer: Arc<TraceWriter>,
        project_id: impl Into<String>,
        item_name: impl Into<String>,
    ) -> Self {
        Self {
            config,
            target,
            trace_store,
            trace_writer,
            project_id: project_id.into(),
            item_name: item_name.into(),
        }
    }

    /// Polls `directory` until `cancel` fires, claiming and forwarding one
    /// file per pass in filesystem-listing order.
    ///
    /// Signals `ready` with the outcome of creating `directory` before
    /// entering the poll loop, so the caller can surface a setup failure
    /// synchronously instead of only discovering it in a background task's
    /// logs.
    #[instrument(skip(self, cancel, ready), fields(item_name = %self.item_name, directory = %self.config.directory.display()))]
    pub async fn serve(
        self: Arc<Self>,
        cancel: CancellationToken,
        ready: tokio::sync::oneshot::Sender<Result<(), AdapterError>>,
    ) -> Result<(), AdapterError> {
        if let Err(err) = tokio::fs::create_dir_all(&self.config.directory).await {
            let message = err.to_string();
            let _ = ready.send(Err(AdapterError::StartFailed(message.clone())));
            return Err(AdapterError::StartFailed(message));
        }
        let _ = ready.send(Ok(()));
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("file inbound polling");
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("file inbound shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }
    }

    async fn poll_once(&self) {
        let mut entries = match tokio::fs::read_dir(&self.config.directory).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(error = %err, "failed to list poll directory");
                return;
            }
        };
        let mut names = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if entry.path().is_file() && glob_match(&self.config.file_glob, &name) {
                        names.push(name);
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "failed to read directory entry");
                    break;
                }
            }
        }
        names.sort();
        for name in names {
            self.claim_and_submit(&name).await;
        }
    }

    async fn claim_and_submit(&self, name: &str) {
        let source = self.config.directory.join(name);
        let claimed = self.config.directory.join(format!("{name}.claiming"));
        if tokio::fs::rename(&source, &claimed).await.is_err() {
            // Another poll (or a concurrent process) already claimed it.
            return;
        }
        let raw_payload = match tokio::fs::read(&claimed).await {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(error = %err, file = name, "failed to read claimed file");
                return;
            }
        };

        let body_id = match self.trace_store.store_body(&raw_payload, CONTENT_TYPE, "1.0").await {
            Ok(id) => id,
            Err(err) => {
                error!(error = %err, "failed to persist inbound file body");
                return;
            }
        };
        let mut header = MessageHeader::new_pending(
            &self.project_id,
            &self.item_name,
            "service",
            Direction::Inbound,
            None,
            body_id,
            "Raw",
        );
        header.destination_item = Some(self.item_name.clone());
        let header_id = header.header_id;
        self.trace_writer.record_header(header);

        let mut envelope = MessageEnvelope::new_inbound(CONTENT_TYPE, "1.0", raw_payload);
        envelope.destination_host = Some(self.item_name.clone());
        match self.target.submit(envelope).await {
            Ok(()) => {
                self.trace_writer.finish_header(header_id, HeaderStatus::Completed, None, None);
            }
            Err(err) => {
                self.trace_writer
                    .finish_header(header_id, HeaderStatus::Error, Some(err.to_string()), None);
                return;
            }
        }

        self.archive(&claimed, name).await;
    }

    async fn archive(&self, claimed: &Path, name: &str) {
        match &self.config.archive_directory {
            Some(archive_dir) => {
                if let Err(err) = tokio::fs::create_dir_all(archive_dir).await {
                    warn!(error = %err, "failed to create archive directory");
                    return;
                }
                let destination = archive_dir.join(name);
                if let Err(err) = tokio::fs::rename(claimed, &destination).await {
                    warn!(error = %err, "failed to archive processed file");
                }
            }
            None => {
                if let Err(err) = tokio::fs::remove_file(claimed).await {
                    warn!(error = %err, "failed to remove claimed file with no archive configured");
                }
            }
        }
    }
}

/// Matches a single-wildcard glob (`*` anywhere once, or no wildcard at all)
/// against a filename; the authoritative option set's `file_glob` setting
/// never needs more than this.
fn glob_match(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == name,
        Some((prefix, suffix)) => {
            name.len() >= prefix.len() + suffix.len()
                && name.starts_with(prefix)
                && name.ends_with(suffix)
        }
    }
}

/// Writes each envelope's `raw_payload` to `<directory>/<message_id><extension>`
/// via a temp file plus atomic rename.
pub struct FileOutboundAdapter {
    directory: PathBuf,
    filename_pattern: String,
}

impl FileOutboundAdapter {
    /// Builds an adapter that writes into `directory` using `filename_pattern`,
    /// where the literal `{message_id}` is substituted per delivery.
    #[must_use]
    pub fn new(directory: PathBuf, filename_pattern: String) -> Self {
        Self {
            directory,
            filename_pattern,
        }
    }
}

#[async_trait]
impl OutboundAdapter for FileOutboundAdapter {
    #[instrument(skip(self, envelope), fields(message_id = %envelope.message_id))]
    async fn send(&self, envelope: &MessageEnvelope) -> Result<OutboundOutcome, AdapterError> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|err| AdapterError::Fatal(format!("cannot create output directory: {err}")))?;
        let filename = self
            .filename_pattern
            .replace("{message_id}", &envelope.message_id.to_string());
        let destination = self.directory.join(&filename);
        let temp = self.directory.join(format!(".{filename}.tmp"));
        tokio::fs::write(&temp, &envelope.raw_payload)
            .await
            .map_err(|err| AdapterError::Transient(format!("write failed: {err}")))?;
        tokio::fs::rename(&temp, &destination)
            .await
            .map_err(|err| AdapterError::Transient(format!("rename failed: {err}")))?;
        debug!(path = %destination.display(), "wrote outbound file");
        Ok(OutboundOutcome::success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_suffix_wildcard() {
        assert!(glob_match("*.hl7", "msg1.hl7"));
        assert!(!glob_match("*.hl7", "msg1.txt"));
    }

    #[test]
    fn glob_star_alone_matches_everything() {
        assert!(glob_match("*", "anything.dat"));
    }

    #[test]
    fn glob_without_wildcard_is_exact() {
        assert!(glob_match("exact.txt", "exact.txt"));
        assert!(!glob_match("exact.txt", "other.txt"));
    }

    #[tokio::test]
    async fn outbound_writes_file_named_by_message_id() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FileOutboundAdapter::new(dir.path().to_path_buf(), "{message_id}.hl7".to_string());
        let envelope = MessageEnvelope::new_inbound("application/octet-stream", "1.0", b"hello".to_vec());
        adapter.send(&envelope).await.unwrap();
        let expected = dir.path().join(format!("{}.hl7", envelope.message_id));
        assert_eq!(tokio::fs::read(expected).await.unwrap(), b"hello");
    }
}
