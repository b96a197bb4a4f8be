//! `SQLite`-backed [`TraceStore`].
//!
//! Grounded on `database.rs`'s functional-core/imperative-shell split for
//! connection setup (`DatabaseConfig`/`DatabaseConnection`) and on
//! `storage/message_storage.rs`'s SQL-as-`const` plus row-parsing-helper
//! style.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::domain::{BodyId, Direction, HeaderId, HeaderStatus, MessageBody, MessageHeader, SessionId};
use crate::hl7;

use super::{HeaderFilter, TraceError, TraceStore};

const INSERT_BODY: &str = r"
INSERT INTO message_bodies (
    body_id, checksum, content_type, schema_version, size_bytes, raw_payload,
    hl7_message_type, hl7_sending_facility
) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT (checksum, content_type, schema_version) DO NOTHING;
";

const SELECT_BODY_ID_BY_KEY: &str = r"
SELECT body_id FROM message_bodies WHERE checksum = ? AND content_type = ? AND schema_version = ?;
";

const SELECT_BODY_BY_ID: &str = r"
SELECT body_id, checksum, content_type, schema_version, size_bytes, raw_payload,
       hl7_message_type, hl7_sending_facility
FROM message_bodies WHERE body_id = ?;
";

const INSERT_HEADER: &str = r"
INSERT INTO message_headers (
    header_id, session_id, project_id, item_name, item_kind, direction, status,
    source_item, destination_item, received_at, completed_at, latency_ms,
    body_id, body_class_name, ack_body_id, error_message
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
";

const UPDATE_HEADER_STATUS: &str = r"
UPDATE message_headers
SET status = ?, error_message = ?, ack_body_id = COALESCE(?, ack_body_id),
    completed_at = ?, latency_ms = ?
WHERE header_id = ?;
";

const SELECT_RECEIVED_AT: &str = "SELECT received_at FROM message_headers WHERE header_id = ?;";

const SELECT_HEADERS_BASE: &str = r"
SELECT header_id, session_id, project_id, item_name, item_kind, direction, status,
       source_item, destination_item, received_at, completed_at, latency_ms,
       body_id, body_class_name, ack_body_id, error_message
FROM message_headers
";

const UPDATE_SESSION_ID: &str = "UPDATE message_headers SET session_id = ? WHERE header_id = ?;";

const SELECT_UNASSIGNED: &str = r"
SELECT header_id, session_id, project_id, item_name, item_kind, direction, status,
       source_item, destination_item, received_at, completed_at, latency_ms,
       body_id, body_class_name, ack_body_id, error_message
FROM message_headers
WHERE session_id IS NULL
ORDER BY received_at ASC
LIMIT ?;
";

/// `SQLite`-backed [`TraceStore`], built on the `message_headers`/
/// `message_bodies` schema in `migrations/0001_init.sql`.
pub struct SqliteTraceStore {
    pool: SqlitePool,
}

impl SqliteTraceStore {
    /// Opens (creating if missing) the database at `path` and runs pending
    /// migrations.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::Backend`] if the file cannot be opened or a
    /// migration fails.
    pub async fn open(path: &Path) -> Result<Self, TraceError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| TraceError::Backend(err.to_string()))?;
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|err| TraceError::Backend(err.to_string()))?
            .create_if_missing(true)
            .pragma("journal_mode", "WAL")
            .pragma("foreign_keys", "ON");
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|err| TraceError::Backend(err.to_string()))?;
        sqlx::migrate!()
            .run(&pool)
            .await
            .map_err(|err| TraceError::Backend(err.to_string()))?;
        info!(path = %path.display(), "trace store opened");
        Ok(Self { pool })
    }

    /// Wraps an already-configured pool, for tests that share an in-memory
    /// database across connections.
    #[must_use]
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn direction_str(d: Direction) -> &'static str {
    match d {
        Direction::Inbound => "inbound",
        Direction::Outbound => "outbound",
    }
}

fn parse_direction(s: &str) -> Direction {
    match s {
        "outbound" => Direction::Outbound,
        _ => Direction::Inbound,
    }
}

fn status_str(s: HeaderStatus) -> &'static str {
    match s {
        HeaderStatus::Pending => "pending",
        HeaderStatus::Completed => "completed",
        HeaderStatus::Sent => "sent",
        HeaderStatus::Failed => "failed",
        HeaderStatus::Error => "error",
        HeaderStatus::NoMatch => "no_match",
    }
}

fn parse_status(s: &str) -> HeaderStatus {
    match s {
        "completed" => HeaderStatus::Completed,
        "sent" => HeaderStatus::Sent,
        "failed" => HeaderStatus::Failed,
        "error" => HeaderStatus::Error,
        "no_match" => HeaderStatus::NoMatch,
        _ => HeaderStatus::Pending,
    }
}

fn row_to_header(row: &sqlx::sqlite::SqliteRow) -> Result<MessageHeader, TraceError> {
    let parse_uuid = |s: &str| Uuid::parse_str(s).map_err(|e| TraceError::Backend(e.to_string()));
    let header_id: String = row.try_get("header_id").map_err(sqlx_err)?;
    let session_id: Option<String> = row.try_get("session_id").map_err(sqlx_err)?;
    let body_id: String = row.try_get("body_id").map_err(sqlx_err)?;
    let ack_body_id: Option<String> = row.try_get("ack_body_id").map_err(sqlx_err)?;
    Ok(MessageHeader {
        header_id: HeaderId::from(parse_uuid(&header_id)?),
        session_id: session_id.map(|s| parse_uuid(&s)).transpose()?.map(SessionId::from),
        project_id: row.try_get("project_id").map_err(sqlx_err)?,
        item_name: row.try_get("item_name").map_err(sqlx_err)?,
        item_kind: row.try_get("item_kind").map_err(sqlx_err)?,
        direction: parse_direction(&row.try_get::<String, _>("direction").map_err(sqlx_err)?),
        status: parse_status(&row.try_get::<String, _>("status").map_err(sqlx_err)?),
        source_item: row.try_get("source_item").map_err(sqlx_err)?,
        destination_item: row.try_get("destination_item").map_err(sqlx_err)?,
        received_at: crate::domain::trace::chrono_like::Timestamp(row.try_get("received_at").map_err(sqlx_err)?),
        completed_at: row
            .try_get::<Option<i64>, _>("completed_at")
            .map_err(sqlx_err)?
            .map(crate::domain::trace::chrono_like::Timestamp),
        latency_ms: row.try_get("latency_ms").map_err(sqlx_err)?,
        body_id: BodyId::from(parse_uuid(&body_id)?),
        body_class_name: row.try_get("body_class_name").map_err(sqlx_err)?,
        ack_body_id: ack_body_id.map(|s| parse_uuid(&s)).transpose()?.map(BodyId::from),
        error_message: row.try_get("error_message").map_err(sqlx_err)?,
    })
}

fn sqlx_err(err: sqlx::Error) -> TraceError {
    TraceError::Backend(err.to_string())
}

#[async_trait]
impl TraceStore for SqliteTraceStore {
    async fn store_body(
        &self,
        raw_payload: &[u8],
        content_type: &str,
        schema_version: &str,
    ) -> Result<BodyId, TraceError> {
        let checksum = MessageBody::checksum_of(raw_payload);
        let view = hl7::parse(raw_payload);
        let body_id = BodyId::generate();
        sqlx::query(INSERT_BODY)
            .bind(body_id.to_string())
            .bind(&checksum)
            .bind(content_type)
            .bind(schema_version)
            .bind(i64::try_from(raw_payload.len()).unwrap_or(i64::MAX))
            .bind(raw_payload)
            .bind(hl7::message_type(&view))
            .bind(hl7::sending_facility(&view))
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        let existing: String = sqlx::query(SELECT_BODY_ID_BY_KEY)
            .bind(&checksum)
            .bind(content_type)
            .bind(schema_version)
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_err)?
            .try_get("body_id")
            .map_err(sqlx_err)?;
        Ok(BodyId::from(Uuid::parse_str(&existing).map_err(|e| TraceError::Backend(e.to_string()))?))
    }

    async fn store_header(&self, header: MessageHeader) -> Result<(), TraceError> {
        sqlx::query(INSERT_HEADER)
            .bind(header.header_id.to_string())
            .bind(header.session_id.map(|s| s.to_string()))
            .bind(&header.project_id)
            .bind(&header.item_name)
            .bind(&header.item_kind)
            .bind(direction_str(header.direction))
            .bind(status_str(header.status))
            .bind(&header.source_item)
            .bind(&header.destination_item)
            .bind(header.received_at.0)
            .bind(header.completed_at.map(|t| t.0))
            .bind(header.latency_ms)
            .bind(header.body_id.to_string())
            .bind(&header.body_class_name)
            .bind(header.ack_body_id.map(|b| b.to_string()))
            .bind(&header.error_message)
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }

    async fn update_header_status(
        &self,
        header_id: HeaderId,
        status: HeaderStatus,
        error_message: Option<String>,
        ack_body_id: Option<BodyId>,
    ) -> Result<(), TraceError> {
        let received_at: i64 = sqlx::query(SELECT_RECEIVED_AT)
            .bind(header_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?
            .ok_or(TraceError::HeaderNotFound(header_id))?
            .try_get("received_at")
            .map_err(sqlx_err)?;
        let now = crate::domain::trace::chrono_like::Timestamp::now();
        let latency_ms = crate::domain::trace::chrono_like::Timestamp(received_at).elapsed_ms_until(now);
        sqlx::query(UPDATE_HEADER_STATUS)
            .bind(status_str(status))
            .bind(error_message)
            .bind(ack_body_id.map(|b| b.to_string()))
            .bind(now.0)
            .bind(latency_ms)
            .bind(header_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }

    async fn list_headers(&self, filter: HeaderFilter) -> Result<Vec<MessageHeader>, TraceError> {
        let mut sql = SELECT_HEADERS_BASE.to_string();
        let mut clauses = Vec::new();
        if filter.project_id.is_some() {
            clauses.push("project_id = ?".to_string());
        }
        if filter.session_id.is_some() {
            clauses.push("session_id = ?".to_string());
        }
        if filter.item_name.is_some() {
            clauses.push("item_name = ?".to_string());
        }
        if filter.status.is_some() {
            clauses.push("status = ?".to_string());
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY received_at DESC");
        if filter.limit > 0 {
            sql.push_str(" LIMIT ?");
        }
        let mut query = sqlx::query(&sql);
        if let Some(project_id) = &filter.project_id {
            query = query.bind(project_id);
        }
        if let Some(session_id) = filter.session_id {
            query = query.bind(session_id.to_string());
        }
        if let Some(item_name) = &filter.item_name {
            query = query.bind(item_name);
        }
        if let Some(status) = filter.status {
            query = query.bind(status_str(status));
        }
        if filter.limit > 0 {
            query = query.bind(i64::from(filter.limit));
        }
        let rows = query.fetch_all(&self.pool).await.map_err(sqlx_err)?;
        rows.iter().map(row_to_header).collect()
    }

    async fn get_body(&self, body_id: BodyId) -> Result<Option<MessageBody>, TraceError> {
        let row = sqlx::query(SELECT_BODY_BY_ID)
            .bind(body_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(MessageBody {
            body_id,
            checksum: row.try_get("checksum").map_err(sqlx_err)?,
            content_type: row.try_get("content_type").map_err(sqlx_err)?,
            schema_version: row.try_get("schema_version").map_err(sqlx_err)?,
            size_bytes: row.try_get("size_bytes").map_err(sqlx_err)?,
            raw_payload: row.try_get("raw_payload").map_err(sqlx_err)?,
            hl7_message_type: row.try_get("hl7_message_type").map_err(sqlx_err)?,
            hl7_sending_facility: row.try_get("hl7_sending_facility").map_err(sqlx_err)?,
        }))
    }

    async fn assign_session(
        &self,
        header_ids: &[HeaderId],
        session_id: SessionId,
    ) -> Result<(), TraceError> {
        for id in header_ids {
            sqlx::query(UPDATE_SESSION_ID)
                .bind(session_id.to_string())
                .bind(id.to_string())
                .execute(&self.pool)
                .await
                .map_err(sqlx_err)?;
        }
        Ok(())
    }

    async fn list_unassigned(&self, limit: u32) -> Result<Vec<MessageHeader>, TraceError> {
        let rows = sqlx::query(SELECT_UNASSIGNED)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_err)?;
        rows.iter().map(row_to_header).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Direction;

    async fn test_store() -> SqliteTraceStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!().run(&pool).await.unwrap();
        SqliteTraceStore::from_pool(pool)
    }

    #[tokio::test]
    async fn store_body_dedups_by_checksum() {
        let store = test_store().await;
        let a = store.store_body(b"hi", "application/octet-stream", "1.0").await.unwrap();
        let b = store.store_body(b"hi", "application/octet-stream", "1.0").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn header_round_trips_through_store_and_list() {
        let store = test_store().await;
        let body_id = store.store_body(b"hi", "application/octet-stream", "1.0").await.unwrap();
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
        assert!(headers[0].latency_ms.is_some());
    }

    #[tokio::test]
    async fn update_missing_header_errors() {
        let store = test_store().await;
        let err = store
            .update_header_status(HeaderId::generate(), HeaderStatus::Completed, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TraceError::HeaderNotFound(_)));
    }
}
