use async_trait::async_trait;
use chrono::Utc;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;
use crate::resource::ID_FIELD;
use crate::store::SqliteStore;

/// Mutation kind recorded while offline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Create,
    Update,
    Delete,
}

impl OpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Create => "CREATE",
            OpKind::Update => "UPDATE",
            OpKind::Delete => "DELETE",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATE" => Some(OpKind::Create),
            "UPDATE" => Some(OpKind::Update),
            "DELETE" => Some(OpKind::Delete),
            _ => None,
        }
    }
}

/// A mutation intent waiting to be replayed against the remote service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    /// Unique per queue.
    pub id: String,
    pub operation: OpKind,
    /// Resource the operation applies to; a temporary id for offline creates.
    pub target_id: String,
    pub payload: Value,
    /// Milliseconds since the epoch; replay order.
    pub timestamp: i64,
}

impl PendingOperation {
    pub fn new(operation: OpKind, target_id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation,
            target_id: target_id.into(),
            payload,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Durable, ordered log of offline mutations.
#[async_trait]
pub trait PendingQueue: Send + Sync {
    async fn add(&self, op: &PendingOperation) -> Result<(), SyncError>;
    /// Every entry by ascending timestamp; equal timestamps keep insertion order.
    async fn get_all(&self) -> Result<Vec<PendingOperation>, SyncError>;
    async fn remove(&self, op_id: &str) -> Result<(), SyncError>;
    async fn len(&self) -> Result<usize, SyncError>;
    /// Point every entry targeting `old_id` at `new_id`, payload `id` included.
    /// Returns the number of rewritten entries.
    async fn retarget(&self, old_id: &str, new_id: &str) -> Result<usize, SyncError>;
}

impl SqliteStore {
    pub fn queue_add(&self, op: &PendingOperation) -> Result<(), SyncError> {
        let payload = serde_json::to_string(&op.payload)?;
        self.conn().execute(
            "INSERT INTO pending_ops(op_id, op_type, target_id, payload, timestamp_ms)
VALUES (?1, ?2, ?3, ?4, ?5)",
            params![op.id, op.operation.as_str(), op.target_id, payload, op.timestamp],
        )?;
        Ok(())
    }

    pub fn queue_get_all(&self) -> Result<Vec<PendingOperation>, SyncError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT op_id, op_type, target_id, payload, timestamp_ms
FROM pending_ops
ORDER BY timestamp_ms ASC, seq ASC",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, i64>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, op_type, target_id, payload, timestamp) = row?;
            let operation =
                OpKind::parse(&op_type).ok_or(SyncError::State("unknown op_type in pending_ops"))?;
            out.push(PendingOperation {
                id,
                operation,
                target_id,
                payload: serde_json::from_str(&payload)?,
                timestamp,
            });
        }
        Ok(out)
    }

    pub fn queue_remove(&self, op_id: &str) -> Result<(), SyncError> {
        self.conn()
            .execute("DELETE FROM pending_ops WHERE op_id=?1", params![op_id])?;
        Ok(())
    }

    pub fn queue_len(&self) -> Result<usize, SyncError> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM pending_ops", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    pub fn queue_retarget(&self, old_id: &str, new_id: &str) -> Result<usize, SyncError> {
        self.with_tx(|tx| {
            let mut stmt =
                tx.prepare("SELECT seq, payload FROM pending_ops WHERE target_id=?1")?;
            let rows = stmt
                .query_map(params![old_id], |r| {
                    Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            for (seq, raw) in &rows {
                let mut payload: Value = serde_json::from_str(raw)?;
                if let Some(obj) = payload.as_object_mut() {
                    if obj.contains_key(ID_FIELD) {
                        obj.insert(ID_FIELD.to_string(), Value::String(new_id.to_string()));
                    }
                }
                tx.execute(
                    "UPDATE pending_ops SET target_id=?1, payload=?2 WHERE seq=?3",
                    params![new_id, payload.to_string(), seq],
                )?;
            }
            Ok(rows.len())
        })
    }
}

#[async_trait]
impl PendingQueue for SqliteStore {
    async fn add(&self, op: &PendingOperation) -> Result<(), SyncError> {
        tracing::debug!(op_id = %op.id, kind = op.operation.as_str(), target_id = %op.target_id, "queueing offline operation");
        self.queue_add(op)
    }

    async fn get_all(&self) -> Result<Vec<PendingOperation>, SyncError> {
        self.queue_get_all()
    }

    async fn remove(&self, op_id: &str) -> Result<(), SyncError> {
        self.queue_remove(op_id)
    }

    async fn len(&self) -> Result<usize, SyncError> {
        self.queue_len()
    }

    async fn retarget(&self, old_id: &str, new_id: &str) -> Result<usize, SyncError> {
        self.queue_retarget(old_id, new_id)
    }
}
