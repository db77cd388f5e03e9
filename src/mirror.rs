use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use crate::error::SyncError;
use crate::resource::Resource;
use crate::store::SqliteStore;

/// Persistent id → resource cache used for offline reads.
///
/// Entries are only ever overwritten or explicitly deleted; nothing expires.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Resource>, SyncError>;
    /// Every entry, ordered by id.
    async fn get_all(&self) -> Result<Vec<Resource>, SyncError>;
    /// Insert or overwrite the entry for `resource.id()`.
    async fn put(&self, resource: &Resource) -> Result<(), SyncError>;
    /// Remove an entry. Removing an absent id is not an error.
    async fn delete(&self, id: &str) -> Result<(), SyncError>;
    async fn clear(&self) -> Result<(), SyncError>;
}

impl SqliteStore {
    pub fn mirror_get(&self, id: &str) -> Result<Option<Resource>, SyncError> {
        let body: Option<String> = self
            .conn()
            .query_row(
                "SELECT body FROM mirror_entries WHERE id=?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        body.map(|raw| decode(&raw)).transpose()
    }

    pub fn mirror_get_all(&self) -> Result<Vec<Resource>, SyncError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT body FROM mirror_entries ORDER BY id ASC")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;

        let mut out = Vec::new();
        for raw in rows {
            out.push(decode(&raw?)?);
        }
        Ok(out)
    }

    pub fn mirror_put(&self, resource: &Resource) -> Result<(), SyncError> {
        if resource.id().is_empty() {
            return Err(SyncError::State("cannot mirror a resource without id"));
        }
        let body = serde_json::to_string(resource)?;
        self.conn().execute(
            "INSERT INTO mirror_entries(id, body, mirrored_ms) VALUES(?1, ?2, ?3)
ON CONFLICT(id) DO UPDATE SET body=excluded.body, mirrored_ms=excluded.mirrored_ms",
            params![resource.id(), body, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    pub fn mirror_delete(&self, id: &str) -> Result<(), SyncError> {
        self.conn()
            .execute("DELETE FROM mirror_entries WHERE id=?1", params![id])?;
        Ok(())
    }

    pub fn mirror_clear(&self) -> Result<(), SyncError> {
        self.conn().execute("DELETE FROM mirror_entries", [])?;
        Ok(())
    }
}

fn decode(raw: &str) -> Result<Resource, SyncError> {
    Resource::from_value(serde_json::from_str(raw)?)
}

#[async_trait]
impl MirrorStore for SqliteStore {
    async fn get(&self, id: &str) -> Result<Option<Resource>, SyncError> {
        self.mirror_get(id)
    }

    async fn get_all(&self) -> Result<Vec<Resource>, SyncError> {
        self.mirror_get_all()
    }

    async fn put(&self, resource: &Resource) -> Result<(), SyncError> {
        tracing::trace!(id = resource.id(), "mirroring resource");
        self.mirror_put(resource)
    }

    async fn delete(&self, id: &str) -> Result<(), SyncError> {
        self.mirror_delete(id)
    }

    async fn clear(&self) -> Result<(), SyncError> {
        self.mirror_clear()
    }
}
