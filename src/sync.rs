use std::collections::HashMap;

use crate::error::SyncError;
use crate::merge::strip_id;
use crate::mirror::MirrorStore;
use crate::oplog::{OpKind, PendingOperation, PendingQueue};
use crate::remote::RemoteService;
use crate::resource::{ID_FIELD, Resource, is_temporary_id};

/// Outcome of one replay pass over the pending queue.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Ids of the pending operations that reached the server and left the queue.
    pub replayed: Vec<String>,
    /// Operations still queued, with the reason they did not go through.
    pub failures: Vec<(String, SyncError)>,
    /// Temporary id → server id for every create replayed in this pass.
    pub id_remaps: Vec<(String, String)>,
    /// Reloading the last listed page failed after the replay finished.
    /// Replayed entries are already dequeued either way.
    pub refresh_error: Option<SyncError>,
}

impl SyncReport {
    /// Every queued entry went through. Says nothing about the refresh.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &str> {
        self.failures
            .iter()
            .filter(|(_, e)| matches!(e, SyncError::Conflict(_)))
            .map(|(id, _)| id.as_str())
    }
}

/// Server-confirmed effect of one replayed operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Replayed {
    Created { temp_id: String, resource: Resource },
    Updated(Resource),
    Deleted(String),
}

/// Replays queued operations against a remote, mirroring confirmed results.
pub struct Replayer<'a> {
    remote: &'a dyn RemoteService,
    mirror: &'a dyn MirrorStore,
    queue: &'a dyn PendingQueue,
}

impl<'a> Replayer<'a> {
    pub fn new(
        remote: &'a dyn RemoteService,
        mirror: &'a dyn MirrorStore,
        queue: &'a dyn PendingQueue,
    ) -> Self {
        Self {
            remote,
            mirror,
            queue,
        }
    }

    /// Run one pass: every entry in timestamp order, at most once each.
    ///
    /// A failed entry stays queued and does not stop later entries.
    /// `on_replayed` sees each confirmed effect as soon as it is mirrored.
    pub async fn run<F>(&self, mut on_replayed: F) -> Result<SyncReport, SyncError>
    where
        F: FnMut(&Replayed),
    {
        let ops = self.queue.get_all().await?;
        let mut report = SyncReport::default();
        let mut remaps: HashMap<String, String> = HashMap::new();

        for op in ops {
            let op = remap(op, &remaps);
            match self.replay_one(&op).await {
                Ok(effect) => {
                    if let Replayed::Created { temp_id, resource } = &effect {
                        remaps.insert(temp_id.clone(), resource.id().to_string());
                        report
                            .id_remaps
                            .push((temp_id.clone(), resource.id().to_string()));
                    }
                    on_replayed(&effect);
                    match self.queue.remove(&op.id).await {
                        Ok(()) => report.replayed.push(op.id),
                        Err(e) => {
                            tracing::warn!(op_id = %op.id, error = %e, "replayed operation could not be dequeued");
                            report.failures.push((op.id, e));
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        op_id = %op.id,
                        kind = op.operation.as_str(),
                        target_id = %op.target_id,
                        error = %e,
                        "pending operation failed, keeping it queued"
                    );
                    report.failures.push((op.id, e));
                }
            }
        }

        tracing::info!(
            replayed = report.replayed.len(),
            failed = report.failures.len(),
            "replay pass finished"
        );
        Ok(report)
    }

    async fn replay_one(&self, op: &PendingOperation) -> Result<Replayed, SyncError> {
        match op.operation {
            OpKind::Create => {
                let created = self.remote.create(&op.payload).await?;
                let server_id = created.id().to_string();
                if server_id != op.target_id {
                    self.queue.retarget(&op.target_id, &server_id).await?;
                    self.mirror.delete(&op.target_id).await?;
                }
                self.mirror.put(&created).await?;
                Ok(Replayed::Created {
                    temp_id: op.target_id.clone(),
                    resource: created,
                })
            }
            OpKind::Update => {
                ensure_not_orphaned(op)?;
                let updated = self
                    .remote
                    .update(&op.target_id, &strip_id(&op.payload))
                    .await
                    .map_err(|e| as_conflict(e, op))?;
                self.mirror.put(&updated).await?;
                Ok(Replayed::Updated(updated))
            }
            OpKind::Delete => {
                ensure_not_orphaned(op)?;
                self.remote
                    .delete(&op.target_id)
                    .await
                    .map_err(|e| as_conflict(e, op))?;
                self.mirror.delete(&op.target_id).await?;
                Ok(Replayed::Deleted(op.target_id.clone()))
            }
        }
    }
}

/// Point an operation loaded before this pass at ids assigned during it.
fn remap(mut op: PendingOperation, remaps: &HashMap<String, String>) -> PendingOperation {
    if let Some(server_id) = remaps.get(&op.target_id) {
        op.target_id = server_id.clone();
        if let Some(obj) = op.payload.as_object_mut() {
            if obj.contains_key(ID_FIELD) {
                obj.insert(ID_FIELD.to_string(), serde_json::Value::String(server_id.clone()));
            }
        }
    }
    op
}

/// Updates and deletes of a resource whose create has not reached the server yet.
fn ensure_not_orphaned(op: &PendingOperation) -> Result<(), SyncError> {
    if is_temporary_id(&op.target_id) {
        return Err(SyncError::State("waiting for the create of a temporary id"));
    }
    Ok(())
}

/// The target vanished on the server between queueing and replay.
fn as_conflict(err: SyncError, op: &PendingOperation) -> SyncError {
    match err {
        SyncError::NotFound(msg) => SyncError::Conflict(format!(
            "{} of {} no longer applies: {}",
            op.operation.as_str(),
            op.target_id,
            msg
        )),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn remap_rewrites_target_and_payload_id() {
        let remaps = HashMap::from([("temp-1".to_string(), "srv-1".to_string())]);
        let op = PendingOperation::new(OpKind::Update, "temp-1", json!({"id": "temp-1", "title": "B"}));
        let op = remap(op, &remaps);
        assert_eq!(op.target_id, "srv-1");
        assert_eq!(op.payload, json!({"id": "srv-1", "title": "B"}));

        let other = PendingOperation::new(OpKind::Delete, "r2", json!({"id": "r2"}));
        assert_eq!(remap(other.clone(), &remaps), other);
    }

    #[test]
    fn not_found_during_replay_becomes_conflict() {
        let op = PendingOperation::new(OpKind::Delete, "r1", json!({"id": "r1"}));
        assert_matches!(
            as_conflict(SyncError::NotFound("gone".into()), &op),
            SyncError::Conflict(msg) if msg.contains("DELETE of r1")
        );
        assert_matches!(
            as_conflict(SyncError::Network("down".into()), &op),
            SyncError::Network(_)
        );
    }

    #[test]
    fn temporary_targets_are_held_back() {
        let op = PendingOperation::new(OpKind::Update, "temp-9", json!({"id": "temp-9"}));
        assert_matches!(ensure_not_orphaned(&op), Err(SyncError::State(_)));
        let op = PendingOperation::new(OpKind::Update, "r9", json!({"id": "r9"}));
        assert!(ensure_not_orphaned(&op).is_ok());
    }

    #[test]
    fn report_lists_conflicts() {
        let report = SyncReport {
            replayed: vec!["a".into()],
            failures: vec![
                ("b".into(), SyncError::Conflict("x".into())),
                ("c".into(), SyncError::Network("y".into())),
            ],
            id_remaps: Vec::new(),
            refresh_error: None,
        };
        assert!(!report.is_clean());
        assert_eq!(report.conflicts().collect::<Vec<_>>(), vec!["b"]);
    }
}
