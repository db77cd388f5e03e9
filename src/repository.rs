//! Single entry point for reading and mutating resources.
//!
//! The repository hides the online/offline split from callers: online calls go
//! to the remote service and are mirrored locally, offline calls are served from
//! the mirror and mutations are queued for replay.
//!
//! Concurrent mutations of the same resource are not serialized here. Callers
//! are expected to keep a single writer per resource at a time, and to discard
//! results of `list`/`get_by_id` calls superseded by a newer one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::config::SyncConfig;
use crate::connectivity::Connectivity;
use crate::error::SyncError;
use crate::filter::{Page, PageMeta, ResourceFilter};
use crate::merge::{delete_payload, merge_patch, strip_id, update_payload};
use crate::mirror::MirrorStore;
use crate::oplog::{OpKind, PendingOperation, PendingQueue};
use crate::optimistic::{Optimistic, ResourceView};
use crate::remote::{HttpRemote, RemoteService};
use crate::resource::{Resource, is_temporary_id};
use crate::store::SqliteStore;
use crate::sync::{Replayed, Replayer, SyncReport};

#[derive(Debug, Default)]
struct ViewState {
    view: ResourceView,
    current: Option<Resource>,
    last_filter: ResourceFilter,
    last_meta: Option<PageMeta>,
}

impl ViewState {
    fn set_current_if(&mut self, id: &str, resource: Option<Resource>) {
        if self.current.as_ref().is_some_and(|c| c.id() == id) {
            self.current = resource;
        }
    }
}

pub struct Repository {
    remote: Arc<dyn RemoteService>,
    mirror: Arc<dyn MirrorStore>,
    queue: Arc<dyn PendingQueue>,
    connectivity: Connectivity,
    default_page_size: u32,
    state: Mutex<ViewState>,
    syncing: AtomicBool,
}

impl Repository {
    pub fn new(
        remote: Arc<dyn RemoteService>,
        mirror: Arc<dyn MirrorStore>,
        queue: Arc<dyn PendingQueue>,
        connectivity: Connectivity,
        config: &SyncConfig,
    ) -> Self {
        let state = ViewState {
            last_filter: ResourceFilter::new(config.default_page_size),
            ..ViewState::default()
        };
        Self {
            remote,
            mirror,
            queue,
            connectivity,
            default_page_size: config.default_page_size,
            state: Mutex::new(state),
            syncing: AtomicBool::new(false),
        }
    }

    /// Wire the SQLite store and HTTP client described by `config`.
    pub fn open(config: &SyncConfig, connectivity: Connectivity) -> Result<Self, SyncError> {
        let store = Arc::new(SqliteStore::open(&config.database_path)?);
        let remote = Arc::new(HttpRemote::new(config)?);
        Ok(Self::new(remote, store.clone(), store, connectivity, config))
    }

    fn state(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn is_offline(&self) -> bool {
        self.connectivity.is_offline()
    }

    /// Resources currently shown, in display order.
    pub fn resources(&self) -> Vec<Resource> {
        self.state().view.items().to_vec()
    }

    /// Last resource loaded through `get_by_id`.
    pub fn current(&self) -> Option<Resource> {
        self.state().current.clone()
    }

    pub fn last_filter(&self) -> ResourceFilter {
        self.state().last_filter.clone()
    }

    pub fn last_meta(&self) -> Option<PageMeta> {
        self.state().last_meta
    }

    pub async fn pending_count(&self) -> Result<usize, SyncError> {
        self.queue.len().await
    }

    pub async fn pending_operations(&self) -> Result<Vec<PendingOperation>, SyncError> {
        self.queue.get_all().await
    }

    /// Drop a queued mutation without replaying it.
    pub async fn discard_pending(&self, op_id: &str) -> Result<(), SyncError> {
        tracing::info!(op_id, "discarding pending operation");
        self.queue.remove(op_id).await
    }

    fn normalize(&self, mut filter: ResourceFilter) -> ResourceFilter {
        if filter.page_size == 0 {
            filter.page_size = self.default_page_size;
        }
        filter.page = filter.effective_page();
        filter
    }

    pub async fn list(&self, filter: ResourceFilter) -> Result<Page<Resource>, SyncError> {
        let filter = self.normalize(filter);
        let page = if self.is_offline() {
            let all = self.mirror.get_all().await?;
            tracing::debug!(cached = all.len(), "listing from mirror");
            filter.apply(all)
        } else {
            let page = self.remote.list(&filter).await?;
            for resource in &page.data {
                self.mirror.put(resource).await?;
            }
            page
        };

        let mut st = self.state();
        st.view.replace_all(page.data.clone());
        st.last_filter = filter;
        st.last_meta = Some(page.meta);
        Ok(page)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Resource, SyncError> {
        if self.is_offline() {
            let cached = self.mirror.get(id).await?;
            let resource = cached.ok_or_else(|| SyncError::NotFound(id.to_string()))?;
            self.state().current = Some(resource.clone());
            return Ok(resource);
        }

        let resource = self.remote.get_by_id(id).await?;
        self.mirror.put(&resource).await?;
        {
            let mut st = self.state();
            st.view.replace(id, resource.clone());
            st.current = Some(resource.clone());
        }
        self.prefetch_related(&resource);
        Ok(resource)
    }

    /// Best effort: mirror every related resource in the background.
    fn prefetch_related(&self, resource: &Resource) {
        let ids: Vec<String> = resource
            .related_ids()
            .into_iter()
            .filter(|id| id != resource.id() && !is_temporary_id(id))
            .collect();
        if ids.is_empty() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no runtime, skipping related prefetch");
            return;
        };
        let remote = Arc::clone(&self.remote);
        let mirror = Arc::clone(&self.mirror);
        handle.spawn(async move {
            for id in ids {
                let fetched = match remote.get_by_id(&id).await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::debug!(id = %id, error = %e, "related prefetch failed");
                        continue;
                    }
                };
                if let Err(e) = mirror.put(&fetched).await {
                    tracing::debug!(id = %id, error = %e, "could not mirror prefetched resource");
                }
            }
        });
    }

    pub async fn create(&self, partial: Value) -> Result<Resource, SyncError> {
        let body = strip_id(&partial);
        let provisional = Resource::provisional(&body);
        let temp_id = provisional.id().to_string();
        let mut pending = Optimistic::create(&mut self.state().view, provisional.clone());

        if self.is_offline() {
            let op = PendingOperation::new(OpKind::Create, &temp_id, body);
            let saved = match self.mirror.put(&provisional).await {
                Ok(()) => self.queue.add(&op).await,
                Err(e) => Err(e),
            };
            if let Err(e) = saved {
                pending.rollback(&mut self.state().view);
                self.restore_mirror(&temp_id, None).await;
                return Err(e);
            }
            tracing::debug!(temp_id = %temp_id, "created offline");
            return Ok(provisional);
        }

        match self.remote.create(&body).await {
            Ok(created) => {
                pending.confirm(&mut self.state().view, Some(created.clone()));
                self.mirror.put(&created).await?;
                Ok(created)
            }
            Err(e) => {
                pending.rollback(&mut self.state().view);
                Err(e)
            }
        }
    }

    pub async fn update(&self, id: &str, patch: Value) -> Result<Resource, SyncError> {
        let patch = strip_id(&patch);
        let queue_only = self.queues_edits_of(id);
        let Some(snapshot) = self.snapshot(id).await? else {
            if queue_only {
                return Err(SyncError::NotFound(id.to_string()));
            }
            let updated = self.remote.update(id, &patch).await?;
            self.mirror.put(&updated).await?;
            self.state().view.replace(id, updated.clone());
            return Ok(updated);
        };

        let merged = merge_patch(&snapshot, &patch);
        let (mut pending, current_before) = {
            let mut st = self.state();
            let before = st.current.clone();
            st.set_current_if(id, Some(merged.clone()));
            (Optimistic::update(&mut st.view, merged.clone()), before)
        };

        if queue_only {
            let op = PendingOperation::new(OpKind::Update, id, update_payload(id, &patch));
            let saved = match self.mirror.put(&merged).await {
                Ok(()) => self.queue.add(&op).await,
                Err(e) => Err(e),
            };
            if let Err(e) = saved {
                self.rollback(&mut pending, current_before);
                self.restore_mirror(id, Some(&snapshot)).await;
                return Err(e);
            }
            return Ok(merged);
        }

        match self.remote.update(id, &patch).await {
            Ok(updated) => {
                {
                    let mut st = self.state();
                    st.set_current_if(id, Some(updated.clone()));
                    pending.confirm(&mut st.view, Some(updated.clone()));
                }
                self.mirror.put(&updated).await?;
                Ok(updated)
            }
            Err(e) => {
                self.rollback(&mut pending, current_before);
                self.restore_mirror(id, Some(&snapshot)).await;
                Err(e)
            }
        }
    }

    pub async fn delete(&self, id: &str) -> Result<(), SyncError> {
        let queue_only = self.queues_edits_of(id);
        let Some(snapshot) = self.snapshot(id).await? else {
            if queue_only {
                return Err(SyncError::NotFound(id.to_string()));
            }
            self.remote.delete(id).await?;
            return self.mirror.delete(id).await;
        };

        let (mut pending, current_before) = {
            let mut st = self.state();
            let before = st.current.clone();
            st.set_current_if(id, None);
            (Optimistic::delete(&mut st.view, snapshot.clone()), before)
        };

        if queue_only {
            let op = PendingOperation::new(OpKind::Delete, id, delete_payload(id));
            let saved = match self.mirror.delete(id).await {
                Ok(()) => self.queue.add(&op).await,
                Err(e) => Err(e),
            };
            if let Err(e) = saved {
                self.rollback(&mut pending, current_before);
                self.restore_mirror(id, Some(&snapshot)).await;
                return Err(e);
            }
            return Ok(());
        }

        match self.remote.delete(id).await {
            Ok(()) => {
                pending.confirm(&mut self.state().view, None);
                self.mirror.delete(id).await
            }
            Err(e) => {
                self.rollback(&mut pending, current_before);
                Err(e)
            }
        }
    }

    /// Replay queued mutations, then reload the last listed page.
    ///
    /// No-op while offline, with an empty queue, or while another pass runs.
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        if self.is_offline() {
            tracing::debug!("offline, skipping sync");
            return Ok(SyncReport::default());
        }
        let Some(_guard) = SyncGuard::acquire(&self.syncing) else {
            tracing::debug!("sync already running");
            return Ok(SyncReport::default());
        };
        if self.queue.len().await? == 0 {
            return Ok(SyncReport::default());
        }

        tracing::info!("replaying pending operations");
        let replayer = Replayer::new(
            self.remote.as_ref(),
            self.mirror.as_ref(),
            self.queue.as_ref(),
        );
        let mut report = replayer.run(|effect| self.apply_replayed(effect)).await?;

        let filter = self.last_filter();
        if let Err(e) = self.list(filter).await {
            tracing::warn!(error = %e, "refresh after replay failed");
            report.refresh_error = Some(e);
        }
        Ok(report)
    }

    /// Run one `sync` per offline → online transition. Never returns while
    /// this repository holds its connectivity handle; abort the task to stop it.
    ///
    /// The channel only keeps the latest value and only changes on a real flip,
    /// so waking up online means the link went down and came back since the
    /// last look, even if the offline value was never observed.
    pub async fn watch_connectivity(&self) {
        let mut rx = self.connectivity.subscribe();
        while rx.changed().await.is_ok() {
            let online = *rx.borrow_and_update();
            if online {
                match self.sync().await {
                    Ok(report) if report.is_clean() => {
                        tracing::info!(replayed = report.replayed.len(), "back online, queue drained");
                    }
                    Ok(report) => {
                        tracing::warn!(
                            replayed = report.replayed.len(),
                            failed = report.failures.len(),
                            "back online, some operations stay queued"
                        );
                    }
                    Err(e) => tracing::warn!(error = %e, "sync after reconnect failed"),
                }
            }
        }
    }

    /// Edits go to the queue while offline, and for resources the server has
    /// not created yet: their temporary id means nothing to the remote.
    fn queues_edits_of(&self, id: &str) -> bool {
        self.is_offline() || is_temporary_id(id)
    }

    fn apply_replayed(&self, effect: &Replayed) {
        let mut st = self.state();
        match effect {
            Replayed::Created { temp_id, resource } => {
                st.view.replace(temp_id, resource.clone());
                st.set_current_if(temp_id, Some(resource.clone()));
            }
            Replayed::Updated(resource) => {
                st.view.replace(resource.id(), resource.clone());
                st.set_current_if(resource.id(), Some(resource.clone()));
            }
            Replayed::Deleted(id) => {
                st.view.remove(id);
                st.set_current_if(id, None);
            }
        }
    }

    /// Current copy of `id`: in-memory first, then the mirror.
    async fn snapshot(&self, id: &str) -> Result<Option<Resource>, SyncError> {
        let in_view = self.state().view.get(id).cloned();
        match in_view {
            Some(r) => Ok(Some(r)),
            None => self.mirror.get(id).await,
        }
    }

    fn rollback(&self, pending: &mut Optimistic, current_before: Option<Resource>) {
        let mut st = self.state();
        pending.rollback(&mut st.view);
        st.current = current_before;
    }

    /// Put the mirror back to its last known good entry for `id`.
    async fn restore_mirror(&self, id: &str, snapshot: Option<&Resource>) {
        let restored = match snapshot {
            Some(r) => self.mirror.put(r).await,
            None => self.mirror.delete(id).await,
        };
        if let Err(e) = restored {
            tracing::warn!(id, error = %e, "could not restore mirror entry");
        }
    }
}

struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncGuard(flag))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
