#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hidesync_cache::{
    Connectivity, MirrorStore, Page, PendingOperation, PendingQueue, RemoteError,
    RemoteService, Repository, Resource, ResourceFilter, SqliteStore, SyncConfig, SyncError,
};
use serde_json::{Value, json};

/// One call observed by the fake remote.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    List,
    Get(String),
    Create(Value),
    Update(String, Value),
    Delete(String),
}

impl Call {
    fn method(&self) -> &'static str {
        match self {
            Call::List => "list",
            Call::Get(_) => "get",
            Call::Create(_) => "create",
            Call::Update(..) => "update",
            Call::Delete(_) => "delete",
        }
    }

    fn target(&self) -> Option<&str> {
        match self {
            Call::Get(id) | Call::Update(id, _) | Call::Delete(id) => Some(id),
            Call::List | Call::Create(_) => None,
        }
    }
}

struct Failure {
    method: &'static str,
    target: Option<String>,
    status: Option<u16>,
}

/// In-memory stand-in for the REST service, with scripted failures.
#[derive(Default)]
pub struct FakeRemote {
    rows: Mutex<BTreeMap<String, Resource>>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<Vec<Failure>>,
    next_id: AtomicU64,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, value: Value) {
        let r = Resource::from_value(value).unwrap();
        self.rows.lock().unwrap().insert(r.id().to_string(), r);
    }

    pub fn remove(&self, id: &str) {
        self.rows.lock().unwrap().remove(id);
    }

    pub fn row(&self, id: &str) -> Option<Resource> {
        self.rows.lock().unwrap().get(id).cloned()
    }

    /// Fail every `method` call (optionally only for `target`) with `status`; `None` is a network error.
    pub fn fail(&self, method: &'static str, target: Option<&str>, status: Option<u16>) {
        self.failures.lock().unwrap().push(Failure {
            method,
            target: target.map(str::to_string),
            status,
        });
    }

    pub fn heal(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls other than `list`, which sync issues for its final refresh.
    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::List | Call::Get(_)))
            .collect()
    }

    fn record(&self, call: Call) -> Result<(), SyncError> {
        let failure = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .find(|f| {
                f.method == call.method()
                    && (f.target.is_none() || f.target.as_deref() == call.target())
            })
            .map(|f| f.status);
        self.calls.lock().unwrap().push(call);
        match failure {
            Some(status) => Err(RemoteError::new("scripted failure", status).into()),
            None => Ok(()),
        }
    }
}

fn merge_into(base: &mut Resource, body: &Value) {
    let mut v = base.to_value();
    if let (Some(obj), Some(patch)) = (v.as_object_mut(), body.as_object()) {
        for (k, val) in patch {
            if k != "id" {
                obj.insert(k.clone(), val.clone());
            }
        }
    }
    *base = Resource::from_value(v).unwrap();
}

#[async_trait]
impl RemoteService for FakeRemote {
    async fn list(&self, filter: &ResourceFilter) -> Result<Page<Resource>, SyncError> {
        self.record(Call::List)?;
        let rows: Vec<Resource> = self.rows.lock().unwrap().values().cloned().collect();
        Ok(filter.apply(rows))
    }

    async fn get_by_id(&self, id: &str) -> Result<Resource, SyncError> {
        self.record(Call::Get(id.to_string()))?;
        self.row(id)
            .ok_or_else(|| RemoteError::new("Resource not found", Some(404)).into())
    }

    async fn create(&self, body: &Value) -> Result<Resource, SyncError> {
        self.record(Call::Create(body.clone()))?;
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut created = Resource::from_value(json!({
            "id": format!("srv-{n}"),
            "lastUpdated": "2024-05-01T00:00:00.000Z"
        }))
        .unwrap();
        merge_into(&mut created, body);
        self.rows
            .lock()
            .unwrap()
            .insert(created.id().to_string(), created.clone());
        Ok(created)
    }

    async fn update(&self, id: &str, body: &Value) -> Result<Resource, SyncError> {
        self.record(Call::Update(id.to_string(), body.clone()))?;
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .get_mut(id)
            .ok_or_else(|| SyncError::from(RemoteError::new("Resource not found", Some(404))))?;
        merge_into(row, body);
        Ok(row.clone())
    }

    async fn delete(&self, id: &str) -> Result<(), SyncError> {
        self.record(Call::Delete(id.to_string()))?;
        match self.rows.lock().unwrap().remove(id) {
            Some(_) => Ok(()),
            None => Err(RemoteError::new("Resource not found", Some(404)).into()),
        }
    }
}

/// Queue whose writes always fail, to exercise local storage errors.
pub struct BrokenQueue;

#[async_trait]
impl PendingQueue for BrokenQueue {
    async fn add(&self, _op: &PendingOperation) -> Result<(), SyncError> {
        Err(rusqlite::Error::InvalidQuery.into())
    }
    async fn get_all(&self) -> Result<Vec<PendingOperation>, SyncError> {
        Ok(Vec::new())
    }
    async fn remove(&self, _op_id: &str) -> Result<(), SyncError> {
        Ok(())
    }
    async fn len(&self) -> Result<usize, SyncError> {
        Ok(0)
    }
    async fn retarget(&self, _old_id: &str, _new_id: &str) -> Result<usize, SyncError> {
        Ok(0)
    }
}

pub struct Harness {
    pub repo: Arc<Repository>,
    pub remote: Arc<FakeRemote>,
    pub store: Arc<SqliteStore>,
    pub connectivity: Connectivity,
}

impl Harness {
    pub fn new(online: bool) -> Self {
        let remote = FakeRemote::new();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let connectivity = Connectivity::new(online);
        let repo = Arc::new(Repository::new(
            remote.clone(),
            store.clone(),
            store.clone(),
            connectivity.clone(),
            &SyncConfig::default(),
        ));
        Self {
            repo,
            remote,
            store,
            connectivity,
        }
    }

    pub async fn mirrored(&self, id: &str) -> Option<Resource> {
        MirrorStore::get(self.store.as_ref(), id).await.unwrap()
    }

    pub async fn queued(&self) -> Vec<PendingOperation> {
        PendingQueue::get_all(self.store.as_ref()).await.unwrap()
    }
}

pub fn title(r: &Resource) -> &str {
    r.field("title").and_then(Value::as_str).unwrap_or("")
}
