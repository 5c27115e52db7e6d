//! In-memory collaborators for tests.

use crate::client::{
    ClientError, ClientResult, Page, PresignRequest, RemoteResourceClient, ResourceKind,
    ResourceRecord, ResourceRef, ResourceStatus,
};
use crate::store::{DurableStore, ScanPage, StoreEntry, StoreResult};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Helper to create a single-connection in-memory database.
///
/// Each connection to `sqlite::memory:` is its own database, so the pool is
/// pinned to one connection that never expires.
pub async fn create_test_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    List,
    Describe,
    Create,
    Delete,
    Presign,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    pub kind: ResourceKind,
    pub name: String,
}

/// Scripted misbehaviour for one named resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behavior {
    /// Every delete reports the resource in use.
    AlwaysInUse,
    /// The first `n` deletes report the resource in use.
    InUseTimes(u32),
    /// Describe always reports this status.
    StuckIn(ResourceStatus),
    /// Create fails with a quota error.
    LimitOnCreate,
    /// Delete fails with an unexpected error.
    FailDelete(String),
    /// The first `n` calls of any kind are throttled.
    ThrottleTimes(u32),
}

type Key = (ResourceKind, Option<String>, String);

fn key_of(resource: &ResourceRef) -> Key {
    (resource.kind, resource.parent.clone(), resource.name.clone())
}

struct FakeResource {
    resource: ResourceRef,
    status: ResourceStatus,
    polls_left: u32,
}

#[derive(Default)]
struct ControlPlaneState {
    resources: BTreeMap<Key, FakeResource>,
    behaviors: HashMap<(ResourceKind, String), Behavior>,
    calls: Vec<Call>,
}

impl ControlPlaneState {
    fn record(&mut self, op: Op, kind: ResourceKind, name: &str) {
        self.calls.push(Call {
            op,
            kind,
            name: name.to_string(),
        });
    }

    fn behavior(&self, resource: &ResourceRef) -> Option<Behavior> {
        self.behaviors
            .get(&(resource.kind, resource.name.clone()))
            .cloned()
    }

    fn take_throttle(&mut self, resource: &ResourceRef) -> bool {
        match self.behaviors.get_mut(&(resource.kind, resource.name.clone())) {
            Some(Behavior::ThrottleTimes(n)) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    fn take_in_use(&mut self, resource: &ResourceRef) -> bool {
        match self.behaviors.get_mut(&(resource.kind, resource.name.clone())) {
            Some(Behavior::AlwaysInUse) => true,
            Some(Behavior::InUseTimes(n)) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    /// Sessions stay listed as `Deleted`; everything else disappears.
    fn finish_delete(&mut self, key: &Key) {
        if key.0 == ResourceKind::Session {
            if let Some(entry) = self.resources.get_mut(key) {
                entry.status = ResourceStatus::Deleted;
            }
        } else {
            self.resources.remove(key);
        }
    }
}

/// Control plane with eventually consistent create and delete.
///
/// Each accepted request leaves the resource in `Pending` or `Deleting` for
/// `settle_polls` describes before it settles.
pub struct FakeControlPlane {
    state: Mutex<ControlPlaneState>,
    page_size: usize,
    settle_polls: u32,
}

impl Default for FakeControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ControlPlaneState::default()),
            page_size: 50,
            settle_polls: 1,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_settle_polls(mut self, polls: u32) -> Self {
        self.settle_polls = polls;
        self
    }

    pub fn with_behavior(self, kind: ResourceKind, name: &str, behavior: Behavior) -> Self {
        self.lock()
            .behaviors
            .insert((kind, name.to_string()), behavior);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ControlPlaneState> {
        self.state.lock().expect("fake control plane lock poisoned")
    }

    /// Insert a resource directly, bypassing create.
    pub fn seed(&self, resource: ResourceRef, status: ResourceStatus) {
        self.lock().resources.insert(
            key_of(&resource),
            FakeResource {
                resource,
                status,
                polls_left: 0,
            },
        );
    }

    pub fn status_of(&self, resource: &ResourceRef) -> Option<ResourceStatus> {
        self.lock()
            .resources
            .get(&key_of(resource))
            .map(|entry| entry.status)
    }

    /// Resources of `kind` that still exist.
    pub fn live(&self, kind: ResourceKind) -> Vec<ResourceRef> {
        self.lock()
            .resources
            .values()
            .filter(|entry| entry.resource.kind == kind && !entry.status.is_gone())
            .map(|entry| entry.resource.clone())
            .collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn count(&self, op: Op, kind: ResourceKind) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.op == op && call.kind == kind)
            .count()
    }

    pub fn count_for(&self, op: Op, name: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.op == op && call.name == name)
            .count()
    }
}

#[async_trait]
impl RemoteResourceClient for FakeControlPlane {
    async fn list_page(
        &self,
        kind: ResourceKind,
        scope_id: &str,
        next_token: Option<String>,
    ) -> ClientResult<Page<ResourceRecord>> {
        let mut state = self.lock();
        state.record(Op::List, kind, scope_id);

        let offset = match next_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| ClientError::Other(format!("bad token '{token}'")))?,
            None => 0,
        };

        let matching: Vec<ResourceRecord> = state
            .resources
            .values()
            .filter(|entry| entry.resource.kind == kind && entry.resource.scope_id == scope_id)
            .map(|entry| ResourceRecord {
                resource: entry.resource.clone(),
                status: entry.status,
            })
            .collect();

        let end = (offset + self.page_size).min(matching.len());
        let items = matching.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_token = (end < matching.len()).then(|| end.to_string());

        Ok(Page { items, next_token })
    }

    async fn describe(&self, resource: &ResourceRef) -> ClientResult<ResourceRecord> {
        let mut state = self.lock();
        state.record(Op::Describe, resource.kind, &resource.name);

        if state.take_throttle(resource) {
            return Err(ClientError::Throttled);
        }
        if let Some(Behavior::StuckIn(status)) = state.behavior(resource) {
            return Ok(ResourceRecord {
                resource: resource.clone(),
                status,
            });
        }

        let key = key_of(resource);
        let (status, polls_left) = match state.resources.get(&key) {
            Some(entry) => (entry.status, entry.polls_left),
            None => return Err(ClientError::NotFound(resource.name.clone())),
        };

        if polls_left > 0 {
            if let Some(entry) = state.resources.get_mut(&key) {
                entry.polls_left -= 1;
            }
        } else {
            match status {
                ResourceStatus::Pending => {
                    if let Some(entry) = state.resources.get_mut(&key) {
                        entry.status = ResourceStatus::InService;
                    }
                }
                ResourceStatus::Deleting => state.finish_delete(&key),
                _ => {}
            }
        }

        match state.resources.get(&key) {
            Some(entry) => Ok(ResourceRecord {
                resource: entry.resource.clone(),
                status: entry.status,
            }),
            None => Err(ClientError::NotFound(resource.name.clone())),
        }
    }

    async fn create(&self, resource: &ResourceRef) -> ClientResult<()> {
        let mut state = self.lock();
        state.record(Op::Create, resource.kind, &resource.name);

        if state.take_throttle(resource) {
            return Err(ClientError::Throttled);
        }
        if state.behavior(resource) == Some(Behavior::LimitOnCreate) {
            return Err(ClientError::LimitExceeded(format!(
                "{} quota reached",
                resource.kind
            )));
        }

        if let Some(owner) = resource.parent.as_ref() {
            let profile = (ResourceKind::Profile, None, owner.clone());
            let owner_ready = state
                .resources
                .get(&profile)
                .is_some_and(|entry| entry.status == ResourceStatus::InService);
            if resource.kind == ResourceKind::Workspace && !owner_ready {
                return Err(ClientError::Other(format!(
                    "owner profile '{owner}' is not in service"
                )));
            }
        }

        let key = key_of(resource);
        if state
            .resources
            .get(&key)
            .is_some_and(|entry| !entry.status.is_gone())
        {
            return Err(ClientError::AlreadyExists(resource.name.clone()));
        }

        let (status, polls_left) = if self.settle_polls == 0 {
            (ResourceStatus::InService, 0)
        } else {
            (ResourceStatus::Pending, self.settle_polls - 1)
        };
        state.resources.insert(
            key,
            FakeResource {
                resource: resource.clone(),
                status,
                polls_left,
            },
        );
        Ok(())
    }

    async fn delete(&self, resource: &ResourceRef) -> ClientResult<()> {
        let mut state = self.lock();
        state.record(Op::Delete, resource.kind, &resource.name);

        if state.take_throttle(resource) {
            return Err(ClientError::Throttled);
        }
        if let Some(Behavior::FailDelete(message)) = state.behavior(resource) {
            return Err(ClientError::Other(message));
        }
        if state.take_in_use(resource) {
            return Err(ClientError::InUse(resource.name.clone()));
        }

        let key = key_of(resource);
        match state.resources.get(&key) {
            Some(entry) if !entry.status.is_gone() => {}
            _ => return Err(ClientError::NotFound(resource.name.clone())),
        }

        if self.settle_polls == 0 {
            state.finish_delete(&key);
        } else if let Some(entry) = state.resources.get_mut(&key) {
            entry.status = ResourceStatus::Deleting;
            entry.polls_left = self.settle_polls - 1;
        }
        Ok(())
    }

    async fn create_presigned_url(&self, request: &PresignRequest) -> ClientResult<String> {
        let mut state = self.lock();
        state.record(Op::Presign, ResourceKind::Profile, &request.profile);

        let key = (ResourceKind::Profile, None, request.profile.clone());
        match state.resources.get(&key) {
            Some(entry) if entry.status == ResourceStatus::InService => Ok(format!(
                "https://{}.studio.example.com/auth?profile={}&expires={}",
                request.scope_id,
                request.profile,
                request.expires_in.as_secs()
            )),
            _ => Err(ClientError::NotFound(request.profile.clone())),
        }
    }
}

/// Ordered in-memory store with call counters.
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, StoreEntry>>,
    page_size: usize,
    scans: AtomicUsize,
    puts: AtomicUsize,
    deletes: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            page_size: 25,
            scans: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StoreEntry>> {
        self.entries.lock().expect("memory store lock poisoned")
    }

    pub fn seed(&self, entries: impl IntoIterator<Item = StoreEntry>) {
        let mut map = self.lock();
        for entry in entries {
            map.insert(entry.participant.clone(), entry);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn scan_calls(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn scan_page(&self, start_after: Option<String>) -> StoreResult<ScanPage> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let map = self.lock();

        let lower = match &start_after {
            Some(key) => Bound::Excluded(key.clone()),
            None => Bound::Unbounded,
        };
        let mut remaining = map.range((lower, Bound::Unbounded));
        let entries: Vec<StoreEntry> = remaining
            .by_ref()
            .take(self.page_size)
            .map(|(_, entry)| entry.clone())
            .collect();

        let last_key = match remaining.next() {
            Some(_) => entries.last().map(|entry| entry.participant.clone()),
            None => None,
        };

        Ok(ScanPage { entries, last_key })
    }

    async fn get(&self, participant: &str) -> StoreResult<Option<StoreEntry>> {
        Ok(self.lock().get(participant).cloned())
    }

    async fn batch_put(&self, entries: &[StoreEntry]) -> StoreResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.seed(entries.iter().cloned());
        Ok(())
    }

    async fn batch_delete(&self, participants: &[String]) -> StoreResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let mut map = self.lock();
        for participant in participants {
            map.remove(participant);
        }
        Ok(())
    }
}
