//! InMemoryStore - 開発・テスト用のバッキングストア
//!
//! # 学習ポイント
//! - tokio::sync::Mutex で状態をまとめて守る（ロックを跨いで await しない）
//! - owner → worker の secondary index を書き込み時に維持する
//! - finalizer / generation / resource_version の振る舞いを本物のストアに寄せる

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{
    Composition, CompositionStatus, ObjectKey, ResourceKind, StoreError, Synthesizer, Worker,
};
use crate::ports::{Clock, Store};

struct StoreState {
    compositions: BTreeMap<ObjectKey, Composition>,
    synthesizers: BTreeMap<ObjectKey, Synthesizer>,
    workers: BTreeMap<ObjectKey, Worker>,

    /// Composition key -> owned worker keys.
    workers_by_owner: HashMap<ObjectKey, BTreeSet<ObjectKey>>,

    next_resource_version: u64,

    /// Number of successful writes issued through the `Store` trait.
    mutations: u64,

    /// Makes the next `Store` call fail with `Unavailable`.
    fail_next: Option<String>,
}

impl StoreState {
    fn new() -> Self {
        Self {
            compositions: BTreeMap::new(),
            synthesizers: BTreeMap::new(),
            workers: BTreeMap::new(),
            workers_by_owner: HashMap::new(),
            next_resource_version: 1,
            mutations: 0,
            fail_next: None,
        }
    }

    fn next_version(&mut self) -> u64 {
        let version = self.next_resource_version;
        self.next_resource_version += 1;
        version
    }

    fn check_available(&mut self) -> Result<(), StoreError> {
        match self.fail_next.take() {
            Some(message) => Err(StoreError::Unavailable(message)),
            None => Ok(()),
        }
    }

    fn composition_mut(&mut self, key: &ObjectKey) -> Result<&mut Composition, StoreError> {
        self.compositions
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound {
                kind: ResourceKind::Composition,
                key: key.clone(),
            })
    }

    fn insert_worker(&mut self, worker: Worker) {
        let key = worker.key();
        self.workers_by_owner
            .entry(worker.owner_key())
            .or_default()
            .insert(key.clone());
        self.workers.insert(key, worker);
    }

    fn remove_worker(&mut self, key: &ObjectKey) -> Option<Worker> {
        let worker = self.workers.remove(key)?;
        let owner = worker.owner_key();
        if let Some(owned) = self.workers_by_owner.get_mut(&owner) {
            owned.remove(key);
            if owned.is_empty() {
                self.workers_by_owner.remove(&owner);
            }
        }
        Some(worker)
    }

    /// Final removal of a composition, garbage-collecting the workers it owns.
    fn remove_composition(&mut self, key: &ObjectKey) {
        self.compositions.remove(key);
        let owned = self.workers_by_owner.remove(key).unwrap_or_default();
        for worker in owned {
            self.workers.remove(&worker);
        }
    }
}

/// In-memory implementation of [`Store`].
///
/// # 削除のセマンティクス
/// - finalizer 付きの Composition の削除要求: deletion_timestamp を設定し、
///   generation を 1 つ進める
/// - 削除中の Composition から最後の finalizer が外れたら、その場で消える
///   （所有する Worker も一緒に GC される）
/// - Worker の削除は即時、または graceful（terminating にして
///   `reap_terminating` で消す）
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    clock: Arc<dyn Clock>,
    graceful_worker_deletion: bool,
}

impl InMemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(StoreState::new()),
            clock,
            graceful_worker_deletion: false,
        }
    }

    /// Deleted workers linger as terminating until [`Self::reap_terminating`].
    pub fn with_graceful_worker_deletion(mut self) -> Self {
        self.graceful_worker_deletion = true;
        self
    }

    pub async fn insert_synthesizer(&self, mut synthesizer: Synthesizer) -> Synthesizer {
        let mut state = self.state.lock().await;
        synthesizer.metadata.generation = synthesizer.metadata.generation.max(1);
        synthesizer.metadata.resource_version = state.next_version();
        synthesizer
            .metadata
            .creation_timestamp
            .get_or_insert_with(|| self.clock.now());
        state
            .synthesizers
            .insert(synthesizer.key(), synthesizer.clone());
        synthesizer
    }

    /// Inserts or replaces a composition as-is (status and deletion state included).
    pub async fn insert_composition(&self, mut composition: Composition) -> Composition {
        let mut state = self.state.lock().await;
        composition.metadata.generation = composition.metadata.generation.max(1);
        composition.metadata.resource_version = state.next_version();
        composition
            .metadata
            .creation_timestamp
            .get_or_insert_with(|| self.clock.now());
        state
            .compositions
            .insert(composition.key(), composition.clone());
        composition
    }

    /// Inserts a worker as-is, keeping its timestamps.
    pub async fn insert_worker(&self, worker: Worker) {
        let mut state = self.state.lock().await;
        state.insert_worker(worker);
    }

    /// Simulates a spec change by the composition's owner.
    pub async fn bump_composition_generation(&self, key: &ObjectKey) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let version = state.next_version();
        let composition = state.composition_mut(key)?;
        composition.metadata.generation += 1;
        composition.metadata.resource_version = version;
        Ok(composition.metadata.generation)
    }

    /// Simulates a new revision of a synthesizer.
    pub async fn bump_synthesizer_generation(&self, key: &ObjectKey) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let version = state.next_version();
        let synthesizer = state
            .synthesizers
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound {
                kind: ResourceKind::Synthesizer,
                key: key.clone(),
            })?;
        synthesizer.metadata.generation += 1;
        synthesizer.metadata.resource_version = version;
        Ok(synthesizer.metadata.generation)
    }

    /// Deletion request by the composition's owner.
    pub async fn request_composition_deletion(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let version = state.next_version();
        let composition = state.composition_mut(key)?;
        if composition.metadata.finalizers.is_empty() {
            state.remove_composition(key);
            return Ok(());
        }
        if composition.metadata.deletion_timestamp.is_none() {
            composition.metadata.deletion_timestamp = Some(now);
            composition.metadata.generation += 1;
            composition.metadata.resource_version = version;
        }
        Ok(())
    }

    /// Status write by a collaborator outside this crate (synthesizer, resource
    /// reconciler). No version check.
    pub async fn set_composition_status(
        &self,
        key: &ObjectKey,
        status: CompositionStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let version = state.next_version();
        let composition = state.composition_mut(key)?;
        composition.status = status;
        composition.metadata.resource_version = version;
        Ok(())
    }

    /// Removes every terminating worker. Returns how many were removed.
    pub async fn reap_terminating(&self) -> usize {
        let mut state = self.state.lock().await;
        let terminating: Vec<ObjectKey> = state
            .workers
            .values()
            .filter(|w| w.is_terminating())
            .map(Worker::key)
            .collect();
        for key in &terminating {
            state.remove_worker(key);
        }
        terminating.len()
    }

    /// Peek without going through the `Store` trait.
    pub async fn composition(&self, key: &ObjectKey) -> Option<Composition> {
        self.state.lock().await.compositions.get(key).cloned()
    }

    pub async fn compositions(&self) -> Vec<Composition> {
        self.state.lock().await.compositions.values().cloned().collect()
    }

    pub async fn workers(&self) -> Vec<Worker> {
        self.state.lock().await.workers.values().cloned().collect()
    }

    pub async fn mutations(&self) -> u64 {
        self.state.lock().await.mutations
    }

    /// The next call through the `Store` trait fails with `Unavailable`.
    pub async fn fail_next(&self, message: impl Into<String>) {
        self.state.lock().await.fail_next = Some(message.into());
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_composition(&self, key: &ObjectKey) -> Result<Composition, StoreError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        state.composition_mut(key).map(|c| c.clone())
    }

    async fn update_composition(&self, composition: &Composition) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        let key = composition.key();
        let version = state.next_version();
        let stored = state.composition_mut(&key)?;
        if stored.metadata.resource_version != composition.metadata.resource_version {
            return Err(StoreError::Conflict {
                kind: ResourceKind::Composition,
                key,
            });
        }

        if stored.spec != composition.spec {
            stored.spec = composition.spec.clone();
            stored.metadata.generation += 1;
        }
        stored.metadata.finalizers = composition.metadata.finalizers.clone();
        stored.metadata.resource_version = version;
        let released = stored.is_deleting() && stored.metadata.finalizers.is_empty();

        if released {
            state.remove_composition(&key);
        }
        state.mutations += 1;
        Ok(())
    }

    async fn update_composition_status(
        &self,
        composition: &Composition,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        let key = composition.key();
        let version = state.next_version();
        let stored = state.composition_mut(&key)?;
        if stored.metadata.resource_version != composition.metadata.resource_version {
            return Err(StoreError::Conflict {
                kind: ResourceKind::Composition,
                key,
            });
        }
        stored.status = composition.status.clone();
        stored.metadata.resource_version = version;
        state.mutations += 1;
        Ok(())
    }

    async fn get_synthesizer(&self, key: &ObjectKey) -> Result<Synthesizer, StoreError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        state
            .synthesizers
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: ResourceKind::Synthesizer,
                key: key.clone(),
            })
    }

    async fn list_workers(&self, composition: &ObjectKey) -> Result<Vec<Worker>, StoreError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        let Some(owned) = state.workers_by_owner.get(composition) else {
            return Ok(Vec::new());
        };
        Ok(owned
            .iter()
            .filter_map(|key| state.workers.get(key).cloned())
            .collect())
    }

    async fn create_worker(&self, worker: &Worker) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.check_available()?;
        let key = worker.key();
        if state.workers.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: ResourceKind::Worker,
                key,
            });
        }

        let mut worker = worker.clone();
        worker.metadata.resource_version = state.next_version();
        worker.metadata.creation_timestamp.get_or_insert(now);
        worker.metadata.deletion_timestamp = None;
        state.insert_worker(worker);
        state.mutations += 1;
        Ok(())
    }

    async fn delete_worker(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.check_available()?;
        let graceful = self.graceful_worker_deletion;
        let version = state.next_version();
        let worker = state
            .workers
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound {
                kind: ResourceKind::Worker,
                key: key.clone(),
            })?;

        if graceful {
            if worker.metadata.deletion_timestamp.is_none() {
                worker.metadata.deletion_timestamp = Some(now);
                worker.metadata.resource_version = version;
            }
        } else {
            state.remove_worker(key);
        }
        state.mutations += 1;
        Ok(())
    }
}
