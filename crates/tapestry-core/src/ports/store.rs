//! Store port - バッキングストア（正本）
//!
//! Composition / Synthesizer / Worker を保持する。
//!
//! # 設計原則
//! - 1 ステップにつき 1 回の呼び出し。リトライはしない（dispatcher の仕事）
//! - update は楽観的並行制御（resource_version が古ければ Conflict）
//! - status は spec / metadata とは別のサブリソース
//! - ここで行った変更は、いずれ同じ Composition の次の reconcile を引き起こす

use async_trait::async_trait;

use crate::domain::{Composition, ObjectKey, StoreError, Synthesizer, Worker};

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_composition(&self, key: &ObjectKey) -> Result<Composition, StoreError>;

    /// Writes metadata (finalizers) and spec. Status is ignored.
    async fn update_composition(&self, composition: &Composition) -> Result<(), StoreError>;

    /// Writes the status sub-resource only.
    async fn update_composition_status(&self, composition: &Composition)
    -> Result<(), StoreError>;

    async fn get_synthesizer(&self, key: &ObjectKey) -> Result<Synthesizer, StoreError>;

    /// Workers owned by the given Composition, terminating ones included.
    async fn list_workers(&self, composition: &ObjectKey) -> Result<Vec<Worker>, StoreError>;

    async fn create_worker(&self, worker: &Worker) -> Result<(), StoreError>;

    async fn delete_worker(&self, key: &ObjectKey) -> Result<(), StoreError>;
}
