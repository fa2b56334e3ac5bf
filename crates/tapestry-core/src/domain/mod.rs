//! Domain model (objects, status records, decisions, errors).
//!
//! - meta: ObjectKey / ObjectMeta（全リソース共通）
//! - composition, synthesizer, worker: ストアに保存されるリソース
//! - decision: worker に対する判定結果
//! - errors: ストア / reconcile のエラー

pub mod composition;
pub mod decision;
pub mod errors;
pub mod meta;
pub mod synthesizer;
pub mod worker;

pub use composition::{
    CLEANUP_FINALIZER, Composition, CompositionSpec, CompositionStatus, SynthesisRecord,
    SynthesizerRef,
};
pub use decision::{DeleteReason, WorkerDecision};
pub use errors::{ErrorKind, ReconcileError, ResourceKind, StoreError, StoreResultExt};
pub use meta::{ObjectKey, ObjectMeta};
pub use synthesizer::{DEFAULT_POD_TIMEOUT, Synthesizer, SynthesizerSpec};
pub use worker::{Worker, WorkerOrigin};
