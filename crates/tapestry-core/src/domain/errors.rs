//! Errors - ストア操作と reconcile パスのエラー
//!
//! # 分類
//! - not-found: 競合で消えたオブジェクト。「やることなし」として扱う
//! - already-exists: 並行パスが先に作成した。無害
//! - それ以外: パス単位で失敗し、dispatcher が backoff 付きで再実行する

use std::fmt;

use thiserror::Error;

use super::meta::ObjectKey;

/// Kinds of objects the backing store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Composition,
    Synthesizer,
    Worker,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Composition => "composition",
            ResourceKind::Synthesizer => "synthesizer",
            ResourceKind::Worker => "worker",
        };
        f.write_str(name)
    }
}

/// Error returned by a [`Store`](crate::ports::Store).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: ResourceKind, key: ObjectKey },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: ResourceKind, key: ObjectKey },

    #[error("{kind} {key} was modified concurrently")]
    Conflict { kind: ResourceKind, key: ObjectKey },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }
}

/// Turns tolerated store races into `Ok(None)`.
pub trait StoreResultExt<T> {
    fn ignore_not_found(self) -> Result<Option<T>, StoreError>;
    fn ignore_already_exists(self) -> Result<Option<T>, StoreError>;
}

impl<T> StoreResultExt<T> for Result<T, StoreError> {
    fn ignore_not_found(self) -> Result<Option<T>, StoreError> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn ignore_already_exists(self) -> Result<Option<T>, StoreError> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_already_exists() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// ErrorKind は reconcile エラーの運用分類
///
/// どちらも retryable。致命的なエラーは存在しない。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Store unavailable, write conflict, ...
    Infrastructure,
    /// A related object is missing. Stays visible until someone fixes it.
    Configuration,
}

/// Error surfaced from one reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{context}: {source}")]
    Store {
        context: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("synthesizer {synthesizer} referenced by composition {composition} not found")]
    MissingSynthesizer {
        synthesizer: String,
        composition: ObjectKey,
    },
}

impl ReconcileError {
    /// Adapter for `map_err` that attaches what the pass was doing.
    pub fn store(context: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| ReconcileError::Store { context, source }
    }

    /// Always true: a pass never fails permanently.
    pub fn is_retryable(&self) -> bool {
        true
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::Store { .. } => ErrorKind::Infrastructure,
            ReconcileError::MissingSynthesizer { .. } => ErrorKind::Configuration,
        }
    }
}
