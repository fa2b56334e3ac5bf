//! App - ライフサイクル制御
//!
//! domain と ports を組み合わせて、1 回の reconcile パスを実装します。
//!
//! # 主要コンポーネント
//! - **ControllerBuilder**: controller の構築とワイヤリング
//! - **LifecycleController**: パスの実行（読み取り → plan → 1 回の書き込み）
//! - **plan**: 永続化された状態から次の 1 ステップを決める純粋関数
//! - **worker_decision / status / finalization / creation**: 各フェーズのルール

pub mod builder;
pub mod config;
pub mod controller;
pub mod creation;
pub mod finalization;
pub mod plan;
pub mod status;
pub mod worker_decision;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, ControllerBuilder};
pub use self::config::{ConfigError, ControllerConfig};
pub use self::controller::{Action, LifecycleController, PassResult};
pub use self::creation::CreationLimiter;
pub use self::finalization::{FinalizationStep, FinalizerHold};
pub use self::plan::{PassInput, Step, plan, plan_deletion};
pub use self::worker_decision::decide_worker;
