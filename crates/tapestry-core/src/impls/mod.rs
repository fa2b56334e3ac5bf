//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryStore**: 開発・テスト用のバッキングストア
//! - **MetricsReporter**: `metrics` crate に送る SynthesisReporter
//! - **RecordingReporter**: メモリに記録する SynthesisReporter（テスト用）
//!
//! 本番のストア実装（API サーバーのクライアントなど）は別クレートに置く。

pub mod inmem_store;
pub mod metrics_reporter;
pub mod recording_reporter;

// 主要な型を再エクスポート
pub use self::inmem_store::InMemoryStore;
pub use self::metrics_reporter::MetricsReporter;
pub use self::recording_reporter::{RecordingReporter, ReporterSnapshot};
