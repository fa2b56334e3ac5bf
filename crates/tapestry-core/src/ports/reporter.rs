//! SynthesisReporter port - 観測用のイベント記録
//!
//! プロセス全体のシングルトンではなく注入する。テストでは
//! RecordingReporter を使ってイベントを直接検証できる。
//!
//! # 実装
//! - MetricsReporter: `metrics` crate のカウンタ / ヒストグラム
//! - RecordingReporter: メモリ上に記録（テスト・シミュレーション用）

use std::time::Duration;

use crate::domain::ObjectKey;

pub trait SynthesisReporter: Send + Sync {
    /// A worker was created for a new synthesis attempt.
    fn synthesis_started(&self, composition: &ObjectKey);

    /// A worker exceeded its timeout and is being recreated.
    fn worker_timed_out(&self, composition: &ObjectKey);

    /// Time from worker creation to successful synthesis.
    fn synthesis_latency(&self, composition: &ObjectKey, latency: Duration);
}
