//! tapestry-core
//!
//! Lifecycle control for synthesis workers of compositions.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（meta, composition, synthesizer, worker, decision, errors）
//! - **ports**: 抽象化レイヤー（Store, Clock, NameGenerator, SynthesisReporter）
//! - **app**: reconcile ロジック（builder, controller, plan と各フェーズ）
//! - **impls**: 実装（InMemoryStore, MetricsReporter, RecordingReporter）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
