//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。controller はこれらの trait だけに
//! 依存し、ストアやメトリクスの実装詳細を知らない。

pub mod clock;
pub mod name_generator;
pub mod reporter;
pub mod store;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::name_generator::{NameGenerator, UlidNameGenerator};
pub use self::reporter::SynthesisReporter;
pub use self::store::Store;
