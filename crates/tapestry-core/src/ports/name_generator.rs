//! NameGenerator port - Worker 名の生成
//!
//! # 実装
//! - **UlidNameGenerator**: `<composition>-<ulid>`（本番用）

use ulid::Ulid;

use crate::domain::ObjectKey;
use crate::ports::Clock;

/// NameGenerator は新しい Worker の名前を決める
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数の reconcile から同時に使われる）
pub trait NameGenerator: Send + Sync {
    fn worker_name(&self, composition: &ObjectKey) -> String;
}

/// ULID ベースの名前生成器
///
/// timestamp 部分は Clock から取るので、FixedClock を渡せば名前の先頭が
/// 決定的になる。
pub struct UlidNameGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidNameGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> NameGenerator for UlidNameGenerator<C> {
    fn worker_name(&self, composition: &ObjectKey) -> String {
        let timestamp_ms = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        format!(
            "{}-{}",
            composition.name,
            ulid.to_string().to_ascii_lowercase()
        )
    }
}
