//! IdGenerator port - ID 生成の抽象化
//!
//! テストで `FixedClock` によりタイムスタンプ部分を固定できるよう、trait として抽象化しています。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::ids::{TaskId, ViewerId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator はタスクと viewer の ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（ライフサイクル管理と gateway で共有）
pub trait IdGenerator: Send + Sync {
    /// タスク名から Task ID を生成
    fn generate_task_id(&self, name: &str) -> TaskId;

    /// 新しいライブチャネル接続の Viewer ID を生成
    fn generate_viewer_id(&self) -> ViewerId;
}

/// UlidGenerator は clock の現在時刻とランダムビットから ULID を作る
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self, name: &str) -> TaskId {
        TaskId::from_name(name, self.next_ulid())
    }

    fn generate_viewer_id(&self) -> ViewerId {
        ViewerId::from_ulid(self.next_ulid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let id1 = id_gen.generate_task_id("mnist");
        let id2 = id_gen.generate_task_id("mnist");

        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("mnist-"));
    }

    #[test]
    fn ulid_generator_with_fixed_clock_shares_timestamp() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let v1 = id_gen.generate_viewer_id();
        let v2 = id_gen.generate_viewer_id();

        // ランダム部分は異なり、タイムスタンプ部分は同じ
        assert_ne!(v1, v2);
        assert_eq!(v1.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
        assert_eq!(v2.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }

    #[test]
    fn task_ids_sort_by_creation_time_within_a_name() {
        let early = UlidGenerator::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let late = UlidGenerator::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        ));
        assert!(early.generate_task_id("run") < late.generate_task_id("run"));
    }
}
