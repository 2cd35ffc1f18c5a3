//! Ports - 抽象化層
//!
//! 各 trait はオーケストレーターの外側（ディスク、壁時計、ライブ viewer）との
//! 継ぎ目。app 層はインメモリや固定値の実装でテストできる。

pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::{EventSink, NoopEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_store::TaskStore;
