//! ドメインモデル（ID、タスクレコード、状態機械、起動リクエスト、ライブチャネルのイベント）

pub mod errors;
pub mod events;
pub mod ids;
pub mod log;
pub mod request;
pub mod state;
pub mod task;

pub use self::errors::{ErrorKind, OrchestratorError};
pub use self::events::{ClientMessage, ConnectionAck, ErrorNotice, ServerMessage, StatusUpdate, TaskRef};
pub use self::ids::{TaskId, ViewerId};
pub use self::log::{LogLine, StreamKind};
pub use self::request::{
    CompressionOverrides, FileInputs, LaunchRequest, RandomOverrides, SchedulerOverrides,
    TransferOverrides, TuningOverrides, WarmStartOverrides, relative_dir_ref,
};
pub use self::state::{ProcessOutcome, TaskCounts, TaskStatus};
pub use self::task::{TaskPaths, TaskRecord};
