//! App - アプリケーション層
//!
//! ports を組み合わせてアプリケーションロジックを実装する。
//!
//! # 主要コンポーネント
//! - **AppBuilder / App**: 設定からのワイヤリングと start / shutdown
//! - **TaskService / UserService**: CRUD とバリデーション
//! - **BatchCompactor**: tombstone 通知の集約と一括物理削除
//! - **CompactorStatus**: 観測用スナップショット

pub mod builder;
pub mod compactor;
pub mod status;
pub mod task_service;
pub mod user_service;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::compactor::{
    Admission, BatchCompactor, CompactorConfig, CompactorError, CompactorState,
    NotificationQueue,
};
pub use self::status::CompactorStatus;
pub use self::task_service::TaskService;
pub use self::user_service::UserService;
