//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。
//! サービス層とコンパクタは trait だけに依存し、ストアの実装（InMemory / SQLite）や
//! テスト用ダブルと差し替えられる。

pub mod clock;
pub mod id_generator;
pub mod notifier;
pub mod task_store;
pub mod user_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::notifier::TombstoneNotifier;
pub use self::task_store::TaskStore;
pub use self::user_store::UserStore;
