//! todo-core
//!
//! Task / user management core with soft delete and batched compaction.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, user, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, UserStore, TombstoneNotifier, Clock, IdGenerator）
//! - **impls**: 実装（InMemoryStore, SqliteStore）
//! - **app**: アプリケーションロジック（services, compactor, builder）
//! - **config**: 設定の読み込み（defaults → file → env）
//! - **logging**: tracing subscriber の初期化

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod logging;
pub mod ports;

pub use app::{App, AppBuilder, BatchCompactor, CompactorConfig, CompactorError};
pub use config::AppConfig;
