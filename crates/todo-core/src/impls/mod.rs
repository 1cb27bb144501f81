//! Impls - ports の実装
//!
//! - **InMemoryStore**: 開発・テスト用
//! - **SqliteStore**: rusqlite による永続化

pub mod inmem_store;
pub mod sqlite_store;

pub use self::inmem_store::InMemoryStore;
pub use self::sqlite_store::SqliteStore;
