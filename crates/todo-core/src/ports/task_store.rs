//! TaskStore port - タスクの正本（source of truth）
//!
//! # 実装
//! - `impls::InMemoryStore`（開発・テスト用）
//! - `impls::SqliteStore`（永続化）

use async_trait::async_trait;

use crate::domain::{StoreResult, Task, TaskId, UserId};

/// TaskStore holds task rows, including tombstoned ones awaiting compaction.
///
/// # Tombstone contract
/// - Reads (`list_by_owner`, `get_by_id`) never return a tombstoned row.
/// - `mark_deleted` only touches an active row owned by `owner_id`;
///   anything else is `StoreError::NotFound`.
/// - `delete_all_tombstoned` is all-or-nothing: either every tombstoned row
///   is gone afterwards, or none was removed.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn list_by_owner(&self, owner_id: UserId) -> StoreResult<Vec<Task>>;

    async fn get_by_id(&self, task_id: TaskId, owner_id: UserId) -> StoreResult<Task>;

    /// Insert a new active task. Duplicate ids are `AlreadyExists`.
    async fn insert_task(&self, task: Task) -> StoreResult<()>;

    /// Replace status/title/description of an active task owned by `task.owner_id`.
    async fn update_task_attributes(&self, task: &Task) -> StoreResult<()>;

    /// Set the tombstone flag (Active -> Tombstoned).
    async fn mark_deleted(&self, task_id: TaskId, owner_id: UserId) -> StoreResult<()>;

    /// Physically remove every tombstoned row regardless of owner.
    /// Returns the number of rows removed.
    async fn delete_all_tombstoned(&self) -> StoreResult<u64>;
}
