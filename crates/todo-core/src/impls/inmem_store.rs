//! InMemoryStore - 開発・テスト用のストア
//!
//! # 実装詳細
//! - tasks / users を 1 つの tokio Mutex で保護
//! - delete_all_tombstoned はロックを握ったまま retain するので、途中状態は観測されない

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{StoreError, StoreResult, Task, TaskId, User, UserId};
use crate::ports::{TaskStore, UserStore};

#[derive(Default)]
struct InMemoryState {
    tasks: HashMap<TaskId, Task>,
    users: HashMap<UserId, User>,
}

/// In-memory task/user store.
///
/// Cloning shares the same underlying maps.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total rows held, tombstoned ones included.
    pub async fn physical_task_count(&self) -> usize {
        self.state.lock().await.tasks.len()
    }

    /// Number of tombstoned rows waiting for compaction.
    pub async fn tombstoned_count(&self) -> usize {
        let state = self.state.lock().await;
        state.tasks.values().filter(|t| t.is_tombstoned()).count()
    }

    /// Whether a row with this id physically exists (tombstoned or not).
    pub async fn contains_row(&self, task_id: TaskId) -> bool {
        self.state.lock().await.tasks.contains_key(&task_id)
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn list_by_owner(&self, owner_id: UserId) -> StoreResult<Vec<Task>> {
        let state = self.state.lock().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.is_owned_by(owner_id) && !t.is_tombstoned())
            .cloned()
            .collect();
        // ULID 順 = 作成順
        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }

    async fn get_by_id(&self, task_id: TaskId, owner_id: UserId) -> StoreResult<Task> {
        let state = self.state.lock().await;
        state
            .tasks
            .get(&task_id)
            .filter(|t| t.is_owned_by(owner_id) && !t.is_tombstoned())
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn insert_task(&self, task: Task) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.tasks.contains_key(&task.id) {
            return Err(StoreError::AlreadyExists("task"));
        }
        state.tasks.insert(task.id, task);
        Ok(())
    }

    async fn update_task_attributes(&self, task: &Task) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let Some(stored) = state
            .tasks
            .get_mut(&task.id)
            .filter(|t| t.is_owned_by(task.owner_id) && !t.is_tombstoned())
        else {
            return Err(StoreError::NotFound);
        };
        stored.attributes = task.attributes.clone();
        Ok(())
    }

    async fn mark_deleted(&self, task_id: TaskId, owner_id: UserId) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let Some(task) = state
            .tasks
            .get_mut(&task_id)
            .filter(|t| t.is_owned_by(owner_id))
        else {
            return Err(StoreError::NotFound);
        };
        if task.mark_deleted() {
            Ok(())
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn delete_all_tombstoned(&self) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let before = state.tasks.len();
        state.tasks.retain(|_, t| !t.is_tombstoned());
        Ok((before - state.tasks.len()) as u64)
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let state = self.state.lock().await;
        let mut users: Vec<User> = state.users.values().cloned().collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn insert_user(&self, user: User) -> StoreResult<User> {
        let mut state = self.state.lock().await;
        let taken = state
            .users
            .values()
            .any(|u| u.id == user.id || u.email.eq_ignore_ascii_case(&user.email));
        if taken {
            return Err(StoreError::AlreadyExists("user"));
        }
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, user_id: UserId) -> StoreResult<User> {
        let state = self.state.lock().await;
        state.users.get(&user_id).cloned().ok_or(StoreError::NotFound)
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<User> {
        let state = self.state.lock().await;
        state
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update_user(&self, user: User) -> StoreResult<User> {
        let mut state = self.state.lock().await;
        let email_taken = state
            .users
            .values()
            .any(|u| u.id != user.id && u.email.eq_ignore_ascii_case(&user.email));
        if email_taken {
            return Err(StoreError::AlreadyExists("user"));
        }
        let Some(stored) = state.users.get_mut(&user.id) else {
            return Err(StoreError::NotFound);
        };
        *stored = user.clone();
        Ok(user)
    }

    async fn delete_user(&self, user_id: UserId) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state
            .users
            .remove(&user_id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskAttributes, TaskStatus};
    use ulid::Ulid;

    fn task_for(owner: UserId, title: &str) -> Task {
        Task::new(
            TaskId::from_ulid(Ulid::new()),
            owner,
            TaskAttributes::new(TaskStatus::New, title, ""),
        )
    }

    fn user(email: &str) -> User {
        User {
            id: UserId::from_ulid(Ulid::new()),
            name: "someone".to_string(),
            email: email.to_string(),
            password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string(),
        }
    }

    #[tokio::test]
    async fn reads_are_scoped_to_owner() {
        let store = InMemoryStore::new();
        let alice = UserId::from_ulid(Ulid::new());
        let bob = UserId::from_ulid(Ulid::new());
        let task = task_for(alice, "a");
        store.insert_task(task.clone()).await.unwrap();

        assert_eq!(store.list_by_owner(alice).await.unwrap().len(), 1);
        assert!(store.list_by_owner(bob).await.unwrap().is_empty());
        assert_eq!(store.get_by_id(task.id, alice).await.unwrap(), task);
        assert_eq!(
            store.get_by_id(task.id, bob).await.unwrap_err(),
            StoreError::NotFound
        );
    }

    #[tokio::test]
    async fn duplicate_task_id_is_rejected() {
        let store = InMemoryStore::new();
        let task = task_for(UserId::from_ulid(Ulid::new()), "a");
        store.insert_task(task.clone()).await.unwrap();
        assert_eq!(
            store.insert_task(task).await.unwrap_err(),
            StoreError::AlreadyExists("task")
        );
    }

    #[tokio::test]
    async fn tombstoned_rows_are_hidden_but_still_present() {
        let store = InMemoryStore::new();
        let owner = UserId::from_ulid(Ulid::new());
        let task = task_for(owner, "a");
        store.insert_task(task.clone()).await.unwrap();

        store.mark_deleted(task.id, owner).await.unwrap();

        assert!(store.list_by_owner(owner).await.unwrap().is_empty());
        assert_eq!(
            store.get_by_id(task.id, owner).await.unwrap_err(),
            StoreError::NotFound
        );
        assert!(store.contains_row(task.id).await);
        assert_eq!(store.tombstoned_count().await, 1);
    }

    #[tokio::test]
    async fn mark_deleted_requires_matching_owner_and_active_row() {
        let store = InMemoryStore::new();
        let owner = UserId::from_ulid(Ulid::new());
        let stranger = UserId::from_ulid(Ulid::new());
        let task = task_for(owner, "a");
        store.insert_task(task.clone()).await.unwrap();

        assert_eq!(
            store.mark_deleted(task.id, stranger).await.unwrap_err(),
            StoreError::NotFound
        );
        assert_eq!(
            store
                .mark_deleted(TaskId::from_ulid(Ulid::new()), owner)
                .await
                .unwrap_err(),
            StoreError::NotFound
        );

        store.mark_deleted(task.id, owner).await.unwrap();
        // 二度目は存在しない扱い
        assert_eq!(
            store.mark_deleted(task.id, owner).await.unwrap_err(),
            StoreError::NotFound
        );
    }

    #[tokio::test]
    async fn update_of_tombstoned_task_is_not_found() {
        let store = InMemoryStore::new();
        let owner = UserId::from_ulid(Ulid::new());
        let mut task = task_for(owner, "a");
        store.insert_task(task.clone()).await.unwrap();
        store.mark_deleted(task.id, owner).await.unwrap();

        task.attributes.title = "b".to_string();
        assert_eq!(
            store.update_task_attributes(&task).await.unwrap_err(),
            StoreError::NotFound
        );
    }

    #[tokio::test]
    async fn purge_removes_only_tombstoned_rows_across_owners() {
        let store = InMemoryStore::new();
        let alice = UserId::from_ulid(Ulid::new());
        let bob = UserId::from_ulid(Ulid::new());
        let a1 = task_for(alice, "a1");
        let a2 = task_for(alice, "a2");
        let b1 = task_for(bob, "b1");
        for t in [&a1, &a2, &b1] {
            store.insert_task(t.clone()).await.unwrap();
        }
        store.mark_deleted(a1.id, alice).await.unwrap();
        store.mark_deleted(b1.id, bob).await.unwrap();

        assert_eq!(store.delete_all_tombstoned().await.unwrap(), 2);
        assert_eq!(store.physical_task_count().await, 1);
        assert!(store.contains_row(a2.id).await);

        // 冪等: 二回目は 0 件
        assert_eq!(store.delete_all_tombstoned().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn user_email_is_unique_case_insensitively() {
        let store = InMemoryStore::new();
        store.insert_user(user("ann@example.com")).await.unwrap();
        assert_eq!(
            store.insert_user(user("ANN@example.com")).await.unwrap_err(),
            StoreError::AlreadyExists("user")
        );
    }

    #[tokio::test]
    async fn user_crud_roundtrip() {
        let store = InMemoryStore::new();
        let mut ann = store.insert_user(user("ann@example.com")).await.unwrap();

        assert_eq!(
            store.get_user_by_email("ann@example.com").await.unwrap().id,
            ann.id
        );

        ann.name = "Ann".to_string();
        store.update_user(ann.clone()).await.unwrap();
        assert_eq!(store.get_user(ann.id).await.unwrap().name, "Ann");

        store.delete_user(ann.id).await.unwrap();
        assert_eq!(
            store.get_user(ann.id).await.unwrap_err(),
            StoreError::NotFound
        );
        assert_eq!(
            store.delete_user(ann.id).await.unwrap_err(),
            StoreError::NotFound
        );
    }
}
