//! TaskService - タスク CRUD のオーケストレーション
//!
//! 削除は同期的には行わない。mark_deleted 成功後に TombstoneNotifier へ通知し、
//! 物理削除は BatchCompactor に任せる。

use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::{Task, TaskAttributes, TaskError, TaskId, UserId};
use crate::ports::{IdGenerator, TaskStore, TombstoneNotifier};

pub struct TaskService {
    store: Arc<dyn TaskStore>,
    notifier: Arc<dyn TombstoneNotifier>,
    ids: Arc<dyn IdGenerator>,
}

impl TaskService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        notifier: Arc<dyn TombstoneNotifier>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            store,
            notifier,
            ids,
        }
    }

    pub async fn list_tasks(&self, owner_id: UserId) -> Result<Vec<Task>, TaskError> {
        Ok(self.store.list_by_owner(owner_id).await?)
    }

    pub async fn get_task(&self, task_id: &str, owner_id: UserId) -> Result<Task, TaskError> {
        let task_id = parse_task_id(task_id)?;
        Ok(self.store.get_by_id(task_id, owner_id).await?)
    }

    pub async fn create_task(
        &self,
        attributes: TaskAttributes,
        owner_id: UserId,
    ) -> Result<TaskId, TaskError> {
        attributes.validate()?;
        let task = Task::new(self.ids.generate_task_id(), owner_id, attributes);
        let task_id = task.id;
        self.store.insert_task(task).await?;
        debug!(task_id = %task_id, owner_id = %owner_id, "task created");
        Ok(task_id)
    }

    pub async fn update_task(
        &self,
        task_id: &str,
        owner_id: UserId,
        attributes: TaskAttributes,
    ) -> Result<Task, TaskError> {
        attributes.validate()?;
        let task_id = parse_task_id(task_id)?;
        let mut task = self.store.get_by_id(task_id, owner_id).await?;
        task.attributes = attributes;
        self.store.update_task_attributes(&task).await?;
        Ok(task)
    }

    /// Tombstones the task and signals the compactor.
    ///
    /// The notifier is only called after the store accepted the tombstone.
    pub async fn delete_task(&self, task_id: &str, owner_id: UserId) -> Result<(), TaskError> {
        let task_id = parse_task_id(task_id)?;
        self.store.mark_deleted(task_id, owner_id).await?;
        self.notifier.notify();
        info!(task_id = %task_id, owner_id = %owner_id, "task tombstoned");
        Ok(())
    }
}

fn parse_task_id(raw: &str) -> Result<TaskId, TaskError> {
    if raw.trim().is_empty() {
        return Err(TaskError::EmptyId("task id"));
    }
    raw.parse::<TaskId>()
        .map_err(|e| TaskError::InvalidId(e.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{StoreError, TaskStatus};
    use crate::impls::InMemoryStore;
    use crate::ports::{SystemClock, UlidGenerator};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use ulid::Ulid;

    #[derive(Default)]
    struct CountingNotifier {
        calls: AtomicUsize,
    }

    impl TombstoneNotifier for CountingNotifier {
        fn notify(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn service() -> (TaskService, Arc<InMemoryStore>, Arc<CountingNotifier>) {
        let store = Arc::new(InMemoryStore::new());
        let notifier = Arc::new(CountingNotifier::default());
        let svc = TaskService::new(
            store.clone(),
            notifier.clone(),
            Arc::new(UlidGenerator::new(SystemClock)),
        );
        (svc, store, notifier)
    }

    fn attrs(title: &str) -> TaskAttributes {
        TaskAttributes::new(TaskStatus::New, title, "")
    }

    #[tokio::test]
    async fn create_then_get_and_list() {
        let (svc, _, _) = service();
        let owner = UserId::from_ulid(Ulid::new());

        let id = svc.create_task(attrs("buy milk"), owner).await.unwrap();

        let task = svc.get_task(&id.to_string(), owner).await.unwrap();
        assert_eq!(task.attributes.title, "buy milk");
        assert_eq!(task.owner_id, owner);
        assert_eq!(svc.list_tasks(owner).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_rejects_invalid_attributes() {
        let (svc, _, _) = service();
        let err = svc
            .create_task(attrs("  "), UserId::from_ulid(Ulid::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidTitle(_)));
    }

    #[tokio::test]
    async fn get_rejects_empty_and_malformed_ids() {
        let (svc, _, _) = service();
        let owner = UserId::from_ulid(Ulid::new());
        assert!(matches!(
            svc.get_task("", owner).await,
            Err(TaskError::EmptyId(_))
        ));
        assert!(matches!(
            svc.get_task("nope", owner).await,
            Err(TaskError::InvalidId(_))
        ));
    }

    #[tokio::test]
    async fn update_replaces_attributes() {
        let (svc, _, _) = service();
        let owner = UserId::from_ulid(Ulid::new());
        let id = svc.create_task(attrs("draft"), owner).await.unwrap();

        let updated = svc
            .update_task(
                &id.to_string(),
                owner,
                TaskAttributes::new(TaskStatus::Done, "final", "shipped"),
            )
            .await
            .unwrap();
        assert_eq!(updated.attributes.status, TaskStatus::Done);

        let stored = svc.get_task(&id.to_string(), owner).await.unwrap();
        assert_eq!(stored.attributes.title, "final");
    }

    #[tokio::test]
    async fn delete_tombstones_and_notifies_once() {
        let (svc, store, notifier) = service();
        let owner = UserId::from_ulid(Ulid::new());
        let id = svc.create_task(attrs("old"), owner).await.unwrap();

        svc.delete_task(&id.to_string(), owner).await.unwrap();

        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
        assert!(svc.list_tasks(owner).await.unwrap().is_empty());
        assert!(store.contains_row(id).await);
    }

    #[tokio::test]
    async fn failed_delete_does_not_notify() {
        let (svc, _, notifier) = service();
        let owner = UserId::from_ulid(Ulid::new());
        let id = svc.create_task(attrs("mine"), owner).await.unwrap();

        let stranger = UserId::from_ulid(Ulid::new());
        let err = svc.delete_task(&id.to_string(), stranger).await.unwrap_err();
        assert!(matches!(err, TaskError::Store(StoreError::NotFound)));

        svc.delete_task(&id.to_string(), owner).await.unwrap();
        let err = svc.delete_task(&id.to_string(), owner).await.unwrap_err();
        assert!(matches!(err, TaskError::Store(StoreError::NotFound)));

        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    }
}
