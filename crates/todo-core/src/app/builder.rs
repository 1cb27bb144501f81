//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! ストア・コンパクタ・サービスを AppConfig から組み立てる。
//! 設定の不備は build() の時点でエラーにする（Fail-fast）。

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::compactor::{BatchCompactor, CompactorError};
use super::status::CompactorStatus;
use super::task_service::TaskService;
use super::user_service::UserService;
use crate::config::{AppConfig, StorageBackend};
use crate::domain::StoreError;
use crate::impls::{InMemoryStore, SqliteStore};
use crate::ports::{IdGenerator, SystemClock, TaskStore, UlidGenerator, UserStore};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(AppConfig::load(None)?).build()?;
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// app.start(shutdown_rx)?;
/// // ...
/// app.shutdown().await; // flushes and ends the loop
/// ```
///
/// # Fail-fast 設計
/// - capacity / tick interval / store timeout が 0 なら BuildError
/// - sqlite バックエンドで path が無ければ BuildError
/// - ストアのオープン失敗も BuildError
pub struct AppBuilder {
    config: AppConfig,
    stores: Option<(Arc<dyn TaskStore>, Arc<dyn UserStore>)>,
    ids: Option<Arc<dyn IdGenerator>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid compactor settings: {0}")]
    Compactor(#[from] CompactorError),

    #[error("storage backend `sqlite` requires storage.path")]
    MissingSqlitePath,

    #[error("failed to open store: {0}")]
    Store(#[from] StoreError),
}

impl AppBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            stores: None,
            ids: None,
        }
    }

    /// Use the given stores instead of the configured backend.
    pub fn with_stores(
        mut self,
        tasks: Arc<dyn TaskStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        self.stores = Some((tasks, users));
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        let compactor_config = self.config.compactor.to_compactor_config();
        compactor_config.validate()?;

        let (task_store, user_store) = match self.stores {
            Some(stores) => stores,
            None => open_stores(&self.config)?,
        };
        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(UlidGenerator::new(SystemClock)),
        };

        let compactor = Arc::new(BatchCompactor::new(task_store.clone(), compactor_config)?);
        let tasks = TaskService::new(task_store, compactor.clone(), ids.clone());
        let users = UserService::new(user_store, ids);

        info!(
            backend = ?self.config.storage.backend,
            capacity = compactor_config.capacity,
            "application built"
        );

        Ok(App {
            compactor,
            tasks,
            users,
            loop_handle: std::sync::Mutex::new(None),
        })
    }
}

fn open_stores(
    config: &AppConfig,
) -> Result<(Arc<dyn TaskStore>, Arc<dyn UserStore>), BuildError> {
    match config.storage.backend {
        StorageBackend::Memory => {
            let store = Arc::new(InMemoryStore::new());
            let tasks: Arc<dyn TaskStore> = store.clone();
            let users: Arc<dyn UserStore> = store;
            Ok((tasks, users))
        }
        StorageBackend::Sqlite => {
            let path = config
                .storage
                .path
                .as_ref()
                .ok_or(BuildError::MissingSqlitePath)?;
            let store = Arc::new(SqliteStore::open(path)?);
            let tasks: Arc<dyn TaskStore> = store.clone();
            let users: Arc<dyn UserStore> = store;
            Ok((tasks, users))
        }
    }
}

/// Wired application: services plus the compactor they feed.
pub struct App {
    pub compactor: Arc<BatchCompactor>,
    pub tasks: TaskService,
    pub users: UserService,
    loop_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl App {
    /// Spawn the compactor loop. It ends when `shutdown` flips to `true` or
    /// when [`App::shutdown`] runs.
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Result<(), CompactorError> {
        let handle = self.compactor.start(shutdown)?;
        if let Ok(mut slot) = self.loop_handle.lock() {
            *slot = Some(handle);
        }
        Ok(())
    }

    pub fn status(&self) -> CompactorStatus {
        self.compactor.status()
    }

    /// Run the final flush, then wait for the loop to exit.
    ///
    /// Works whether or not the shutdown signal passed to `start` was sent.
    /// A failed flush is logged and returned; teardown is not interrupted.
    pub async fn shutdown(&self) -> Result<u64, CompactorError> {
        let result = self.compactor.stop().await;
        if let Err(err) = &result {
            warn!(error = %err, "final compaction failed during shutdown");
        }

        let handle = self.loop_handle.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "compactor loop task ended abnormally");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::compactor::CompactorState;
    use crate::domain::{TaskAttributes, TaskStatus, UserRequest};
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use std::time::Duration;

    fn config_with(capacity: usize, tick_ms: u64, timeout_ms: u64) -> AppConfig {
        let mut config = AppConfig::default();
        config.compactor.capacity = capacity;
        config.compactor.tick_interval_ms = tick_ms;
        config.compactor.store_timeout_ms = timeout_ms;
        config
    }

    #[rstest]
    #[case::zero_capacity(0, 2000, 5000)]
    #[case::zero_interval(10, 0, 5000)]
    #[case::zero_timeout(10, 2000, 0)]
    fn build_rejects_zero_settings(#[case] c: usize, #[case] t: u64, #[case] d: u64) {
        let result = AppBuilder::new(config_with(c, t, d)).build();
        assert!(matches!(
            result,
            Err(BuildError::Compactor(CompactorError::InvalidConfig(_)))
        ));
    }

    #[test]
    fn sqlite_without_path_fails_fast() {
        let mut config = AppConfig::default();
        config.storage.backend = StorageBackend::Sqlite;
        assert!(matches!(
            AppBuilder::new(config).build(),
            Err(BuildError::MissingSqlitePath)
        ));
    }

    #[tokio::test]
    async fn sqlite_backend_opens_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.backend = StorageBackend::Sqlite;
        config.storage.path = Some(dir.path().join("todo.db"));

        let app = AppBuilder::new(config).build().unwrap();
        let user = app
            .users
            .register(UserRequest::new("Ann", "ann@example.com", "correct-horse"))
            .await
            .unwrap();
        assert_eq!(app.users.list_users().await.unwrap(), vec![user]);
    }

    #[tokio::test]
    async fn wired_delete_feeds_the_compactor() {
        let app = AppBuilder::new(AppConfig::default()).build().unwrap();
        let user = app
            .users
            .register(UserRequest::new("Ann", "ann@example.com", "correct-horse"))
            .await
            .unwrap();
        let id = app
            .tasks
            .create_task(TaskAttributes::new(TaskStatus::New, "t", ""), user.id)
            .await
            .unwrap();

        app.tasks.delete_task(&id.to_string(), user.id).await.unwrap();
        assert_eq!(app.status().pending, 1);

        let (_tx, rx) = watch::channel(false);
        app.start(rx).unwrap();
        assert_eq!(app.status().state, CompactorState::Running);
    }

    #[tokio::test]
    async fn shutdown_flushes_and_stops() {
        let store = Arc::new(InMemoryStore::new());
        let app = AppBuilder::new(AppConfig::default())
            .with_stores(store.clone(), store.clone())
            .build()
            .unwrap();
        let owner = app
            .users
            .register(UserRequest::new("Ann", "ann@example.com", "correct-horse"))
            .await
            .unwrap()
            .id;
        let id = app
            .tasks
            .create_task(TaskAttributes::new(TaskStatus::New, "t", ""), owner)
            .await
            .unwrap();
        app.tasks.delete_task(&id.to_string(), owner).await.unwrap();

        let (tx, rx) = watch::channel(false);
        app.start(rx).unwrap();
        tx.send(true).unwrap();

        assert_eq!(app.shutdown().await.unwrap(), 1);
        assert_eq!(store.physical_task_count().await, 0);
        let status = app.status();
        assert_eq!(status.state, CompactorState::Stopped);
        assert!(!status.loop_active);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_without_signal_still_returns() {
        let app = AppBuilder::new(AppConfig::default()).build().unwrap();
        let (_tx, rx) = watch::channel(false);
        app.start(rx).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(6), app.shutdown())
            .await
            .expect("shutdown must not wait for the external signal");
        assert_eq!(result.unwrap(), 0);
        assert!(!app.status().loop_active);
        assert_eq!(app.status().state, CompactorState::Stopped);
    }

    #[tokio::test]
    async fn injected_id_generator_is_used() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let app = AppBuilder::new(AppConfig::default())
            .with_id_generator(Arc::new(UlidGenerator::new(FixedClock::new(at))))
            .build()
            .unwrap();

        let user = app
            .users
            .register(UserRequest::new("Ann", "ann@example.com", "correct-horse"))
            .await
            .unwrap();
        let task_id = app
            .tasks
            .create_task(TaskAttributes::new(TaskStatus::New, "t", ""), user.id)
            .await
            .unwrap();

        let expected = at.timestamp_millis() as u64;
        assert_eq!(user.id.as_ulid().timestamp_ms(), expected);
        assert_eq!(task_id.as_ulid().timestamp_ms(), expected);
    }
}
