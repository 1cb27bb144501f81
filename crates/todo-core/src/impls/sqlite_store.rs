//! SqliteStore - rusqlite による永続ストア
//!
//! # 実装詳細
//! - `Arc<std::sync::Mutex<Connection>>` を共有し、各呼び出しは spawn_blocking で実行
//! - スキーマは `PRAGMA user_version` で管理
//! - delete_all_tombstoned は 1 トランザクション。失敗時は drop で rollback

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{error, info};

use crate::domain::{
    StoreError, StoreResult, Task, TaskAttributes, TaskId, TaskStatus, User, UserId,
};
use crate::ports::{TaskStore, UserStore};

const SCHEMA_VERSION: u32 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    email         TEXT NOT NULL UNIQUE COLLATE NOCASE,
    password_hash TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS tasks (
    id          TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL,
    status      TEXT NOT NULL,
    title       TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    deleted     INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_tasks_user_id ON tasks (user_id);
CREATE INDEX IF NOT EXISTS idx_tasks_deleted ON tasks (deleted) WHERE deleted = 1;
";

const TASK_SELECT_SQL: &str =
    "SELECT id, user_id, status, title, description, deleted FROM tasks";

const USER_SELECT_SQL: &str = "SELECT id, name, email, password_hash FROM users";

/// SQLite-backed task/user store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) a database file and applies the schema.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|err| {
            error!(event = "db_open", mode = "file", path = %path.display(), error = %err);
            StoreError::backend(err)
        })?;
        info!(event = "db_open", mode = "file", path = %path.display());
        Self::bootstrap(conn)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::backend)?;
        info!(event = "db_open", mode = "memory");
        Self::bootstrap(conn)
    }

    fn bootstrap(mut conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(StoreError::backend)?;
        apply_schema(&mut conn).map_err(StoreError::backend)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("connection mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("blocking task failed: {e}")))?
    }
}

fn apply_schema(conn: &mut Connection) -> rusqlite::Result<()> {
    let current: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if current >= SCHEMA_VERSION {
        return Ok(());
    }
    let tx = conn.transaction()?;
    tx.execute_batch(SCHEMA_V1)?;
    tx.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
    tx.commit()
}

fn sql_err(err: rusqlite::Error) -> StoreError {
    StoreError::backend(err)
}

/// UNIQUE / PRIMARY KEY only; NOT NULL and CHECK failures stay backend errors.
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
    )
}

fn parse_column<T: std::str::FromStr>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    raw.parse::<T>().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unparseable value `{raw}`").into(),
        )
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let status: String = row.get(2)?;
    Ok(Task {
        id: parse_column::<TaskId>(0, &id)?,
        owner_id: parse_column::<UserId>(1, &user_id)?,
        attributes: TaskAttributes {
            status: parse_column::<TaskStatus>(2, &status)?,
            title: row.get(3)?,
            description: row.get(4)?,
        },
        deleted: row.get::<_, i64>(5)? != 0,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    Ok(User {
        id: parse_column::<UserId>(0, &id)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
    })
}

// 保存形式は prefix なしの ULID 文字列
fn key<T: crate::domain::IdMarker>(id: crate::domain::Id<T>) -> String {
    id.as_ulid().to_string()
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn list_by_owner(&self, owner_id: UserId) -> StoreResult<Vec<Task>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "{TASK_SELECT_SQL} WHERE user_id = ?1 AND deleted = 0 ORDER BY id"
                ))
                .map_err(sql_err)?;
            let rows = stmt
                .query_map(params![key(owner_id)], task_from_row)
                .map_err(sql_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sql_err)
        })
        .await
    }

    async fn get_by_id(&self, task_id: TaskId, owner_id: UserId) -> StoreResult<Task> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("{TASK_SELECT_SQL} WHERE id = ?1 AND user_id = ?2 AND deleted = 0"),
                params![key(task_id), key(owner_id)],
                task_from_row,
            )
            .optional()
            .map_err(sql_err)?
            .ok_or(StoreError::NotFound)
        })
        .await
    }

    async fn insert_task(&self, task: Task) -> StoreResult<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO tasks (id, user_id, status, title, description, deleted)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0)",
                params![
                    key(task.id),
                    key(task.owner_id),
                    task.attributes.status.as_str(),
                    task.attributes.title,
                    task.attributes.description,
                ],
            )
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::AlreadyExists("task")
                } else {
                    sql_err(err)
                }
            })?;
            Ok(())
        })
        .await
    }

    async fn update_task_attributes(&self, task: &Task) -> StoreResult<()> {
        let task = task.clone();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE tasks SET status = ?1, title = ?2, description = ?3
                     WHERE id = ?4 AND user_id = ?5 AND deleted = 0",
                    params![
                        task.attributes.status.as_str(),
                        task.attributes.title,
                        task.attributes.description,
                        key(task.id),
                        key(task.owner_id),
                    ],
                )
                .map_err(sql_err)?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    async fn mark_deleted(&self, task_id: TaskId, owner_id: UserId) -> StoreResult<()> {
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE tasks SET deleted = 1 WHERE id = ?1 AND user_id = ?2 AND deleted = 0",
                    params![key(task_id), key(owner_id)],
                )
                .map_err(sql_err)?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    async fn delete_all_tombstoned(&self) -> StoreResult<u64> {
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(sql_err)?;
            let purged = {
                let mut stmt = tx
                    .prepare_cached("DELETE FROM tasks WHERE deleted = 1")
                    .map_err(sql_err)?;
                stmt.execute([]).map_err(sql_err)?
            };
            tx.commit().map_err(sql_err)?;
            Ok(purged as u64)
        })
        .await
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn list_users(&self) -> StoreResult<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!("{USER_SELECT_SQL} ORDER BY id"))
                .map_err(sql_err)?;
            let rows = stmt.query_map([], user_from_row).map_err(sql_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(sql_err)
        })
        .await
    }

    async fn insert_user(&self, user: User) -> StoreResult<User> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO users (id, name, email, password_hash) VALUES (?1, ?2, ?3, ?4)",
                params![key(user.id), user.name, user.email, user.password_hash],
            )
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::AlreadyExists("user")
                } else {
                    sql_err(err)
                }
            })?;
            Ok(user)
        })
        .await
    }

    async fn get_user(&self, user_id: UserId) -> StoreResult<User> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("{USER_SELECT_SQL} WHERE id = ?1"),
                params![key(user_id)],
                user_from_row,
            )
            .optional()
            .map_err(sql_err)?
            .ok_or(StoreError::NotFound)
        })
        .await
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<User> {
        let email = email.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("{USER_SELECT_SQL} WHERE email = ?1"),
                params![email],
                user_from_row,
            )
            .optional()
            .map_err(sql_err)?
            .ok_or(StoreError::NotFound)
        })
        .await
    }

    async fn update_user(&self, user: User) -> StoreResult<User> {
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE users SET name = ?1, email = ?2, password_hash = ?3 WHERE id = ?4",
                    params![user.name, user.email, user.password_hash, key(user.id)],
                )
                .map_err(|err| {
                    if is_unique_violation(&err) {
                        StoreError::AlreadyExists("user")
                    } else {
                        sql_err(err)
                    }
                })?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(user)
        })
        .await
    }

    async fn delete_user(&self, user_id: UserId) -> StoreResult<()> {
        self.with_conn(move |conn| {
            let changed = conn
                .execute("DELETE FROM users WHERE id = ?1", params![key(user_id)])
                .map_err(sql_err)?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }
}
