//! Errors - エラー型と分類
//!
//! - StoreError: 永続化層のエラー（NotFound は呼び出し元へそのまま返す）
//! - TaskError / UserError: サービス層のバリデーションエラー + StoreError

use thiserror::Error;

/// Errors surfaced by `TaskStore` / `UserStore` implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No active row matched (tombstoned rows count as absent).
    #[error("found nothing")]
    NotFound,

    #[error("{0} already exists")]
    AlreadyExists(&'static str),

    /// Connectivity / driver / transaction failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        StoreError::Backend(err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("empty inserted string: {0}")]
    EmptyId(&'static str),

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("wrong status `{0}`; expected new|in_progress|done")]
    WrongStatus(String),

    #[error("invalid title: {0}")]
    InvalidTitle(String),

    #[error("invalid description: {0}")]
    InvalidDescription(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum UserError {
    #[error("empty insert: {0} is required")]
    EmptyField(&'static str),

    #[error("invalid email `{0}`")]
    InvalidEmail(String),

    #[error("password must be at least {0} characters")]
    WeakPassword(usize),

    #[error("the creds are invalid")]
    InvalidCredentials,

    #[error("malformed password hash")]
    MalformedHash,

    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
