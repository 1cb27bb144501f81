//! UserStore port - ユーザーの正本

use async_trait::async_trait;

use crate::domain::{StoreResult, User, UserId};

/// UserStore holds user accounts. Emails are unique across users.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn list_users(&self) -> StoreResult<Vec<User>>;

    /// Duplicate email is `AlreadyExists("user")`.
    async fn insert_user(&self, user: User) -> StoreResult<User>;

    async fn get_user(&self, user_id: UserId) -> StoreResult<User>;

    async fn get_user_by_email(&self, email: &str) -> StoreResult<User>;

    async fn update_user(&self, user: User) -> StoreResult<User>;

    async fn delete_user(&self, user_id: UserId) -> StoreResult<()>;
}
