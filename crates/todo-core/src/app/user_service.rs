//! UserService - 登録・ログイン・プロフィール更新

use std::sync::Arc;

use argon2::password_hash::{self, SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use tracing::info;

use crate::domain::{StoreError, User, UserError, UserId, UserLoginRequest, UserRequest};
use crate::ports::{IdGenerator, UserStore};

pub struct UserService {
    store: Arc<dyn UserStore>,
    ids: Arc<dyn IdGenerator>,
}

impl UserService {
    pub fn new(store: Arc<dyn UserStore>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { store, ids }
    }

    pub async fn list_users(&self) -> Result<Vec<User>, UserError> {
        Ok(self.store.list_users().await?)
    }

    pub async fn get_user(&self, user_id: &str) -> Result<User, UserError> {
        let user_id = parse_user_id(user_id)?;
        Ok(self.store.get_user(user_id).await?)
    }

    pub async fn register(&self, request: UserRequest) -> Result<User, UserError> {
        request.validate()?;
        let user = User {
            id: self.ids.generate_user_id(),
            name: request.name.trim().to_string(),
            email: request.email.trim().to_string(),
            password_hash: hash_off_thread(request.password).await?,
        };
        let user = self.store.insert_user(user).await?;
        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    /// Unknown email and wrong password both map to `InvalidCredentials`.
    pub async fn login(&self, request: UserLoginRequest) -> Result<User, UserError> {
        let user = match self.store.get_user_by_email(request.email.trim()).await {
            Ok(user) => user,
            Err(err) if err.is_not_found() => return Err(UserError::InvalidCredentials),
            Err(err) => return Err(err.into()),
        };
        if !verify_off_thread(request.password, user.password_hash.clone()).await? {
            return Err(UserError::InvalidCredentials);
        }
        Ok(user)
    }

    pub async fn update_user(&self, user_id: &str, request: UserRequest) -> Result<User, UserError> {
        request.validate()?;
        let user_id = parse_user_id(user_id)?;
        let mut user = self.store.get_user(user_id).await?;
        user.name = request.name.trim().to_string();
        user.email = request.email.trim().to_string();
        user.password_hash = hash_off_thread(request.password).await?;
        Ok(self.store.update_user(user).await?)
    }

    pub async fn delete_user(&self, user_id: &str) -> Result<(), UserError> {
        let user_id = parse_user_id(user_id)?;
        self.store.delete_user(user_id).await?;
        info!(user_id = %user_id, "user deleted");
        Ok(())
    }
}

fn parse_user_id(raw: &str) -> Result<UserId, UserError> {
    if raw.trim().is_empty() {
        return Err(UserError::EmptyField("user id"));
    }
    // 不正な ID は存在しないユーザーと同じ扱い
    raw.parse::<UserId>()
        .map_err(|_| UserError::Store(StoreError::NotFound))
}

/// Argon2id hash in PHC string form (`$argon2id$v=19$...`), fresh salt per call.
pub fn hash_password(password: &str) -> Result<String, UserError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| UserError::Hashing(err.to_string()))
}

/// `Ok(false)` on a wrong password; `MalformedHash` when `stored` is not a
/// usable PHC string.
pub fn verify_password(password: &str, stored: &str) -> Result<bool, UserError> {
    let parsed = PasswordHash::new(stored).map_err(|_| UserError::MalformedHash)?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(_) => Err(UserError::MalformedHash),
    }
}

// argon2 は CPU を占有するので blocking pool で実行する
async fn hash_off_thread(password: String) -> Result<String, UserError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|err| UserError::Hashing(err.to_string()))?
}

async fn verify_off_thread(password: String, stored: String) -> Result<bool, UserError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &stored))
        .await
        .map_err(|err| UserError::Hashing(err.to_string()))?
}
