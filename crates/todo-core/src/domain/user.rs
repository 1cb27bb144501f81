//! User record and request payloads.

use serde::{Deserialize, Serialize};

use super::errors::UserError;
use super::ids::UserId;

pub const MIN_PASSWORD_CHARS: usize = 8;

/// Stored user. `password_hash` is an Argon2id PHC string, never plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
}

/// Registration / profile update payload.
#[derive(Debug, Clone, Deserialize)]
pub struct UserRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl UserRequest {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn validate(&self) -> Result<(), UserError> {
        if self.name.trim().is_empty() {
            return Err(UserError::EmptyField("name"));
        }
        validate_email(&self.email)?;
        if self.password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(UserError::WeakPassword(MIN_PASSWORD_CHARS));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserLoginRequest {
    pub email: String,
    pub password: String,
}

impl UserLoginRequest {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

fn validate_email(email: &str) -> Result<(), UserError> {
    let trimmed = email.trim();
    let mut parts = trimmed.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(UserError::InvalidEmail(email.to_string()));
    };
    if local.is_empty() || domain.is_empty() || trimmed.contains(char::is_whitespace) {
        return Err(UserError::InvalidEmail(email.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn valid_request_passes() {
        let req = UserRequest::new("Ann", "ann@example.com", "correct-horse");
        assert!(req.validate().is_ok());
    }

    #[rstest]
    #[case::no_at("ann.example.com")]
    #[case::two_at("ann@@example.com")]
    #[case::empty_local("@example.com")]
    #[case::empty_domain("ann@")]
    #[case::space("an n@example.com")]
    fn invalid_emails_are_rejected(#[case] email: &str) {
        let req = UserRequest::new("Ann", email, "correct-horse");
        assert!(matches!(req.validate(), Err(UserError::InvalidEmail(_))));
    }

    #[test]
    fn short_password_and_blank_name_are_rejected() {
        let req = UserRequest::new("Ann", "ann@example.com", "short");
        assert!(matches!(req.validate(), Err(UserError::WeakPassword(8))));

        let req = UserRequest::new("  ", "ann@example.com", "correct-horse");
        assert!(matches!(req.validate(), Err(UserError::EmptyField("name"))));
    }

    #[test]
    fn password_hash_is_not_serialized() {
        let user = User {
            id: UserId::from_ulid(ulid::Ulid::new()),
            name: "Ann".to_string(),
            email: "ann@example.com".to_string(),
            password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("password_hash"));
        assert!(!json.contains("argon2id"));
    }
}
