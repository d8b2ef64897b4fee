//! User domain entity
//!
//! Authentication lives outside the core; callers arrive with a resolved
//! user id and role. The entity exists so the admin surface can enumerate
//! users.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

impl Default for UserRole {
    fn default() -> Self {
        Self::User
    }
}

/// User model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role: UserRole,
    pub registered_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: i64, username: impl Into<String>, role: UserRole) -> Self {
        Self {
            id,
            username: username.into(),
            role,
            registered_at: Utc::now(),
        }
    }
}
