//! Read-model objects consulted by the identity rules.

use serde::{Deserialize, Serialize};

use cmdproc_core::UserId;
use cmdproc_rules::ObjectType;

/// `user/<user_id>`: the registered user.
pub const USER: ObjectType = ObjectType::from_static("user");
/// `email/<address>`: present while an address is claimed.
pub const EMAIL: ObjectType = ObjectType::from_static("email");
/// `username/<name>`: present while a username is claimed.
pub const USERNAME: ObjectType = ObjectType::from_static("username");
/// `role_users/<role>`: members of a role.
pub const ROLE_USERS: ObjectType = ObjectType::from_static("role_users");

pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserObject {
    pub user_id: UserId,
    pub email: String,
    pub username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleUsersObject {
    #[serde(default)]
    pub user_ids: Vec<UserId>,
}

impl RoleUsersObject {
    pub fn contains(&self, user_id: &UserId) -> bool {
        self.user_ids.iter().any(|u| u == user_id)
    }
}
