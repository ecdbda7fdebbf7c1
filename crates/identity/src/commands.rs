//! Command payloads accepted by the identity rules.
//!
//! Field types check their shape while decoding, so a malformed payload is
//! rejected as an invalid command before any handler runs.

use serde::{Deserialize, Deserializer};

use cmdproc_core::UserId;

#[derive(Debug, Clone, Deserialize)]
pub struct Register {
    #[serde(deserialize_with = "non_blank_user_id")]
    pub user_id: UserId,
    pub email: Email,
    pub username: Username,
    #[serde(default)]
    pub salted_hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeEmail {
    pub new_email: Email,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeUsername {
    pub new_username: Username,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignRole {
    #[serde(deserialize_with = "non_blank_user_id")]
    pub user_id: UserId,
    pub role: RoleName,
}

/// `local@domain`, no whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Email(String);

/// Non-empty, no whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Username(String);

/// Non-blank role name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct RoleName(String);

impl Email {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Username {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl RoleName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Email {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let well_formed = match value.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty() && !domain.is_empty() && !value.contains(char::is_whitespace)
            }
            None => false,
        };
        if well_formed {
            Ok(Self(value))
        } else {
            Err(format!("malformed email {value:?}"))
        }
    }
}

impl TryFrom<String> for Username {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() || value.contains(char::is_whitespace) {
            return Err(format!("malformed username {value:?}"));
        }
        Ok(Self(value))
    }
}

impl TryFrom<String> for RoleName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            return Err("blank role".to_string());
        }
        Ok(Self(value))
    }
}

fn non_blank_user_id<'de, D>(deserializer: D) -> Result<UserId, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}
