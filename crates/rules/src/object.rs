use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Name of a read-model object kind (e.g. "user", "email").
///
/// Object types are opaque at this layer; rule catalogs define their own
/// constants with [`ObjectType::from_static`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectType(Cow<'static, str>);

impl ObjectType {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for ObjectType {
    fn from(value: &'static str) -> Self {
        Self::from_static(value)
    }
}

impl From<String> for ObjectType {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}
