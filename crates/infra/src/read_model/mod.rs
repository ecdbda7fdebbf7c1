//! Read-model ports: keyed object lookups and projection catch-up.
//!
//! A read-model is an external projector that applies committed event
//! batches in order and serves the resulting objects. The processor needs
//! two things from it: point lookups by `(type, id)` for rule evaluation,
//! and a way to wait until a given log position has been applied.

pub mod http;
pub mod in_memory;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use cmdproc_rules::ObjectType;

use crate::error::CollaboratorError;

pub use http::ObjectReducerClient;
pub use in_memory::InMemoryReadModel;

/// Result of a keyed lookup. Absence is an answer, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectLookup {
    Found(JsonValue),
    NotFound,
}

impl ObjectLookup {
    pub fn into_option(self) -> Option<JsonValue> {
        match self {
            ObjectLookup::Found(value) => Some(value),
            ObjectLookup::NotFound => None,
        }
    }
}

impl From<Option<JsonValue>> for ObjectLookup {
    fn from(value: Option<JsonValue>) -> Self {
        value.map_or(ObjectLookup::NotFound, ObjectLookup::Found)
    }
}

/// Keyed read access to projected objects.
#[async_trait]
pub trait ObjectReader: Send + Sync {
    async fn get_object(
        &self,
        object_type: &ObjectType,
        object_id: &str,
    ) -> Result<ObjectLookup, CollaboratorError>;
}

/// Projection progress of one read-model.
#[async_trait]
pub trait CatchUp: Send + Sync {
    /// Label used in logs.
    fn name(&self) -> &str;

    /// Resolve once the read-model has applied every batch up to and
    /// including `position`. May block for a long time.
    async fn wait_for(&self, position: u64) -> Result<(), CollaboratorError>;

    /// Highest position applied so far.
    async fn applied_position(&self) -> Result<u64, CollaboratorError>;
}
