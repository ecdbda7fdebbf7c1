use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::watch;

use cmdproc_rules::ObjectType;

use super::{CatchUp, ObjectLookup, ObjectReader};
use crate::error::CollaboratorError;

type ObjectKey = (ObjectType, String);

/// In-memory read-model.
///
/// Intended for tests/dev. Objects are written directly by whoever drives
/// the projection; `mark_applied` advances the catch-up position and wakes
/// any `wait_for` callers.
#[derive(Debug)]
pub struct InMemoryReadModel {
    name: String,
    objects: RwLock<HashMap<ObjectKey, JsonValue>>,
    applied: watch::Sender<u64>,
}

impl Default for InMemoryReadModel {
    fn default() -> Self {
        Self::named("in-memory")
    }
}

impl InMemoryReadModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        let (applied, _) = watch::channel(0);
        Self {
            name: name.into(),
            objects: RwLock::new(HashMap::new()),
            applied,
        }
    }

    pub fn insert(&self, object_type: ObjectType, object_id: impl Into<String>, value: JsonValue) {
        if let Ok(mut objects) = self.objects.write() {
            objects.insert((object_type, object_id.into()), value);
        }
    }

    pub fn remove(&self, object_type: &ObjectType, object_id: &str) -> Option<JsonValue> {
        let mut objects = self.objects.write().ok()?;
        objects.remove(&(object_type.clone(), object_id.to_string()))
    }

    pub fn get(&self, object_type: &ObjectType, object_id: &str) -> Option<JsonValue> {
        let objects = self.objects.read().ok()?;
        objects.get(&(object_type.clone(), object_id.to_string())).cloned()
    }

    /// Record that every batch up to `position` has been applied.
    /// Positions never move backwards.
    pub fn mark_applied(&self, position: u64) {
        self.applied.send_if_modified(|applied| {
            if position > *applied {
                *applied = position;
                true
            } else {
                false
            }
        });
    }

    pub fn applied(&self) -> u64 {
        *self.applied.borrow()
    }
}

#[async_trait]
impl ObjectReader for InMemoryReadModel {
    async fn get_object(
        &self,
        object_type: &ObjectType,
        object_id: &str,
    ) -> Result<ObjectLookup, CollaboratorError> {
        let objects = self
            .objects
            .read()
            .map_err(|_| CollaboratorError::Unavailable("lock poisoned".to_string()))?;
        Ok(objects
            .get(&(object_type.clone(), object_id.to_string()))
            .cloned()
            .into())
    }
}

#[async_trait]
impl CatchUp for InMemoryReadModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn wait_for(&self, position: u64) -> Result<(), CollaboratorError> {
        let mut rx = self.applied.subscribe();
        rx.wait_for(|applied| *applied >= position)
            .await
            .map(|_| ())
            .map_err(|_| CollaboratorError::Unavailable(format!("{} closed", self.name)))
    }

    async fn applied_position(&self) -> Result<u64, CollaboratorError> {
        Ok(self.applied())
    }
}
