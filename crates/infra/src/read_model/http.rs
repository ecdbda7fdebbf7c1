use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value as JsonValue;

use cmdproc_rules::ObjectType;

use super::{CatchUp, ObjectLookup, ObjectReader};
use crate::error::CollaboratorError;
use crate::http::{endpoint, ensure_success, read_position};

/// HTTP client for an object-reducer read-model service.
///
/// Requests carry no timeout: `wait-t` is a long poll that only returns
/// once the reducer has caught up.
#[derive(Debug, Clone)]
pub struct ObjectReducerClient {
    base_url: String,
    client: reqwest::Client,
}

impl ObjectReducerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ObjectReader for ObjectReducerClient {
    async fn get_object(
        &self,
        object_type: &ObjectType,
        object_id: &str,
    ) -> Result<ObjectLookup, CollaboratorError> {
        let resp = self
            .client
            .get(endpoint(&self.base_url, "/object-apis/get-object"))
            .query(&[("type", object_type.as_str()), ("id", object_id)])
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(ObjectLookup::NotFound);
        }
        let value: JsonValue = ensure_success(resp).await?.json().await?;
        Ok(ObjectLookup::Found(value))
    }
}

#[async_trait]
impl CatchUp for ObjectReducerClient {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn wait_for(&self, position: u64) -> Result<(), CollaboratorError> {
        let resp = self
            .client
            .get(endpoint(&self.base_url, "/object-apis/wait-t"))
            .query(&[("t", position)])
            .send()
            .await?;
        ensure_success(resp).await?;
        Ok(())
    }

    async fn applied_position(&self) -> Result<u64, CollaboratorError> {
        let resp = self
            .client
            .get(endpoint(&self.base_url, "/object-apis/object-t"))
            .send()
            .await?;
        read_position(resp).await
    }
}
