/// AWS Secrets Manager storage back-end.
///
/// Each record is one secret: the secret name is the base64 of the
/// `key_path`, the value is the record JSON, and two tags (`keyType`, `did`)
/// are attached at creation so identity listing can use a server-side
/// tag-value filter. Only bound (two-segment) key paths may be saved.
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_secretsmanager::types::{Filter, FilterNameStringType, Tag};
use aws_sdk_secretsmanager::Client;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::time::timeout;

use super::{key_path_matches_identity, segment_count, KeyMaterial, StorageManager};
use crate::error::{KmsError, Result};
use crate::kms::{Did, KeyId, KeyType};

const LIST_PAGE_SIZE: i32 = 100;

/// Configuration for the Secrets Manager back-end.
#[derive(Debug, Clone, Default)]
pub struct AwsSecretsConfig {
    /// AWS region override. `None` uses the environment/config default.
    pub region: Option<String>,
    /// Endpoint override, for localstack-style deployments.
    pub endpoint: Option<String>,
    /// Per-call RPC timeout. `None` uses [`DEFAULT_RPC_TIMEOUT`].
    pub rpc_timeout: Option<Duration>,
}

/// Default per-call RPC timeout.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

pub struct AwsSecretsStorageManager {
    client: Client,
    rpc_timeout: Duration,
}

impl AwsSecretsStorageManager {
    /// Build a client from the ambient AWS environment plus overrides.
    pub async fn new(config: &AwsSecretsConfig) -> Self {
        let mut loader = aws_config::from_env();
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_secretsmanager::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint.clone());
        }

        Self {
            client: Client::from_conf(builder.build()),
            rpc_timeout: config.rpc_timeout.unwrap_or(DEFAULT_RPC_TIMEOUT),
        }
    }

    pub fn from_client(client: Client, rpc_timeout: Duration) -> Self {
        Self {
            client,
            rpc_timeout,
        }
    }

    fn secret_name(key_path: &str) -> String {
        BASE64.encode(key_path)
    }

    /// Bound the SDK call with the configured per-call timeout.
    async fn bounded<T, E, F>(&self, op: &'static str, fut: F) -> Result<std::result::Result<T, E>>
    where
        F: std::future::Future<Output = std::result::Result<T, E>>,
    {
        timeout(self.rpc_timeout, fut)
            .await
            .map_err(|_| KmsError::backend(op, "rpc call timed out"))
    }

    async fn fetch_material(&self, key_path: &str) -> Result<KeyMaterial> {
        let resp = self
            .bounded(
                "get secret",
                self.client
                    .get_secret_value()
                    .secret_id(Self::secret_name(key_path))
                    .send(),
            )
            .await?
            .map_err(|e| {
                let service_err = e.into_service_error();
                if service_err.is_resource_not_found_exception() {
                    KmsError::KeyNotFound(key_path.to_string())
                } else {
                    KmsError::backend("get secret", service_err)
                }
            })?;

        let value = resp
            .secret_string()
            .ok_or_else(|| KmsError::backend("get secret", "secret has no string value"))?;
        serde_json::from_str(value).map_err(|e| KmsError::backend("parse secret", e))
    }
}

#[async_trait]
impl StorageManager for AwsSecretsStorageManager {
    async fn save_key_material(&self, material: &KeyMaterial, id: &str) -> Result<()> {
        // Only bound key paths carry the `did` tag this back-end indexes by.
        if segment_count(id) != 2 {
            return Err(KmsError::InvalidKeyId(id.to_string()));
        }
        let identity = id.split('/').next().unwrap_or_default();

        let record = KeyMaterial {
            key_type: material.key_type,
            key_path: id.to_string(),
            private_key: material.private_key.clone(),
        };
        let value =
            serde_json::to_string(&record).map_err(|e| KmsError::backend("encode secret", e))?;

        let result = self
            .bounded(
                "create secret",
                self.client
                    .create_secret()
                    .name(Self::secret_name(id))
                    .secret_string(value)
                    .tags(
                        Tag::builder()
                            .key("keyType")
                            .value(record.key_type.as_str())
                            .build(),
                    )
                    .tags(Tag::builder().key("did").value(identity).build())
                    .send(),
            )
            .await?;

        result.map(|_| ()).map_err(|e| {
            let service_err = e.into_service_error();
            if service_err.is_resource_exists_exception() {
                KmsError::AlreadyExists(id.to_string())
            } else {
                KmsError::backend("create secret", service_err)
            }
        })
    }

    async fn search_by_identity(&self, identity: &Did, key_type: KeyType) -> Result<Vec<KeyId>> {
        let filter = Filter::builder()
            .key(FilterNameStringType::TagValue)
            .values(identity.as_str())
            .build();

        let mut keys = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_secrets()
                .filters(filter.clone())
                .max_results(LIST_PAGE_SIZE);
            if let Some(token) = &next_token {
                request = request.next_token(token.clone());
            }

            let resp = self
                .bounded("list secrets", request.send())
                .await?
                .map_err(|e| KmsError::backend("list secrets", e.into_service_error()))?;

            for entry in resp.secret_list() {
                let Some(name) = entry.name() else { continue };
                let key_path_bytes = BASE64
                    .decode(name)
                    .map_err(|e| KmsError::backend("decode secret name", e))?;
                let key_path = String::from_utf8(key_path_bytes)
                    .map_err(|e| KmsError::backend("decode secret name", e))?;

                if !key_path_matches_identity(&key_path, identity, key_type) {
                    continue;
                }
                let material = self.fetch_material(&key_path).await?;
                if KeyType::from(material.key_type) == key_type {
                    keys.push(KeyId::new(key_type, material.key_path.clone()));
                }
            }

            match resp.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(keys)
    }

    async fn search_private_key(&self, key_id: &KeyId) -> Result<String> {
        Ok(self.fetch_material(&key_id.id).await?.private_key.clone())
    }

    async fn get_key_material(&self, key_id: &KeyId) -> Result<KeyMaterial> {
        self.fetch_material(&key_id.id).await
    }

    async fn delete(&self, key_id: &KeyId) -> Result<()> {
        let result = self
            .bounded(
                "delete secret",
                self.client
                    .delete_secret()
                    .secret_id(Self::secret_name(&key_id.id))
                    .send(),
            )
            .await?;

        result.map(|_| ()).map_err(|e| {
            let service_err = e.into_service_error();
            if service_err.is_resource_not_found_exception() {
                KmsError::KeyNotFound(key_id.id.clone())
            } else {
                KmsError::backend("delete secret", service_err)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_name_is_base64_of_key_path() {
        let name = AwsSecretsStorageManager::secret_name("did:example:abc/BJJ:aabb");
        assert_eq!(
            BASE64.decode(name).unwrap(),
            b"did:example:abc/BJJ:aabb"
        );
    }
}
