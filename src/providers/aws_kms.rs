/// AWS KMS secp256k1 key provider.
///
/// Keys are created non-exportable (`ECC_SECG_P256K1`, `SIGN_VERIFY`,
/// origin `AWS_KMS`); signing happens remotely and the DER result is adapted
/// to the 65-byte Ethereum form. Identity linkage is expressed as two
/// resource tags (`keyType`, `did`); listing pages through the account's
/// keys and reads tags per key. Deletion is scheduled with a 7-day pending
/// window.
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::types::{
    KeySpec, KeyUsageType, MessageType, OriginType, SigningAlgorithmSpec, Tag,
};
use aws_sdk_kms::Client;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::pkcs8::DecodePublicKey;
use tokio::time::timeout;
use tracing::warn;

use crate::crypto::recovery;
use crate::error::{KmsError, Result};
use crate::kms::{Did, KeyId, KeyProvider, KeyType};

/// Prefix of every cloud-held key id.
pub const CLOUD_KEY_ID_PREFIX: &str = "ETH/";

/// Deletion grace period; the key stays recoverable until it elapses.
const DELETION_PENDING_WINDOW_DAYS: i32 = 7;
const LIST_PAGE_SIZE: i32 = 500;

/// Default per-call RPC timeout.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the cloud-KMS provider.
#[derive(Debug, Clone, Default)]
pub struct AwsKmsConfig {
    /// AWS region override. `None` uses the environment/config default.
    pub region: Option<String>,
    /// Endpoint override, for localstack-style deployments.
    pub endpoint: Option<String>,
    /// Per-call RPC timeout. `None` uses [`DEFAULT_RPC_TIMEOUT`].
    pub rpc_timeout: Option<Duration>,
}

pub struct AwsKmsEthKeyProvider {
    client: Client,
    rpc_timeout: Duration,
}

impl AwsKmsEthKeyProvider {
    /// Build a client from the ambient AWS environment plus overrides.
    pub async fn new(config: &AwsKmsConfig) -> Self {
        let mut loader = aws_config::from_env();
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_kms::config::Builder::from(&sdk_config);
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

    fn ensure_key_type(key_id: &KeyId) -> Result<()> {
        if key_id.key_type != KeyType::Eth {
            return Err(KmsError::IncorrectKeyType {
                expected: KeyType::Eth,
                actual: key_id.key_type,
            });
        }
        Ok(())
    }

    /// The opaque cloud handle embedded in a `ETH/<handle>` id.
    fn cloud_handle(key_id: &KeyId) -> Result<&str> {
        Self::ensure_key_type(key_id)?;
        key_id
            .id
            .strip_prefix(CLOUD_KEY_ID_PREFIX)
            .filter(|handle| !handle.is_empty())
            .ok_or_else(|| KmsError::InvalidKeyId(key_id.id.clone()))
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

    async fn tag_key(&self, handle: &str, identity: &Did) -> Result<()> {
        let key_type_tag = Tag::builder()
            .tag_key("keyType")
            .tag_value(KeyType::Eth.to_string())
            .build()
            .map_err(|e| KmsError::backend("build tag", e))?;
        let did_tag = Tag::builder()
            .tag_key("did")
            .tag_value(identity.as_str())
            .build()
            .map_err(|e| KmsError::backend("build tag", e))?;

        self.bounded(
            "tag key",
            self.client
                .tag_resource()
                .key_id(handle)
                .tags(key_type_tag)
                .tags(did_tag)
                .send(),
        )
        .await?
        .map_err(|e| KmsError::backend("tag key", e.into_service_error()))?;
        Ok(())
    }

    /// Schedule deletion of a cloud key; it stays in a pending-deletion
    /// state for seven days before it is destroyed.
    pub async fn delete(&self, key_id: &KeyId) -> Result<()> {
        let handle = Self::cloud_handle(key_id)?;
        self.bounded(
            "schedule key deletion",
            self.client
                .schedule_key_deletion()
                .key_id(handle)
                .pending_window_in_days(DELETION_PENDING_WINDOW_DAYS)
                .send(),
        )
        .await?
        .map_err(|e| KmsError::backend("schedule key deletion", e.into_service_error()))?;
        Ok(())
    }

    /// Whether the cloud key behind `key_id` exists.
    pub async fn exists(&self, key_id: &KeyId) -> Result<bool> {
        let handle = Self::cloud_handle(key_id)?;
        let result = self
            .bounded(
                "describe key",
                self.client.describe_key().key_id(handle).send(),
            )
            .await?;
        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_not_found_exception() {
                    Ok(false)
                } else {
                    Err(KmsError::backend("describe key", service_err))
                }
            }
        }
    }
}

#[async_trait]
impl KeyProvider for AwsKmsEthKeyProvider {
    async fn new_key(&self, identity: Option<&Did>) -> Result<KeyId> {
        let resp = self
            .bounded(
                "create key",
                self.client
                    .create_key()
                    .key_spec(KeySpec::EccSecgP256K1)
                    .key_usage(KeyUsageType::SignVerify)
                    .origin(OriginType::AwsKms)
                    .send(),
            )
            .await?
            .map_err(|e| KmsError::backend("create key", e.into_service_error()))?;

        let handle = resp
            .key_metadata()
            .map(|metadata| metadata.key_id().to_string())
            .ok_or_else(|| KmsError::backend("create key", "response has no key metadata"))?;

        if let Some(identity) = identity {
            self.tag_key(&handle, identity).await?;
        }
        Ok(KeyId::new(
            KeyType::Eth,
            format!("{CLOUD_KEY_ID_PREFIX}{handle}"),
        ))
    }

    async fn public_key(&self, key_id: &KeyId) -> Result<Vec<u8>> {
        let handle = Self::cloud_handle(key_id)?;
        let resp = self
            .bounded(
                "get public key",
                self.client.get_public_key().key_id(handle).send(),
            )
            .await?
            .map_err(|e| KmsError::backend("get public key", e.into_service_error()))?;

        let spki_der = resp
            .public_key()
            .map(Blob::as_ref)
            .ok_or_else(|| KmsError::backend("get public key", "response has no public key"))?;

        let public_key = k256::PublicKey::from_public_key_der(spki_der)
            .map_err(|e| KmsError::backend("decode public key", e))?;
        Ok(public_key.to_encoded_point(false).as_bytes().to_vec())
    }

    async fn sign(&self, key_id: &KeyId, digest: &[u8]) -> Result<Vec<u8>> {
        let handle = Self::cloud_handle(key_id)?;
        if digest.len() != 32 {
            return Err(KmsError::InvalidDigest(format!(
                "digest is {} bytes, expected 32",
                digest.len()
            )));
        }

        let resp = self
            .bounded(
                "sign",
                self.client
                    .sign()
                    .key_id(handle)
                    .message(Blob::new(digest))
                    .message_type(MessageType::Digest)
                    .signing_algorithm(SigningAlgorithmSpec::EcdsaSha256)
                    .send(),
            )
            .await?
            .map_err(|e| KmsError::backend("sign", e.into_service_error()))?;

        let der_signature = resp
            .signature()
            .map(Blob::as_ref)
            .ok_or_else(|| KmsError::backend("sign", "response has no signature"))?;

        let public_key = self.public_key(key_id).await?;
        let signature = recovery::ethereum_signature_from_der(&public_key, digest, der_signature)?;
        Ok(signature.to_vec())
    }

    /// Attach the identity tags to the cloud key. The id is unchanged, and
    /// re-linking the same pair is idempotent.
    async fn link_to_identity(&self, key_id: KeyId, identity: &Did) -> Result<KeyId> {
        let handle = Self::cloud_handle(&key_id)?;
        self.tag_key(handle, identity).await?;
        Ok(key_id)
    }

    async fn list_by_identity(&self, identity: &Did) -> Result<Vec<KeyId>> {
        let mut keys = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let mut request = self.client.list_keys().limit(LIST_PAGE_SIZE);
            if let Some(marker) = &marker {
                request = request.marker(marker.clone());
            }
            let resp = self
                .bounded("list keys", request.send())
                .await?
                .map_err(|e| KmsError::backend("list keys", e.into_service_error()))?;

            for entry in resp.keys() {
                let Some(handle) = entry.key_id() else { continue };

                // One unreadable key must not hide the others.
                let tags = match self
                    .bounded(
                        "list key tags",
                        self.client.list_resource_tags().key_id(handle).send(),
                    )
                    .await
                {
                    Ok(Ok(tags_resp)) => tags_resp.tags().to_vec(),
                    Ok(Err(e)) => {
                        warn!(
                            key = handle,
                            error = %e.into_service_error(),
                            "Failed to read key tags, skipping key"
                        );
                        continue;
                    }
                    Err(e) => {
                        warn!(key = handle, error = %e, "Failed to read key tags, skipping key");
                        continue;
                    }
                };

                if tags
                    .iter()
                    .any(|tag| tag.tag_key() == "did" && tag.tag_value() == identity.as_str())
                {
                    keys.push(KeyId::new(
                        KeyType::Eth,
                        format!("{CLOUD_KEY_ID_PREFIX}{handle}"),
                    ));
                }
            }

            match resp.next_marker() {
                Some(next) => marker = Some(next.to_string()),
                None => break,
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloud_handle_extraction() {
        let key_id = KeyId::new(KeyType::Eth, "ETH/mrk-001122");
        assert_eq!(
            AwsKmsEthKeyProvider::cloud_handle(&key_id).unwrap(),
            "mrk-001122"
        );
    }

    #[test]
    fn test_cloud_handle_rejects_non_cloud_ids() {
        for id in ["mrk-001122", "ETH/", "ETH:02aabb"] {
            let key_id = KeyId::new(KeyType::Eth, id);
            assert!(matches!(
                AwsKmsEthKeyProvider::cloud_handle(&key_id).unwrap_err(),
                KmsError::InvalidKeyId(_)
            ));
        }
    }

    #[test]
    fn test_cloud_handle_rejects_wrong_key_type() {
        let key_id = KeyId::new(KeyType::Bjj, "ETH/mrk-001122");
        assert!(matches!(
            AwsKmsEthKeyProvider::cloud_handle(&key_id).unwrap_err(),
            KmsError::IncorrectKeyType { .. }
        ));
    }
}
