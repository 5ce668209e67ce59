/// Baby Jubjub key provider over a storage manager.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::crypto::bjj;
use crate::error::{KmsError, Result};
use crate::kms::key_id::{self, KeyIdPattern};
use crate::kms::{Did, KeyId, KeyProvider, KeyType};
use crate::storage::{KeyMaterial, StorageManager};

pub struct BjjKeyProvider {
    storage: Arc<dyn StorageManager>,
    /// Unbound keypairs awaiting linkage, keyed by their temporary id.
    temp_keys: Mutex<HashMap<String, KeyMaterial>>,
    pattern: &'static KeyIdPattern,
}

impl BjjKeyProvider {
    pub fn new(storage: Arc<dyn StorageManager>) -> Self {
        Self {
            storage,
            temp_keys: Mutex::new(HashMap::new()),
            pattern: key_id::pattern(KeyType::Bjj),
        }
    }

    fn ensure_key_type(key_id: &KeyId) -> Result<()> {
        if key_id.key_type != KeyType::Bjj {
            return Err(KmsError::IncorrectKeyType {
                expected: KeyType::Bjj,
                actual: key_id.key_type,
            });
        }
        Ok(())
    }

    async fn private_key_bytes(&self, key_id: &KeyId) -> Result<[u8; 32]> {
        let private_key_hex = self.storage.search_private_key(key_id).await?;
        decode_private_key(&private_key_hex)
    }
}

fn decode_private_key(private_key_hex: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(private_key_hex)
        .map_err(|e| KmsError::backend("decode private key", e))?;
    bytes
        .try_into()
        .map_err(|_| KmsError::backend("decode private key", "private key is not 32 bytes"))
}

#[async_trait]
impl KeyProvider for BjjKeyProvider {
    async fn new_key(&self, identity: Option<&Did>) -> Result<KeyId> {
        let private_key = bjj::generate_private_key();
        let public_hex = hex::encode(bjj::public_key_compressed(private_key.as_bytes())?);

        let id = key_id::key_id_for(identity, KeyType::Bjj, &public_hex);
        let material = KeyMaterial {
            key_type: KeyType::Bjj.into(),
            key_path: id.clone(),
            private_key: private_key.to_hex(),
        };

        match identity {
            Some(_) => {
                self.storage.save_key_material(&material, &id).await?;
                // Evict a stale temporary entry for the same public key.
                let unbound_id = key_id::key_id_for(None, KeyType::Bjj, &public_hex);
                self.temp_keys.lock().await.remove(&unbound_id);
            }
            None => {
                self.temp_keys.lock().await.insert(id.clone(), material);
            }
        }
        Ok(KeyId::new(KeyType::Bjj, id))
    }

    async fn public_key(&self, key_id: &KeyId) -> Result<Vec<u8>> {
        Self::ensure_key_type(key_id)?;

        // Grammar first: most ids embed the compressed point.
        if let Some(public_hex) = self.pattern.public_key_hex(&key_id.id) {
            return hex::decode(public_hex).map_err(|e| KmsError::backend("decode key id", e));
        }

        // Storage second: derive the point from the stored scalar.
        match self.private_key_bytes(key_id).await {
            Ok(private_key) => Ok(bjj::public_key_compressed(&private_key)?.to_vec()),
            Err(_) => Err(KmsError::InvalidKeyId(key_id.id.clone())),
        }
    }

    async fn sign(&self, key_id: &KeyId, digest: &[u8]) -> Result<Vec<u8>> {
        Self::ensure_key_type(key_id)?;
        let private_key = self.private_key_bytes(key_id).await?;
        Ok(bjj::sign(&private_key, digest)?.to_vec())
    }

    async fn link_to_identity(&self, key_id: KeyId, identity: &Did) -> Result<KeyId> {
        Self::ensure_key_type(&key_id)?;

        let mut temp_keys = self.temp_keys.lock().await;
        let material = temp_keys
            .get(&key_id.id)
            .ok_or_else(|| KmsError::KeyNotFound(key_id.id.clone()))?;

        let bound_id = key_id::key_id_for(Some(identity), KeyType::Bjj, &key_id.id);
        let bound_material = KeyMaterial {
            key_type: material.key_type,
            key_path: bound_id.clone(),
            private_key: material.private_key.clone(),
        };
        self.storage
            .save_key_material(&bound_material, &bound_id)
            .await?;
        temp_keys.remove(&key_id.id);

        Ok(KeyId::new(KeyType::Bjj, bound_id))
    }

    async fn list_by_identity(&self, identity: &Did) -> Result<Vec<KeyId>> {
        self.storage.search_by_identity(identity, KeyType::Bjj).await
    }
}
