/// Storage-backed secp256k1 key provider.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::crypto::eth;
use crate::error::{KmsError, Result};
use crate::kms::key_id::{self, KeyIdPattern};
use crate::kms::{Did, KeyId, KeyProvider, KeyType};
use crate::storage::{KeyMaterial, StorageManager};

/// Fixed key path used by the operator import utility.
pub const IMPORTED_ETH_KEY_PATH: &str = "pbkey";

pub struct EthKeyProvider {
    storage: Arc<dyn StorageManager>,
    /// Unbound keypairs awaiting linkage, keyed by their temporary id.
    temp_keys: Mutex<HashMap<String, KeyMaterial>>,
    pattern: &'static KeyIdPattern,
}

impl EthKeyProvider {
    pub fn new(storage: Arc<dyn StorageManager>) -> Self {
        Self {
            storage,
            temp_keys: Mutex::new(HashMap::new()),
            pattern: key_id::pattern(KeyType::Eth),
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

    /// Private key hex for an id, consulting the temporary map before
    /// storage so unbound keys can sign.
    async fn private_key_hex(&self, key_id: &KeyId) -> Result<String> {
        let cached = self
            .temp_keys
            .lock()
            .await
            .get(&key_id.id)
            .map(|m| m.private_key.clone());
        match cached {
            Some(private_key_hex) => Ok(private_key_hex),
            None => self.storage.search_private_key(key_id).await,
        }
    }
}

fn decode_private_key(private_key_hex: &str) -> Result<Vec<u8>> {
    let trimmed = private_key_hex.trim_start_matches("0x");
    let bytes =
        hex::decode(trimmed).map_err(|e| KmsError::backend("decode private key", e))?;
    if bytes.len() != 32 {
        return Err(KmsError::backend(
            "decode private key",
            "private key is not 32 bytes",
        ));
    }
    Ok(bytes)
}

#[async_trait]
impl KeyProvider for EthKeyProvider {
    async fn new_key(&self, identity: Option<&Did>) -> Result<KeyId> {
        let private_key = eth::generate_private_key();
        let public_hex = hex::encode(eth::public_key_compressed(private_key.as_bytes())?);

        let id = key_id::key_id_for(identity, KeyType::Eth, &public_hex);
        let material = KeyMaterial {
            key_type: KeyType::Eth.into(),
            key_path: id.clone(),
            private_key: private_key.to_hex(),
        };

        match identity {
            Some(_) => {
                self.storage.save_key_material(&material, &id).await?;
                let unbound_id = key_id::key_id_for(None, KeyType::Eth, &public_hex);
                self.temp_keys.lock().await.remove(&unbound_id);
            }
            None => {
                self.temp_keys.lock().await.insert(id.clone(), material);
            }
        }
        Ok(KeyId::new(KeyType::Eth, id))
    }

    async fn public_key(&self, key_id: &KeyId) -> Result<Vec<u8>> {
        Self::ensure_key_type(key_id)?;

        if let Some(public_hex) = self.pattern.public_key_hex(&key_id.id) {
            return hex::decode(public_hex).map_err(|e| KmsError::backend("decode key id", e));
        }

        // Ids without inline public material (e.g. imported keys) fall back
        // to deriving the point from the stored scalar.
        match self.private_key_hex(key_id).await {
            Ok(private_key_hex) => {
                let private_key = decode_private_key(&private_key_hex)?;
                Ok(eth::public_key_compressed(&private_key)?.to_vec())
            }
            Err(_) => Err(KmsError::InvalidKeyId(key_id.id.clone())),
        }
    }

    async fn sign(&self, key_id: &KeyId, digest: &[u8]) -> Result<Vec<u8>> {
        Self::ensure_key_type(key_id)?;
        let private_key = decode_private_key(&self.private_key_hex(key_id).await?)?;
        Ok(eth::sign_recoverable(&private_key, digest)?.to_vec())
    }

    async fn link_to_identity(&self, key_id: KeyId, identity: &Did) -> Result<KeyId> {
        Self::ensure_key_type(&key_id)?;

        let mut temp_keys = self.temp_keys.lock().await;
        let material = temp_keys
            .get(&key_id.id)
            .ok_or_else(|| KmsError::KeyNotFound(key_id.id.clone()))?;

        let bound_id = key_id::key_id_for(Some(identity), KeyType::Eth, &key_id.id);
        let bound_material = KeyMaterial {
            key_type: material.key_type,
            key_path: bound_id.clone(),
            private_key: material.private_key.clone(),
        };
        self.storage
            .save_key_material(&bound_material, &bound_id)
            .await?;
        temp_keys.remove(&key_id.id);

        Ok(KeyId::new(KeyType::Eth, bound_id))
    }

    async fn list_by_identity(&self, identity: &Did) -> Result<Vec<KeyId>> {
        self.storage.search_by_identity(identity, KeyType::Eth).await
    }
}

/// Import a raw 32-byte hex private key into a storage back-end under the
/// fixed [`IMPORTED_ETH_KEY_PATH`]. Duplicate imports fail with
/// `AlreadyExists`.
pub async fn import_eth_private_key(
    storage: &dyn StorageManager,
    private_key_hex: &str,
) -> Result<KeyId> {
    let private_key = decode_private_key(private_key_hex)?;
    // Reject scalars the curve rejects before anything touches disk.
    eth::public_key_compressed(&private_key)?;

    let material = KeyMaterial {
        key_type: KeyType::Eth.into(),
        key_path: IMPORTED_ETH_KEY_PATH.to_string(),
        private_key: hex::encode(&private_key),
    };
    storage
        .save_key_material(&material, IMPORTED_ETH_KEY_PATH)
        .await?;
    Ok(KeyId::new(KeyType::Eth, IMPORTED_ETH_KEY_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::eth as eth_crypto;
    use crate::storage::local::LocalStorageFileManager;

    const DID: &str = "did:example:abc";

    fn provider() -> (tempfile::TempDir, EthKeyProvider, Arc<LocalStorageFileManager>) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorageFileManager::new(dir.path()));
        let provider = EthKeyProvider::new(storage.clone() as Arc<dyn StorageManager>);
        (dir, provider, storage)
    }

    #[tokio::test]
    async fn test_unbound_key_can_sign_before_linking() {
        let (_dir, provider, _storage) = provider();
        let digest = [0x55u8; 32];

        let unbound = provider.new_key(None).await.unwrap();
        let signature = provider.sign(&unbound, &digest).await.unwrap();
        assert_eq!(signature.len(), eth_crypto::SIGNATURE_LEN);
        assert!(signature[64] == 27 || signature[64] == 28);

        let public_key = provider.public_key(&unbound).await.unwrap();
        assert!(eth_crypto::verify_prehash(&public_key, &digest, &signature[..64]).unwrap());
    }

    #[tokio::test]
    async fn test_bound_create_persists_and_signs() {
        let (_dir, provider, storage) = provider();
        let did = Did::new(DID);
        let digest = [0x66u8; 32];

        let key_id = provider.new_key(Some(&did)).await.unwrap();
        assert!(storage.get_key_material(&key_id).await.is_ok());

        let signature = provider.sign(&key_id, &digest).await.unwrap();
        let signature: [u8; 65] = signature.try_into().unwrap();
        let public_key = provider.public_key(&key_id).await.unwrap();
        assert_eq!(
            eth_crypto::recover_compressed(&digest, &signature).unwrap().to_vec(),
            public_key
        );
    }

    #[tokio::test]
    async fn test_link_moves_key_from_temp_map_to_storage() {
        let (_dir, provider, storage) = provider();
        let did = Did::new(DID);

        let unbound = provider.new_key(None).await.unwrap();
        assert!(!storage.file_path().exists());

        let bound = provider.link_to_identity(unbound.clone(), &did).await.unwrap();
        assert_eq!(bound.id, format!("{DID}/{}", unbound.id));
        assert!(storage.get_key_material(&bound).await.is_ok());
        assert_eq!(provider.list_by_identity(&did).await.unwrap(), vec![bound]);
    }

    #[tokio::test]
    async fn test_public_key_embedded_in_id_is_66_hex_chars() {
        let (_dir, provider, _storage) = provider();

        let unbound = provider.new_key(None).await.unwrap();
        let hex_part = unbound.id.strip_prefix("ETH:").unwrap();
        assert_eq!(hex_part.len(), 66);

        let public_key = provider.public_key(&unbound).await.unwrap();
        assert_eq!(hex::encode(public_key), hex_part);
    }

    #[tokio::test]
    async fn test_imported_key_signs_via_storage_fallback() {
        let (_dir, provider, storage) = provider();
        let digest = [0x42u8; 32];

        let sk = eth_crypto::generate_private_key();
        let key_id = import_eth_private_key(storage.as_ref(), &sk.to_hex())
            .await
            .unwrap();
        assert_eq!(key_id.id, IMPORTED_ETH_KEY_PATH);

        // "pbkey" carries no inline public material; both operations go
        // through the stored scalar.
        let public_key = provider.public_key(&key_id).await.unwrap();
        assert_eq!(
            public_key,
            eth_crypto::public_key_compressed(sk.as_bytes()).unwrap().to_vec()
        );
        let signature = provider.sign(&key_id, &digest).await.unwrap();
        assert!(eth_crypto::verify_prehash(&public_key, &digest, &signature[..64]).unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_import_fails_with_file_unchanged() {
        let (_dir, _provider, storage) = provider();
        let sk = eth_crypto::generate_private_key();

        import_eth_private_key(storage.as_ref(), &sk.to_hex())
            .await
            .unwrap();
        let snapshot = tokio::fs::read(storage.file_path()).await.unwrap();

        let err = import_eth_private_key(storage.as_ref(), &sk.to_hex())
            .await
            .unwrap_err();
        assert!(matches!(err, KmsError::AlreadyExists(_)));
        assert_eq!(tokio::fs::read(storage.file_path()).await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_import_rejects_malformed_hex() {
        let (_dir, _provider, storage) = provider();
        assert!(import_eth_private_key(storage.as_ref(), "zzzz").await.is_err());
        assert!(import_eth_private_key(storage.as_ref(), "abcd").await.is_err());
    }

    #[tokio::test]
    async fn test_import_accepts_0x_prefix() {
        let (_dir, _provider, storage) = provider();
        let sk = eth_crypto::generate_private_key();
        let key_id = import_eth_private_key(storage.as_ref(), &format!("0x{}", sk.to_hex()))
            .await
            .unwrap();
        assert_eq!(key_id.id, IMPORTED_ETH_KEY_PATH);
    }
}
