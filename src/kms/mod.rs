/// Key lifecycle engine: the KMS registry and the pluggable provider contract.
///
/// A caller holds a [`Kms`] handle and asks it to create, sign, link and list
/// by [`KeyType`]; the registry dispatches to exactly one registered
/// [`KeyProvider`]. Storage-backed providers keep private key material behind
/// a [`crate::storage::StorageManager`]; the cloud-KMS provider never sees
/// private bytes at all.
pub mod key_id;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;

use crate::error::{KmsError, Result};
pub use key_id::KeyId;

/// The two supported cryptographic families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// Baby Jubjub Edwards curve with Poseidon EdDSA (Merkle-tree signatures).
    Bjj,
    /// Ethereum secp256k1.
    Eth,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Bjj => write!(f, "BJJ"),
            KeyType::Eth => write!(f, "ETH"),
        }
    }
}

impl FromStr for KeyType {
    type Err = KmsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BJJ" => Ok(KeyType::Bjj),
            "ETH" => Ok(KeyType::Eth),
            _ => Err(KmsError::InvalidKeyId(s.to_string())),
        }
    }
}

/// An opaque external identity (a W3C DID string). The core never parses its
/// internal structure; it is only an index key and a `KeyId` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Did(String);

impl Did {
    pub fn new(did: impl Into<String>) -> Self {
        Self(did.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Did {
    fn from(did: &str) -> Self {
        Self(did.to_string())
    }
}

/// Contract every curve-specific provider implements.
///
/// All operations suspend only at their storage or cloud boundary; dropping a
/// returned future cancels the operation.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Generate a keypair. With an identity the key is persisted bound to it;
    /// without one the material stays in the provider's in-memory temporary
    /// map until [`KeyProvider::link_to_identity`] is called.
    async fn new_key(&self, identity: Option<&Did>) -> Result<KeyId>;

    /// Public key bytes for an id. Tries the id grammar first (no storage
    /// round-trip when the id embeds the public material), storage second.
    async fn public_key(&self, key_id: &KeyId) -> Result<Vec<u8>>;

    /// Sign a digest with the key behind `key_id`.
    async fn sign(&self, key_id: &KeyId, digest: &[u8]) -> Result<Vec<u8>>;

    /// Re-key an unbound key to `identity` and persist it. Returns the
    /// `KeyId` carrying the persisted key path.
    async fn link_to_identity(&self, key_id: KeyId, identity: &Did) -> Result<KeyId>;

    /// All keys of this provider's type bound to `identity`.
    async fn list_by_identity(&self, identity: &Did) -> Result<Vec<KeyId>>;
}

/// Type → provider registry.
///
/// Registration is initialisation-only: providers are registered through
/// `&mut self` before the registry is shared, after which all reads are
/// concurrent and unsynchronised.
#[derive(Default)]
pub struct Kms {
    providers: HashMap<KeyType, Arc<dyn KeyProvider>>,
}

impl Kms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for a key type. Fails with `KeyTypeConflict` when
    /// the type already has one.
    pub fn register_key_provider(
        &mut self,
        key_type: KeyType,
        provider: Arc<dyn KeyProvider>,
    ) -> Result<()> {
        if self.providers.contains_key(&key_type) {
            return Err(KmsError::KeyTypeConflict(key_type));
        }
        self.providers.insert(key_type, provider);
        Ok(())
    }

    fn provider(&self, key_type: KeyType) -> Result<&Arc<dyn KeyProvider>> {
        self.providers
            .get(&key_type)
            .ok_or(KmsError::UnknownKeyType(key_type))
    }

    pub async fn create_key(&self, key_type: KeyType, identity: Option<&Did>) -> Result<KeyId> {
        self.provider(key_type)?.new_key(identity).await
    }

    pub async fn public_key(&self, key_id: &KeyId) -> Result<Vec<u8>> {
        self.provider(key_id.key_type)?.public_key(key_id).await
    }

    pub async fn sign(&self, key_id: &KeyId, digest: &[u8]) -> Result<Vec<u8>> {
        self.provider(key_id.key_type)?.sign(key_id, digest).await
    }

    pub async fn link_to_identity(&self, key_id: KeyId, identity: &Did) -> Result<KeyId> {
        self.provider(key_id.key_type)?
            .link_to_identity(key_id, identity)
            .await
    }

    /// Fan `list_by_identity` out to every registered provider in parallel
    /// and concatenate the results. The first provider error aborts the
    /// remaining tasks and surfaces to the caller.
    pub async fn keys_by_identity(&self, identity: &Did) -> Result<Vec<KeyId>> {
        let mut tasks = JoinSet::new();
        for provider in self.providers.values() {
            let provider = Arc::clone(provider);
            let identity = identity.clone();
            tasks.spawn(async move { provider.list_by_identity(&identity).await });
        }

        let mut keys = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(mut ids)) => keys.append(&mut ids),
                Ok(Err(e)) => {
                    tasks.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    tasks.abort_all();
                    return Err(KmsError::backend("keys_by_identity", e));
                }
            }
        }
        Ok(keys)
    }
}
