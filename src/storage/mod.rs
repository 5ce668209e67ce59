/// Pluggable storage back-ends for private key material.
///
/// A storage manager maps `key_path` strings to key material records and
/// maintains a reverse index by identity. Two back-ends implement it:
/// - `local`: a single JSON document on disk (development/single-writer)
/// - `aws_secrets`: AWS Secrets Manager, one secret per record
pub mod aws_secrets;
pub mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::Result;
use crate::kms::{Did, KeyId, KeyType};

/// On-disk spelling of the key family. Distinct from [`KeyType`], whose
/// labels (`BJJ`/`ETH`) appear only inside key identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyMaterialType {
    #[serde(rename = "babyjubjub")]
    BabyJubJub,
    #[serde(rename = "ethereum")]
    Ethereum,
}

impl From<KeyType> for KeyMaterialType {
    fn from(key_type: KeyType) -> Self {
        match key_type {
            KeyType::Bjj => KeyMaterialType::BabyJubJub,
            KeyType::Eth => KeyMaterialType::Ethereum,
        }
    }
}

impl From<KeyMaterialType> for KeyType {
    fn from(material_type: KeyMaterialType) -> Self {
        match material_type {
            KeyMaterialType::BabyJubJub => KeyType::Bjj,
            KeyMaterialType::Ethereum => KeyType::Eth,
        }
    }
}

impl KeyMaterialType {
    /// The serialized spelling, used for back-end tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyMaterialType::BabyJubJub => "babyjubjub",
            KeyMaterialType::Ethereum => "ethereum",
        }
    }
}

/// The storage-layer entity: one record per key path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMaterial {
    pub key_type: KeyMaterialType,
    pub key_path: String,
    /// 32 bytes of private scalar, lowercase hex (64 chars).
    pub private_key: String,
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

/// Back-end-agnostic CRUD over `(key_path → key material)` plus an
/// identity index.
#[async_trait]
pub trait StorageManager: Send + Sync {
    /// Insert a record under `id`. Fails with `AlreadyExists` when `id` is
    /// already present.
    async fn save_key_material(&self, material: &KeyMaterial, id: &str) -> Result<()>;

    /// All key ids bound to `identity` for the given curve. Accepts the
    /// canonical two-part `key_path` form and the legacy three-part form.
    async fn search_by_identity(&self, identity: &Did, key_type: KeyType) -> Result<Vec<KeyId>>;

    /// Private key hex for an exact `key_path`. Fails with `KeyNotFound`.
    async fn search_private_key(&self, key_id: &KeyId) -> Result<String>;

    /// Full record for an exact `key_path`. Fails with `KeyNotFound`.
    async fn get_key_material(&self, key_id: &KeyId) -> Result<KeyMaterial>;

    /// Remove the record under `key_id`'s `key_path`.
    async fn delete(&self, key_id: &KeyId) -> Result<()>;
}

/// Case-insensitive check that a path segment is `<KeyType>:<hex…>`.
fn segment_has_type(segment: &str, key_type: KeyType) -> bool {
    let tag = key_type.to_string();
    segment.len() > tag.len()
        && segment.as_bytes()[tag.len()] == b':'
        && segment[..tag.len()].eq_ignore_ascii_case(&tag)
}

/// True when `key_path` belongs to `identity` for the given curve: either
/// `identity/<KeyType>:<hex>` or the legacy `<prefix>/identity/<KeyType>:<hex>`.
pub(crate) fn key_path_matches_identity(
    key_path: &str,
    identity: &Did,
    key_type: KeyType,
) -> bool {
    let segments: Vec<&str> = key_path.split('/').collect();
    match segments.as_slice() {
        [owner, key] => *owner == identity.as_str() && segment_has_type(key, key_type),
        [_prefix, owner, key] => *owner == identity.as_str() && segment_has_type(key, key_type),
        _ => false,
    }
}

/// Number of `/`-separated segments in a key path.
pub(crate) fn segment_count(key_path: &str) -> usize {
    key_path.split('/').count()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DID: &str = "did:example:abc";

    #[test]
    fn test_key_path_matches_canonical_form() {
        let did = Did::new(DID);
        assert!(key_path_matches_identity(
            &format!("{DID}/BJJ:aabb"),
            &did,
            KeyType::Bjj
        ));
        assert!(!key_path_matches_identity(
            &format!("{DID}/BJJ:aabb"),
            &did,
            KeyType::Eth
        ));
        assert!(!key_path_matches_identity(
            &format!("did:example:other/BJJ:aabb"),
            &did,
            KeyType::Bjj
        ));
    }

    #[test]
    fn test_key_path_matches_legacy_form() {
        let did = Did::new(DID);
        assert!(key_path_matches_identity(
            &format!("keys/{DID}/ETH:02aa"),
            &did,
            KeyType::Eth
        ));
        assert!(!key_path_matches_identity(
            &format!("keys/more/{DID}/ETH:02aa"),
            &did,
            KeyType::Eth
        ));
    }

    #[test]
    fn test_unbound_and_import_paths_never_match() {
        let did = Did::new(DID);
        assert!(!key_path_matches_identity("BJJ:aabb", &did, KeyType::Bjj));
        assert!(!key_path_matches_identity("pbkey", &did, KeyType::Eth));
    }

    #[test]
    fn test_material_type_spellings() {
        assert_eq!(
            serde_json::to_string(&KeyMaterialType::BabyJubJub).unwrap(),
            "\"babyjubjub\""
        );
        assert_eq!(
            serde_json::to_string(&KeyMaterialType::Ethereum).unwrap(),
            "\"ethereum\""
        );
        assert_eq!(KeyType::from(KeyMaterialType::Ethereum), KeyType::Eth);
        assert_eq!(KeyMaterialType::from(KeyType::Bjj), KeyMaterialType::BabyJubJub);
    }
}
