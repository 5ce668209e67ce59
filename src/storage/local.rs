/// Local file storage back-end.
///
/// The entire record list is one JSON array in a single file; every mutation
/// reads the whole file, applies the change in memory and writes the result
/// to a temporary file that is renamed into place. Mutations serialise on a
/// per-file mutex; reads can overlap.
///
/// Not crash-safe and intended for development and single-writer setups only.
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{key_path_matches_identity, segment_count, KeyMaterial, StorageManager};
use crate::error::{KmsError, Result};
use crate::kms::{Did, KeyId, KeyType};

/// Default directory holding the storage file.
pub const DEFAULT_STORAGE_DIR: &str = "./localstoragekeys";
/// File name inside the storage directory.
pub const STORAGE_FILE_NAME: &str = "kms_localstorage_keys.json";

#[cfg(unix)]
const FILE_MODE: u32 = 0o644;

pub struct LocalStorageFileManager {
    file_path: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalStorageFileManager {
    /// Back-end over `<dir>/kms_localstorage_keys.json`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            file_path: dir.as_ref().join(STORAGE_FILE_NAME),
            write_lock: Mutex::new(()),
        }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    async fn read_all(&self) -> Result<Vec<KeyMaterial>> {
        let bytes = match tokio::fs::read(&self.file_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(KmsError::backend("read storage file", e)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&bytes).map_err(|e| KmsError::backend("parse storage file", e))
    }

    async fn write_all(&self, records: &[KeyMaterial]) -> Result<()> {
        let json = serde_json::to_vec_pretty(records)
            .map_err(|e| KmsError::backend("serialize storage file", e))?;

        if let Some(parent) = self.file_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| KmsError::backend("create storage dir", e))?;
        }

        // Write-then-rename keeps readers off half-written documents.
        let tmp_path = self.file_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json)
            .await
            .map_err(|e| KmsError::backend("write storage file", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(FILE_MODE))
                .await
                .map_err(|e| KmsError::backend("chmod storage file", e))?;
        }
        tokio::fs::rename(&tmp_path, &self.file_path)
            .await
            .map_err(|e| KmsError::backend("rename storage file", e))?;
        Ok(())
    }

    fn find<'a>(records: &'a [KeyMaterial], key_path: &str) -> Option<&'a KeyMaterial> {
        records.iter().find(|r| r.key_path == key_path)
    }
}

#[async_trait]
impl StorageManager for LocalStorageFileManager {
    async fn save_key_material(&self, material: &KeyMaterial, id: &str) -> Result<()> {
        // New code paths emit at most the two-part bound form; the legacy
        // three-part shape is read-only.
        if segment_count(id) > 2 {
            return Err(KmsError::InvalidKeyId(id.to_string()));
        }

        let _guard = self.write_lock.lock().await;
        let mut records = self.read_all().await?;
        if Self::find(&records, id).is_some() {
            return Err(KmsError::AlreadyExists(id.to_string()));
        }
        records.push(KeyMaterial {
            key_type: material.key_type,
            key_path: id.to_string(),
            private_key: material.private_key.clone(),
        });
        self.write_all(&records).await
    }

    async fn search_by_identity(&self, identity: &Did, key_type: KeyType) -> Result<Vec<KeyId>> {
        let records = self.read_all().await?;
        Ok(records
            .iter()
            .filter(|r| KeyType::from(r.key_type) == key_type)
            .filter(|r| key_path_matches_identity(&r.key_path, identity, key_type))
            .map(|r| KeyId::new(key_type, r.key_path.clone()))
            .collect())
    }

    async fn search_private_key(&self, key_id: &KeyId) -> Result<String> {
        Ok(self.get_key_material(key_id).await?.private_key.clone())
    }

    async fn get_key_material(&self, key_id: &KeyId) -> Result<KeyMaterial> {
        let records = self.read_all().await?;
        Self::find(&records, &key_id.id)
            .cloned()
            .ok_or_else(|| KmsError::KeyNotFound(key_id.id.clone()))
    }

    async fn delete(&self, key_id: &KeyId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_all().await?;
        let before = records.len();
        records.retain(|r| r.key_path != key_id.id);
        if records.len() == before {
            return Err(KmsError::KeyNotFound(key_id.id.clone()));
        }
        self.write_all(&records).await
    }
}
