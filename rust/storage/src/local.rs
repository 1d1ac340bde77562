use async_trait::async_trait;
use segflow_config::{registry::Registry, Configurable};
use segflow_error::ChromaError;
use std::sync::Arc;

use super::config::StorageConfig;
use super::StorageConfigError;

#[derive(Clone)]
pub struct LocalStorage {
    root: String,
}

impl LocalStorage {
    pub fn new(root: &str) -> LocalStorage {
        LocalStorage {
            root: root.to_string(),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Arc<Vec<u8>>, String> {
        let file_path = format!("{}/{}", self.root, key);
        std::fs::read(file_path)
            .map(Arc::new)
            .map_err(|e| e.to_string())
    }

    pub async fn put_bytes(&self, key: &str, bytes: &[u8]) -> Result<(), String> {
        let path = format!("{}/{}", self.root, key);
        let as_path = std::path::Path::new(&path);
        if let Some(parent) = as_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        std::fs::write(&path, bytes).map_err(|e| e.to_string())
    }

    pub async fn put_file(&self, key: &str, path: &str) -> Result<(), String> {
        let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
        self.put_bytes(key, &bytes).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), String> {
        let path = format!("{}/{}", self.root, key);
        match std::fs::remove_file(path) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }

    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, String> {
        let dir = std::path::Path::new(&self.root);
        let mut out = Vec::new();
        visit(dir, dir, prefix, &mut out).map_err(|e| e.to_string())?;
        Ok(out)
    }
}

fn visit(
    root: &std::path::Path,
    dir: &std::path::Path,
    prefix: &str,
    out: &mut Vec<String>,
) -> std::io::Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            visit(root, &path, prefix, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            let key = rel.to_string_lossy().replace('\\', "/");
            if key.starts_with(prefix) {
                out.push(key);
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Configurable<StorageConfig> for LocalStorage {
    async fn try_from_config(
        config: &StorageConfig,
        _registry: &Registry,
    ) -> Result<Self, Box<dyn ChromaError>> {
        match config {
            StorageConfig::Local(local_config) => Ok(LocalStorage::new(&local_config.root)),
            _ => Err(Box::new(StorageConfigError::InvalidStorageConfig)),
        }
    }
}
