use std::path::{Path, PathBuf};

use listwatch_core::error::AppError;
use listwatch_core::models::{CategoryKey, CategoryState};
use listwatch_core::traits::ListingStore;
use uuid::Uuid;

use crate::config::StoreConfig;

/// Listing store writing one JSON document per (city, category) at
/// `<root>/<city>/<category>.json`.
///
/// Documents are replaced through a temporary file and a rename, so a
/// concurrent reader sees either the previous or the next document.
#[derive(Debug, Clone)]
pub struct JsonListingStore {
    root: PathBuf,
}

impl JsonListingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.data_dir.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of a category document.
    pub fn path_for(&self, key: &CategoryKey) -> Result<PathBuf, AppError> {
        let city = checked_component(&key.city)?;
        let category = checked_component(&key.category)?;
        Ok(self.root.join(city).join(format!("{category}.json")))
    }

    /// Check that the data directory exists (creating it if needed) and is
    /// a directory.
    pub async fn health_check(&self) -> Result<(), AppError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| store_error("create", &self.root, e))?;
        let meta = tokio::fs::metadata(&self.root)
            .await
            .map_err(|e| store_error("inspect", &self.root, e))?;
        if !meta.is_dir() {
            return Err(AppError::StoreError(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        Ok(())
    }
}

/// Reject names that would escape the data directory.
fn checked_component(name: &str) -> Result<&str, AppError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(AppError::StoreError(format!(
            "invalid path component '{name}'"
        )));
    }
    Ok(name)
}

fn store_error(op: &str, path: &Path, e: std::io::Error) -> AppError {
    AppError::StoreError(format!("failed to {op} {}: {e}", path.display()))
}

impl ListingStore for JsonListingStore {
    async fn load(&self, key: &CategoryKey) -> Result<CategoryState, AppError> {
        let path = self.path_for(key)?;
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(category = %key, "No stored state yet");
                return Ok(CategoryState::default());
            }
            Err(e) => return Err(store_error("read", &path, e)),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(CategoryState::default());
        }
        serde_json::from_slice(&raw).map_err(|e| {
            AppError::StoreError(format!("corrupt document {}: {e}", path.display()))
        })
    }

    async fn save(&self, key: &CategoryKey, state: &CategoryState) -> Result<(), AppError> {
        let path = self.path_for(key)?;
        let dir = path
            .parent()
            .ok_or_else(|| AppError::StoreError(format!("no parent for {}", path.display())))?;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| store_error("create", dir, e))?;

        let body = serde_json::to_vec_pretty(state)?;
        let tmp = dir.join(format!(".{}.{}.tmp", key.category, Uuid::new_v4()));
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| store_error("write", &tmp, e))?;

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(store_error("replace", &path, e));
        }

        tracing::debug!(
            category = %key,
            active = state.active.len(),
            sold = state.sold.len(),
            "Category state saved"
        );
        Ok(())
    }
}
