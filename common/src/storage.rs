use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Flat-file JSON store. Every record lives at `<root>/<folder>/<name>.json`
/// and is written pretty-printed so the data directory stays inspectable.
#[derive(Debug, Clone)]
pub struct JsonStore {
    root: PathBuf,
}

impl JsonStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the given folders under the store root if they do not exist.
    pub async fn init_folders(&self, folders: &[&str]) -> Result<()> {
        for folder in folders {
            tokio::fs::create_dir_all(self.root.join(folder))
                .await
                .with_context(|| format!("Failed to create data folder {}", folder))?;
        }
        Ok(())
    }

    pub async fn save<T: Serialize>(&self, folder: &str, name: &str, value: &T) -> Result<()> {
        let path = self.path_for(folder, name);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let json = serde_json::to_string_pretty(value)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Load a record. Missing and empty files are `None`; a corrupt file is
    /// reported and treated as missing rather than poisoning the run.
    pub async fn load<T: DeserializeOwned>(&self, folder: &str, name: &str) -> Result<Option<T>> {
        let path = self.path_for(folder, name);
        if !path.exists() {
            return Ok(None);
        }
        let json = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if json.trim().is_empty() {
            return Ok(None);
        }
        match serde_json::from_str(&json) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                println!("⚠️ Ignoring corrupt data file {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    pub fn path_for(&self, folder: &str, name: &str) -> PathBuf {
        self.root.join(folder).join(format!("{}.json", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        coin: String,
        price: f64,
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = JsonStore::new(dir.path());

        let record = Record {
            coin: "BTC".to_string(),
            price: 61250.5,
        };
        store.save("research", "btc", &record).await.unwrap();

        let loaded: Option<Record> = store.load("research", "btc").await.unwrap();
        assert_eq!(loaded, Some(record));
    }

    #[tokio::test]
    async fn missing_file_is_none() {
        let dir = tempdir().unwrap();
        let store = JsonStore::new(dir.path());

        let loaded: Option<Record> = store.load("research", "nothing").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn corrupt_file_is_none() {
        let dir = tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        store.init_folders(&["research"]).await.unwrap();
        tokio::fs::write(store.path_for("research", "bad"), "{not json")
            .await
            .unwrap();

        let loaded: Option<Record> = store.load("research", "bad").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn init_folders_creates_layout() {
        let dir = tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        store
            .init_folders(&["research", "orders", "diary"])
            .await
            .unwrap();

        assert!(dir.path().join("research").is_dir());
        assert!(dir.path().join("orders").is_dir());
        assert!(dir.path().join("diary").is_dir());
    }
}
