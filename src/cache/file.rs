//! JSON file per subscriber.

use std::path::{Path, PathBuf};

use super::{CacheRecord, CacheResult};

#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, subscriber_id: &str) -> PathBuf {
        let name: String = subscriber_id
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
                _ => '_',
            })
            .collect();
        self.dir.join(format!("{}.json", name))
    }

    /// Returns `None` when nothing is cached for the subscriber.
    pub async fn load(&self, subscriber_id: &str) -> CacheResult<Option<CacheRecord>> {
        let path = self.path_for(subscriber_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Write through a temp file so readers never see a partial record.
    pub async fn save(&self, record: &CacheRecord) -> CacheResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&record.subscriber_id);
        let tmp = path.with_extension("json.tmp");

        let content = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub async fn remove(&self, subscriber_id: &str) -> CacheResult<bool> {
        match tokio::fs::remove_file(self.path_for(subscriber_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::tempdir;

    use super::*;
    use crate::cache::CacheError;
    use crate::tiers::Resource;
    use crate::usage::UsageStore;

    #[tokio::test]
    async fn test_missing_is_none() {
        let dir = tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        assert!(cache.load("nobody").await.unwrap().is_none());
        assert!(!cache.remove("nobody").await.unwrap());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let cache = FileCache::new(dir.path().join("nested"));

        let store = UsageStore::new();
        store.open("team/42", "pro", Utc::now());
        let snapshot = store.commit("team/42", Resource::Tokens, 1500).unwrap();
        let record = CacheRecord::capture(&snapshot, None);

        cache.save(&record).await.unwrap();
        assert!(cache.dir().join("team_42.json").exists());

        let loaded = cache.load("team/42").await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.usage.tokens, 1500);

        assert!(cache.remove("team/42").await.unwrap());
        assert!(cache.load("team/42").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_record() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("sub-1.json"), "{not json")
            .await
            .unwrap();
        let cache = FileCache::new(dir.path());
        assert!(matches!(cache.load("sub-1").await, Err(CacheError::Json(_))));
    }
}
