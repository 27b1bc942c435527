//! Persistent key-value storage boundary.
//! Holds the user's filter list and the running counters. The on-disk form
//! is one flat JSON object (`userFilters`, `imagesBlocked`, `videosBlocked`,
//! `totalChecked`), read-modify-written as a whole.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::classify::UserFilter;
use crate::error::FilterError;
use crate::stats::Stats;

const KEY_FILTERS: &str = "userFilters";
const KEY_IMAGES_BLOCKED: &str = "imagesBlocked";
const KEY_VIDEOS_BLOCKED: &str = "videosBlocked";
const KEY_TOTAL_CHECKED: &str = "totalChecked";

#[async_trait]
pub trait Storage: Send + Sync {
    /// Stored filters; absent or unreadable lists are "no filters".
    async fn load_filters(&self) -> Result<Vec<UserFilter>, FilterError>;

    async fn save_filters(&self, filters: &[UserFilter]) -> Result<(), FilterError>;

    async fn load_stats(&self) -> Result<Stats, FilterError>;

    async fn save_stats(&self, stats: &Stats) -> Result<(), FilterError>;
}

fn filters_from(doc: &Map<String, Value>) -> Vec<UserFilter> {
    match doc.get(KEY_FILTERS) {
        None | Some(Value::Null) => Vec::new(),
        Some(value) => match serde_json::from_value::<Vec<UserFilter>>(value.clone()) {
            Ok(filters) => filters,
            Err(e) => {
                warn!(error = %e, "stored filters unreadable, treating as empty");
                Vec::new()
            }
        },
    }
}

fn stats_from(doc: &Map<String, Value>) -> Stats {
    let count = |key: &str| doc.get(key).and_then(Value::as_u64).unwrap_or(0);
    Stats {
        images_blocked: count(KEY_IMAGES_BLOCKED),
        videos_blocked: count(KEY_VIDEOS_BLOCKED),
        total_checked: count(KEY_TOTAL_CHECKED),
    }
}

fn write_stats(doc: &mut Map<String, Value>, stats: &Stats) {
    doc.insert(KEY_IMAGES_BLOCKED.into(), stats.images_blocked.into());
    doc.insert(KEY_VIDEOS_BLOCKED.into(), stats.videos_blocked.into());
    doc.insert(KEY_TOTAL_CHECKED.into(), stats.total_checked.into());
}

/// JSON file store. Writes are serialized and go through a temp file + rename.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_doc(&self) -> Result<Map<String, Value>, FilterError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&content)? {
            Value::Object(map) => Ok(map),
            _ => Err(FilterError::Config(format!(
                "storage file {} is not a JSON object",
                self.path.display()
            ))),
        }
    }

    async fn update(&self, f: impl FnOnce(&mut Map<String, Value>)) -> Result<(), FilterError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_doc().await?;
        f(&mut doc);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&Value::Object(doc))?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), "storage_written");
        Ok(())
    }
}

#[async_trait]
impl Storage for JsonFileStore {
    async fn load_filters(&self) -> Result<Vec<UserFilter>, FilterError> {
        Ok(filters_from(&self.read_doc().await?))
    }

    async fn save_filters(&self, filters: &[UserFilter]) -> Result<(), FilterError> {
        let value = serde_json::to_value(filters)?;
        self.update(|doc| {
            doc.insert(KEY_FILTERS.into(), value);
        })
        .await
    }

    async fn load_stats(&self) -> Result<Stats, FilterError> {
        Ok(stats_from(&self.read_doc().await?))
    }

    async fn save_stats(&self, stats: &Stats) -> Result<(), FilterError> {
        self.update(|doc| write_stats(doc, stats)).await
    }
}

/// In-process store, used when embedding without a backing file and in tests.
#[derive(Default)]
pub struct MemoryStore {
    doc: Mutex<Map<String, Value>>,
    stats_writes: Mutex<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with a raw JSON object.
    pub fn from_json(value: Value) -> Self {
        let doc = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            doc: Mutex::new(doc),
            stats_writes: Mutex::new(0),
        }
    }

    /// Number of `save_stats` calls seen so far.
    pub fn stats_writes(&self) -> u64 {
        *self.stats_writes.lock()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn load_filters(&self) -> Result<Vec<UserFilter>, FilterError> {
        Ok(filters_from(&self.doc.lock()))
    }

    async fn save_filters(&self, filters: &[UserFilter]) -> Result<(), FilterError> {
        let value = serde_json::to_value(filters)?;
        self.doc.lock().insert(KEY_FILTERS.into(), value);
        Ok(())
    }

    async fn load_stats(&self) -> Result<Stats, FilterError> {
        Ok(stats_from(&self.doc.lock()))
    }

    async fn save_stats(&self, stats: &Stats) -> Result<(), FilterError> {
        write_stats(&mut self.doc.lock(), stats);
        *self.stats_writes.lock() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::FilterLevel;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("feedguard-{}", uuid::Uuid::new_v4()))
            .join("storage.json")
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let store = JsonFileStore::new(temp_path());
        assert!(store.load_filters().await.unwrap().is_empty());
        assert_eq!(store.load_stats().await.unwrap(), Stats::default());
    }

    #[tokio::test]
    async fn file_store_keeps_filters_and_stats_side_by_side() {
        let path = temp_path();
        let store = JsonFileStore::new(&path);
        let filters = vec![UserFilter::new("snakes", FilterLevel::High)];
        store.save_filters(&filters).await.unwrap();
        let stats = Stats {
            images_blocked: 3,
            videos_blocked: 1,
            total_checked: 9,
        };
        store.save_stats(&stats).await.unwrap();

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.load_filters().await.unwrap(), filters);
        assert_eq!(reopened.load_stats().await.unwrap(), stats);

        let raw: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["imagesBlocked"], 3);
        assert_eq!(raw["userFilters"][0]["level"], "high");

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn legacy_string_filters_read_as_empty() {
        let store = MemoryStore::from_json(serde_json::json!({
            "userFilters": ["cats", "dogs"]
        }));
        assert!(store.load_filters().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn filter_level_defaults_to_normal() {
        let store = MemoryStore::from_json(serde_json::json!({
            "userFilters": [{"term": "cats"}]
        }));
        let filters = store.load_filters().await.unwrap();
        assert_eq!(filters, vec![UserFilter::new("cats", FilterLevel::Normal)]);
    }
}
