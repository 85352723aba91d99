use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::source::{DataSource, ObservationRequest, Segment, SourceError};

struct CacheEntry {
    stored_at: Instant,
    segments: Vec<Segment>,
}

/// On-disk form of one cached response.
#[derive(Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    segments: Vec<Segment>,
}

/// Response cache in front of another [`DataSource`].
///
/// Contract:
/// - entries are keyed by [`ObservationRequest::cache_key`];
/// - an entry younger than `ttl` is served without calling the inner source;
/// - errors are never cached, and a failed refresh leaves an expired entry unused;
/// - expired in-memory entries are evicted whenever a new entry is stored.
///
/// With [`with_dir`](CachedSource::with_dir) every entry is also written as a
/// JSON file whose modification time is checked against `ttl`, so a later
/// process serves it without refetching.
pub struct CachedSource<S> {
    inner: S,
    ttl: Duration,
    dir: Option<PathBuf>,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl<S> CachedSource<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            dir: None,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Persists entries under `dir`, created on first write.
    pub fn with_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Clears the in-memory entries. Files on disk are left alone.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    async fn store(&self, key: String, segments: Vec<Segment>, stored_at: Instant) {
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        entries.insert(
            key,
            CacheEntry {
                stored_at,
                segments,
            },
        );
    }

    async fn read_disk(&self, key: &str) -> Option<(Vec<Segment>, Duration)> {
        let path = entry_path(self.dir.as_ref()?, key);

        let modified = tokio::fs::metadata(&path).await.ok()?.modified().ok()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        if age >= self.ttl {
            return None;
        }

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read cache file");
                return None;
            }
        };
        match serde_json::from_str::<StoredEntry>(&content) {
            Ok(entry) if entry.key == key => Some((entry.segments, age)),
            Ok(_) => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt cache file");
                None
            }
        }
    }

    async fn write_disk(&self, key: &str, segments: &[Segment]) {
        let Some(dir) = &self.dir else {
            return;
        };
        let path = entry_path(dir, key);
        let entry = StoredEntry {
            key: key.to_string(),
            segments: segments.to_vec(),
        };

        let result = async {
            tokio::fs::create_dir_all(dir).await?;
            let json = serde_json::to_vec(&entry)?;
            tokio::fs::write(&path, json).await?;
            anyhow::Ok(())
        }
        .await;

        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to write cache file");
        }
    }
}

/// File name for `key`: anything outside `[A-Za-z0-9._-]` becomes `_`. The key
/// is stored inside the file, so a collision is only a miss.
fn entry_path(dir: &Path, key: &str) -> PathBuf {
    let stem: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    dir.join(format!("{stem}.json"))
}

#[async_trait]
impl<S: DataSource> DataSource for CachedSource<S> {
    async fn fetch(&self, request: &ObservationRequest) -> Result<Vec<Segment>, SourceError> {
        let key = request.cache_key();

        if let Some(entry) = self.entries.lock().await.get(&key) {
            if entry.stored_at.elapsed() < self.ttl {
                debug!(key = %key, "Serving observations from cache");
                return Ok(entry.segments.clone());
            }
        }

        if let Some((segments, age)) = self.read_disk(&key).await {
            debug!(key = %key, age_secs = age.as_secs(), "Serving observations from disk cache");
            let stored_at = Instant::now().checked_sub(age).unwrap_or_else(Instant::now);
            self.store(key, segments.clone(), stored_at).await;
            return Ok(segments);
        }

        let segments = self.inner.fetch(request).await?;

        self.write_disk(&key, &segments).await;
        self.store(key, segments.clone(), Instant::now()).await;

        Ok(segments)
    }
}
