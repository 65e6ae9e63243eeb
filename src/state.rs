//! Durable seen set.
//!
//! Each source keeps a bounded, insertion-ordered set of article URLs it
//! has already announced (or deliberately skipped). The set is persisted as
//! a JSON array, oldest first, in `<state_dir>/<source>_seen.json`. Writes
//! go to a temporary file that is renamed over the old one, so a crash
//! mid-write never leaves a truncated file behind.

use crate::errors::StateError;
use std::collections::{HashSet, VecDeque};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, instrument};

pub const DEFAULT_SEEN_CAPACITY: usize = 100;

/// Capped, insertion-ordered URL set.
///
/// Observing a listing appends the URLs it has not seen yet and then evicts
/// the oldest entries that are no longer listed. URLs in the snapshot being
/// observed are never evicted, so a listing longer than the capacity is held
/// in full until its entries drop off the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenSet {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
}

impl SeenSet {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Build a set from URLs ordered oldest first. All of them are kept,
    /// even beyond `capacity`; the next observation trims the excess.
    pub fn from_urls(capacity: usize, urls: impl IntoIterator<Item = String>) -> Self {
        let urls: Vec<String> = urls.into_iter().collect();
        let mut set = Self::new(capacity);
        set.observe(&urls);
        set
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.members.contains(url)
    }

    /// Mark a whole listing snapshot as seen.
    ///
    /// New URLs are appended in the given order. Eviction then drops the
    /// oldest entries that are *not* part of `snapshot` until the set is
    /// back at capacity, so the set may stay above capacity for as long as
    /// the snapshot itself is larger.
    ///
    /// # Returns
    ///
    /// The number of URLs that were not present before.
    pub fn observe(&mut self, snapshot: &[String]) -> usize {
        let mut added = 0;
        for url in snapshot {
            if self.members.insert(url.clone()) {
                self.order.push_back(url.clone());
                added += 1;
            }
        }

        let mut excess = self.order.len().saturating_sub(self.capacity);
        if excess > 0 {
            let pinned: HashSet<&str> = snapshot.iter().map(String::as_str).collect();
            let members = &mut self.members;
            self.order.retain(|url| {
                if excess == 0 || pinned.contains(url.as_str()) {
                    return true;
                }
                members.remove(url);
                excess -= 1;
                false
            });
        }
        added
    }

    pub fn remove(&mut self, url: &str) -> bool {
        if !self.members.remove(url) {
            return false;
        }
        self.order.retain(|u| u != url);
        true
    }

    /// URLs oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

/// Reads and writes seen sets under one state directory.
#[derive(Debug, Clone)]
pub struct SeenStore {
    dir: PathBuf,
    capacity: usize,
}

impl SeenStore {
    pub fn new(dir: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            dir: dir.into(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn path_for(&self, source: &str) -> PathBuf {
        self.dir.join(format!("{source}_seen.json"))
    }

    /// Load a source's seen set; a missing file is an empty set.
    #[instrument(level = "debug", skip(self))]
    pub async fn load(&self, source: &str) -> Result<SeenSet, StateError> {
        let path = self.path_for(source);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No persisted seen set");
                return Ok(SeenSet::new(self.capacity));
            }
            Err(e) => return Err(e.into()),
        };
        let urls: Vec<String> = serde_json::from_slice(&bytes)?;
        // More than `capacity` entries is legitimate after a long listing.
        let set = SeenSet::from_urls(self.capacity, urls);
        debug!(path = %path.display(), count = set.len(), "Loaded seen set");
        Ok(set)
    }

    /// Persist a source's seen set atomically.
    #[instrument(level = "debug", skip(self, set), fields(count = set.len()))]
    pub async fn save(&self, source: &str, set: &SeenSet) -> Result<(), StateError> {
        let path = self.path_for(source);
        let tmp = self.dir.join(format!(".{source}_seen.json.tmp"));
        let urls: Vec<&str> = set.iter().collect();
        let json = serde_json::to_vec_pretty(&urls)?;

        fs::create_dir_all(&self.dir).await?;
        fs::write(&tmp, &json).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}
