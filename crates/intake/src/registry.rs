//! Process-local record of completed uploads per correlation key.
//!
//! Every operation resolves its key through the alias table first, so once
//! `rekey(old, new)` has run, anything addressed to `old` lands in `new`'s
//! bucket. Buckets only grow, except through [`Registry::clear`].
//!
//! The registry is not transactional with the filesystem: a record can be
//! visible here before its file has been moved into the key folder, or
//! (when a completion races a reconciliation) filed under the old key's
//! folder after it was relocated. Readers must tolerate either.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use formupload_protocol::UploadedFileInfo;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct Bucket {
    expected: u32,
    records: Vec<UploadedFileInfo>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    buckets: HashMap<String, Bucket>,
    /// `old -> new`. Chains are followed to the end; cycles cannot form
    /// because `rekey` only ever aliases a key to its current resolution.
    aliases: HashMap<String, String>,
}

impl RegistryInner {
    fn resolve(&self, key: &str) -> String {
        let mut current = key;
        // Bounded walk; every hop moves to a key that was live at rekey time.
        for _ in 0..=self.aliases.len() {
            match self.aliases.get(current) {
                Some(next) => current = next.as_str(),
                None => break,
            }
        }
        current.to_string()
    }
}

/// Concurrent-safe upload registry.
#[derive(Debug, Default)]
pub struct Registry {
    inner: RwLock<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the key that `key` currently maps to.
    pub fn resolve(&self, key: &str) -> String {
        self.read().resolve(key)
    }

    /// Sets the expected document count for `key`. Repeating it is harmless.
    pub fn register_expected(&self, key: &str, expected: u32) {
        let mut inner = self.write();
        let resolved = inner.resolve(key);
        inner.buckets.entry(resolved).or_default().expected = expected;
    }

    /// Appends `record` to the bucket `key` resolves to. Returns the bucket's
    /// new record count.
    pub fn track_completed(&self, key: &str, record: UploadedFileInfo) -> u32 {
        let mut inner = self.write();
        let resolved = inner.resolve(key);
        let bucket = inner.buckets.entry(resolved.clone()).or_default();
        debug!(
            key = %resolved,
            file_id = %record.file_id,
            filename = %record.filename,
            count = bucket.records.len() + 1,
            expected = bucket.expected,
            "tracked completed upload"
        );
        bucket.records.push(record);
        bucket.records.len() as u32
    }

    pub fn get_uploaded(&self, key: &str) -> Vec<UploadedFileInfo> {
        let inner = self.read();
        inner
            .buckets
            .get(&inner.resolve(key))
            .map(|b| b.records.clone())
            .unwrap_or_default()
    }

    pub fn get_count(&self, key: &str) -> u32 {
        let inner = self.read();
        inner
            .buckets
            .get(&inner.resolve(key))
            .map_or(0, |b| b.records.len() as u32)
    }

    pub fn get_expected_count(&self, key: &str) -> u32 {
        let inner = self.read();
        inner
            .buckets
            .get(&inner.resolve(key))
            .map_or(0, |b| b.expected)
    }

    /// True when an expected count is set and at least that many uploads
    /// have been recorded. Always false for an expected count of zero.
    pub fn is_complete(&self, key: &str) -> bool {
        let inner = self.read();
        inner
            .buckets
            .get(&inner.resolve(key))
            .is_some_and(|b| b.expected > 0 && b.records.len() as u32 >= b.expected)
    }

    /// Removes the bucket `key` resolves to. Aliases are kept so late
    /// arrivals still land under the durable key.
    pub fn clear(&self, key: &str) {
        let mut inner = self.write();
        let resolved = inner.resolve(key);
        inner.buckets.remove(&resolved);
    }

    /// Binds `old` to `new`: future operations on `old` resolve to `new`,
    /// and records already held under `old` move into `new`'s bucket.
    ///
    /// Idempotent. Records whose storage path sits in `old`'s folder are
    /// re-pointed to the same file name in `new`'s folder, matching the
    /// relocation performed during reconciliation. Returns the number of
    /// records moved.
    pub fn rekey(&self, old: &str, new: &str) -> usize {
        let mut inner = self.write();
        let from = inner.resolve(old);
        let to = inner.resolve(new);
        if from == to {
            return 0;
        }

        inner.aliases.insert(from.clone(), to.clone());
        if old != from {
            inner.aliases.insert(old.to_string(), to.clone());
        }

        let Some(moved) = inner.buckets.remove(&from) else {
            info!(old = %from, new = %to, moved = 0, "rekeyed uploads");
            return 0;
        };

        let target = inner.buckets.entry(to.clone()).or_default();
        if target.expected == 0 {
            target.expected = moved.expected;
        }
        let count = moved.records.len();
        target.records.extend(
            moved
                .records
                .into_iter()
                .map(|record| repoint(record, &from, &to)),
        );

        info!(old = %from, new = %to, moved = count, total = target.records.len(), "rekeyed uploads");
        count
    }
}

fn repoint(mut record: UploadedFileInfo, from: &str, to: &str) -> UploadedFileInfo {
    let path = Path::new(&record.storage_path);
    let in_from_dir = path
        .parent()
        .and_then(Path::file_name)
        .is_some_and(|dir| dir == from);
    if let (true, Some(root), Some(name)) = (
        in_from_dir,
        path.parent().and_then(Path::parent),
        path.file_name(),
    ) {
        record.storage_path = root.join(to).join(name).to_string_lossy().into_owned();
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;

    fn rec(key: &str, id: &str) -> UploadedFileInfo {
        UploadedFileInfo {
            file_id: id.into(),
            filename: format!("{id}.pdf"),
            file_type: "application/pdf".into(),
            uploaded_at: Utc::now(),
            storage_path: format!("/buf/{key}/{id}_{id}.pdf"),
        }
    }

    #[test]
    fn unknown_key_reads_are_empty() {
        let r = Registry::new();
        assert!(r.get_uploaded("nope").is_empty());
        assert_eq!(r.get_count("nope"), 0);
        assert_eq!(r.get_expected_count("nope"), 0);
        assert!(!r.is_complete("nope"));
        r.clear("nope");
    }

    #[test]
    fn track_and_complete() {
        let r = Registry::new();
        r.register_expected("APP-1", 2);
        assert_eq!(r.track_completed("APP-1", rec("APP-1", "f1")), 1);
        assert!(!r.is_complete("APP-1"));
        r.track_completed("APP-1", rec("APP-1", "f2"));
        assert!(r.is_complete("APP-1"));
        assert_eq!(r.get_count("APP-1"), 2);
    }

    #[test]
    fn zero_expected_is_never_complete() {
        let r = Registry::new();
        r.track_completed("b1", rec("b1", "f1"));
        assert!(!r.is_complete("b1"));
        r.register_expected("b1", 0);
        assert!(!r.is_complete("b1"));
    }

    #[test]
    fn register_expected_is_upsert() {
        let r = Registry::new();
        r.register_expected("k", 3);
        r.register_expected("k", 3);
        assert_eq!(r.get_expected_count("k"), 3);
        r.register_expected("k", 1);
        assert_eq!(r.get_expected_count("k"), 1);
    }

    #[test]
    fn concurrent_tracking_loses_nothing() {
        let r = Arc::new(Registry::new());
        let handles: Vec<_> = (0..100)
            .map(|i| {
                let r = Arc::clone(&r);
                std::thread::spawn(move || {
                    r.track_completed("k", rec("k", &format!("f{i}")));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(r.get_count("k"), 100);
    }

    #[test]
    fn rekey_merges_and_follows_late_arrivals() {
        let r = Registry::new();
        r.register_expected("APP-1", 3);
        r.track_completed("b1", rec("b1", "f1"));
        r.track_completed("b1", rec("b1", "f2"));

        assert_eq!(r.rekey("b1", "APP-1"), 2);
        assert_eq!(r.get_count("APP-1"), 2);

        r.track_completed("b1", rec("b1", "f3"));
        r.track_completed("APP-1", rec("APP-1", "f4"));
        assert_eq!(r.get_count("APP-1"), 4);
        assert_eq!(r.get_count("b1"), 4);
        assert_eq!(r.resolve("b1"), "APP-1");
        assert!(r.is_complete("APP-1"));
    }

    #[test]
    fn rekey_is_idempotent() {
        let r = Registry::new();
        r.track_completed("b1", rec("b1", "f1"));
        r.rekey("b1", "APP-1");
        assert_eq!(r.rekey("b1", "APP-1"), 0);
        assert_eq!(r.get_count("APP-1"), 1);
        assert_eq!(r.resolve("b1"), "APP-1");
    }

    #[test]
    fn rekey_keeps_target_expected_count() {
        let r = Registry::new();
        r.register_expected("APP-1", 5);
        r.register_expected("b1", 2);
        r.track_completed("b1", rec("b1", "f1"));
        r.rekey("b1", "APP-1");
        assert_eq!(r.get_expected_count("APP-1"), 5);
    }

    #[test]
    fn rekey_adopts_source_expected_when_target_has_none() {
        let r = Registry::new();
        r.register_expected("b1", 2);
        r.rekey("b1", "APP-1");
        assert_eq!(r.get_expected_count("APP-1"), 2);
    }

    #[test]
    fn rekey_repoints_storage_paths() {
        let r = Registry::new();
        r.track_completed("b1", rec("b1", "f1"));
        r.rekey("b1", "APP-1");
        let docs = r.get_uploaded("APP-1");
        assert_eq!(
            Path::new(&docs[0].storage_path),
            Path::new("/buf/APP-1/f1_f1.pdf")
        );
    }

    #[test]
    fn rekey_chains_resolve_to_the_end() {
        let r = Registry::new();
        r.track_completed("a", rec("a", "f1"));
        r.rekey("a", "b");
        r.rekey("b", "c");
        r.track_completed("a", rec("a", "f2"));
        assert_eq!(r.resolve("a"), "c");
        assert_eq!(r.get_count("c"), 2);
        // Reversing an existing chain must not create a cycle.
        assert_eq!(r.rekey("c", "a"), 0);
        assert_eq!(r.resolve("a"), "c");
    }

    #[test]
    fn rekey_racing_with_trackers_loses_nothing() {
        let r = Arc::new(Registry::new());
        let writers: Vec<_> = (0..50)
            .map(|i| {
                let r = Arc::clone(&r);
                std::thread::spawn(move || {
                    r.track_completed("b1", rec("b1", &format!("f{i}")));
                })
            })
            .collect();
        let rekey = {
            let r = Arc::clone(&r);
            std::thread::spawn(move || {
                r.rekey("b1", "APP-1");
            })
        };
        for h in writers {
            h.join().unwrap();
        }
        rekey.join().unwrap();
        // Tracks that ran before the rekey were merged; the rest resolved.
        assert_eq!(r.get_count("APP-1"), 50);
    }

    #[test]
    fn clear_removes_bucket_but_keeps_alias() {
        let r = Registry::new();
        r.track_completed("b1", rec("b1", "f1"));
        r.rekey("b1", "APP-1");
        r.clear("b1");
        assert_eq!(r.get_count("APP-1"), 0);
        r.track_completed("b1", rec("b1", "f2"));
        assert_eq!(r.get_count("APP-1"), 1);
    }
}
