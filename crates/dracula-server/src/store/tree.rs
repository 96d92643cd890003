//! Per-namespace expiring key tree
//!
//! An ordered map of entry key to a list of absolute expiry timestamps, one
//! per PUT. Nothing garbage collects on its own; entries are pruned whenever
//! the structure is touched, so correctness never depends on a background
//! sweep.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use regex::Regex;

/// Thread-safe expiring multiset of entry keys, owned by one namespace.
#[derive(Debug)]
pub struct Tree {
    expire_after_secs: i64,
    entries: Mutex<BTreeMap<String, Vec<i64>>>,
}

impl Tree {
    pub fn new(expire_after_secs: i64) -> Self {
        Self {
            expire_after_secs,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record one occurrence of `entry_key`, expiring `expire_after_secs`
    /// from now. Already-expired occurrences are dropped on the way.
    pub fn put(&self, entry_key: &str) {
        let now = now_secs();
        let mut entries = self.entries.lock();
        let stamps = entries.entry(entry_key.to_string()).or_default();
        stamps.retain(|&at| at > now);
        stamps.push(now + self.expire_after_secs);
    }

    /// Number of unexpired occurrences at `entry_key`. Side effect: prunes
    /// stale occurrences, and removes the key entirely when none remain.
    pub fn count(&self, entry_key: &str) -> usize {
        let now = now_secs();
        let mut entries = self.entries.lock();
        let Some(stamps) = entries.get_mut(entry_key) else {
            return 0;
        };
        stamps.retain(|&at| at > now);
        if stamps.is_empty() {
            entries.remove(entry_key);
            return 0;
        }
        stamps.len()
    }

    /// Every live key plus the sum of all live occurrence counts. Expensive:
    /// the whole tree is counted and expired where necessary.
    pub fn keys(&self) -> (Vec<String>, usize) {
        let snapshot: Vec<String> = self.entries.lock().keys().cloned().collect();

        let mut out_keys = Vec::new();
        let mut out_count = 0;
        for key in snapshot {
            let key_count = self.count(&key);
            out_count += key_count;
            if key_count > 0 {
                out_keys.push(key);
            }
        }
        (out_keys, out_count)
    }

    /// Keys with at least one live occurrence matching `pattern`, where `*`
    /// matches empty at either end of the string or one-or-more characters.
    /// The rest of the pattern is treated as a regular expression; a pattern
    /// that fails to compile yields the compiler's message as the only
    /// element. Matching keys are counted, which expires them as a side
    /// effect.
    pub fn match_keys(&self, pattern: &str) -> Vec<String> {
        let re = match Regex::new(&pattern.replace('*', "($|^|.+)")) {
            Ok(re) => re,
            Err(err) => return vec![err.to_string()],
        };

        let snapshot: Vec<String> = self.entries.lock().keys().cloned().collect();
        snapshot
            .into_iter()
            .filter(|key| re.is_match(key) && self.count(key) > 0)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn test_put_then_count() {
        let tree = Tree::new(60);
        assert_eq!(tree.count("k"), 0);
        tree.put("k");
        tree.put("k");
        tree.put("k");
        assert_eq!(tree.count("k"), 3);
        assert_eq!(tree.count("missing"), 0);
    }

    #[test]
    fn test_occurrences_expire() {
        let tree = Tree::new(1);
        tree.put("k");
        tree.put("k");
        assert_eq!(tree.count("k"), 2);
        sleep(Duration::from_millis(1100));
        assert_eq!(tree.count("k"), 0);
        // the key itself is gone too
        assert!(tree.is_empty());
    }

    #[test]
    fn test_keys_reports_live_keys_and_total() {
        let tree = Tree::new(60);
        tree.put("a");
        tree.put("a");
        tree.put("b");
        let (keys, total) = tree.keys();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(total, 3);
    }

    #[test]
    fn test_keys_prunes_expired() {
        let tree = Tree::new(1);
        tree.put("gone");
        sleep(Duration::from_millis(1100));
        tree.put("kept");
        let (keys, total) = tree.keys();
        assert_eq!(keys, vec!["kept".to_string()]);
        assert_eq!(total, 1);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_match_keys_star_glob() {
        let tree = Tree::new(60);
        for key in ["blah", "blat", "blah:ce", "blah:2", "blah:a", "blaM!"] {
            tree.put(key);
        }
        let mut matched = tree.match_keys("blah*");
        matched.sort();
        assert_eq!(matched, vec!["blah", "blah:2", "blah:a", "blah:ce"]);
    }

    #[test]
    fn test_match_keys_bad_pattern_returns_error_text() {
        let tree = Tree::new(60);
        tree.put("x");
        let out = tree.match_keys("[");
        assert_eq!(out.len(), 1);
        assert!(out[0].contains("regex"));
    }

    #[test]
    fn test_match_keys_skips_expired() {
        let tree = Tree::new(1);
        tree.put("blah");
        sleep(Duration::from_millis(1100));
        assert!(tree.match_keys("blah*").is_empty());
    }
}
