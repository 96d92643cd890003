//! The counting store
//!
//! Two levels: an unordered namespace map, and one [`Tree`] per namespace.
//! The map is only locked while it is being mutated; all data access goes
//! through the tree's own lock, so the tree pointer must stay stable once
//! inserted (`Arc` guarantees that).
//!
//! A background sweep expires a bounded fraction of namespaces per pass.
//! Every read path self-expires, so the sweep only reclaims memory; it is
//! never needed for correct counts.

pub mod tree;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::DEFAULT_CLEANUP_DENOMINATOR;
use crate::metrics;
use tree::Tree;

/// How often the partial cleanup sweep runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(15);

/// Below this many namespaces a sweep is not worth its own bookkeeping.
const CLEANUP_MIN_NAMESPACES: usize = 3;

/// Namespace map of expiring key trees.
#[derive(Debug)]
pub struct Store {
    namespaces: DashMap<String, Arc<Tree>>,
    expire_after_secs: i64,
    cleanup_enabled: AtomicBool,
    cleanup_denominator: usize,
}

/// What one cleanup pass did, for logs and gauges.
#[derive(Debug, Default, Clone, Copy)]
pub struct CleanupReport {
    /// Namespace count at the start of the pass.
    pub namespaces_total: usize,
    /// How many namespaces this pass visited.
    pub swept: usize,
    /// Namespaces removed because they ended empty.
    pub removed: usize,
    /// Live keys left in the visited namespaces.
    pub keys_remaining: usize,
    /// Live occurrences left in the visited namespaces.
    pub entries_remaining: usize,
    /// Wall time the pass took.
    pub elapsed: Duration,
}

impl Store {
    pub fn new(expire_after_secs: i64) -> Self {
        Self {
            namespaces: DashMap::new(),
            expire_after_secs,
            cleanup_enabled: AtomicBool::new(true),
            cleanup_denominator: DEFAULT_CLEANUP_DENOMINATOR,
        }
    }

    pub fn with_cleanup_denominator(mut self, denominator: usize) -> Self {
        self.cleanup_denominator = denominator.max(1);
        self
    }

    /// Record one occurrence of `entry_key` in `namespace`, creating the
    /// namespace on first use.
    pub fn put(&self, namespace: &str, entry_key: &str) {
        let tree = self
            .namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(Tree::new(self.expire_after_secs)))
            .clone();
        tree.put(entry_key);
    }

    /// Unexpired occurrences of `entry_key` in `namespace`.
    pub fn count(&self, namespace: &str, entry_key: &str) -> usize {
        match self.tree(namespace) {
            Some(tree) => tree.count(entry_key),
            None => 0,
        }
    }

    /// Unexpired occurrences across every key in `namespace`. Expensive:
    /// counts and expires the whole namespace.
    pub fn count_namespace(&self, namespace: &str) -> usize {
        match self.tree(namespace) {
            Some(tree) => tree.keys().1,
            None => 0,
        }
    }

    /// Unexpired occurrences across the whole store. Very expensive, and
    /// only approximate while writers are active: the namespace list is a
    /// snapshot and each namespace is counted without a store-wide lock.
    pub fn count_server(&self) -> usize {
        let names = self.namespace_names();
        names
            .into_iter()
            .map(|name| self.count_namespace(&name))
            .sum()
    }

    /// Live keys in `namespace` matching a `*` glob pattern.
    pub fn key_match(&self, namespace: &str, pattern: &str) -> Vec<String> {
        match self.tree(namespace) {
            Some(tree) => tree.match_keys(pattern),
            None => Vec::new(),
        }
    }

    /// Names of all namespaces, including any that are fully expired but
    /// not yet swept.
    pub fn list_namespaces(&self) -> Vec<String> {
        self.namespace_names()
    }

    /// Drop every namespace. For test harnesses.
    pub fn clear(&self) {
        self.namespaces.clear();
    }

    /// Stop future cleanup passes. There is no way to turn them back on;
    /// this is a shutdown affordance.
    pub fn disable_cleanup(&self) {
        self.cleanup_enabled.store(false, Ordering::SeqCst);
    }

    /// Spawn the periodic partial sweep. The task ends once cleanup is
    /// disabled.
    pub fn spawn_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick fires immediately; skip it so a fresh server
            // does not sweep an empty store
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !store.cleanup_enabled.load(Ordering::SeqCst) {
                    break;
                }
                let report = store.cleanup_pass();
                metrics::record_gc(store.cleanup_denominator, &report);
                debug!(
                    namespaces = report.namespaces_total,
                    swept = report.swept,
                    removed = report.removed,
                    keys_remaining = report.keys_remaining,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "store cleanup pass"
                );
            }
        })
    }

    /// One bounded sweep: visit ⌊N / denominator⌋ namespaces from the
    /// current (arbitrary-order) snapshot, expire them, and drop the ones
    /// that end empty.
    pub fn cleanup_pass(&self) -> CleanupReport {
        let started = Instant::now();
        let names = self.namespace_names();

        let mut report = CleanupReport {
            namespaces_total: names.len(),
            ..CleanupReport::default()
        };

        if names.len() < CLEANUP_MIN_NAMESPACES {
            report.elapsed = started.elapsed();
            return report;
        }
        let target = names.len() / self.cleanup_denominator;
        if target < 1 {
            report.elapsed = started.elapsed();
            return report;
        }

        for name in names.iter().take(target) {
            let Some(tree) = self.tree(name) else {
                continue;
            };
            report.swept += 1;
            let (keys, entries) = tree.keys();
            report.keys_remaining += keys.len();
            report.entries_remaining += entries;
            if tree.is_empty() && self.namespaces.remove_if(name, |_, t| t.is_empty()).is_some() {
                report.removed += 1;
            }
        }

        report.elapsed = started.elapsed();
        report
    }

    fn tree(&self, namespace: &str) -> Option<Arc<Tree>> {
        self.namespaces.get(namespace).map(|entry| entry.clone())
    }

    fn namespace_names(&self) -> Vec<String> {
        self.namespaces
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}
