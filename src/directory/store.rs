//! Dual-indexed directory snapshot with atomic replacement

use crate::directory::DirectoryEntry;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// One generation of the directory.
///
/// Both indexes are built from the same fetch and published together, so a
/// reader holding a snapshot always sees them agree.
#[derive(Debug, Default)]
pub struct DirectorySnapshot {
    by_id: HashMap<String, Arc<DirectoryEntry>>,
    by_email: HashMap<String, Arc<DirectoryEntry>>,
    refreshed_at: Option<Instant>,
    refreshed_at_utc: Option<DateTime<Utc>>,
}

impl DirectorySnapshot {
    pub fn get_by_id(&self, id: &str) -> Option<&DirectoryEntry> {
        self.by_id.get(id).map(Arc::as_ref)
    }

    pub fn get_by_email(&self, email: &str) -> Option<&DirectoryEntry> {
        self.by_email.get(email).map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.by_id.values().map(Arc::as_ref)
    }

    /// Wall-clock time of the refresh that produced this snapshot
    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at_utc
    }

    /// Both indexes cover the same entries under their own keys
    pub fn is_consistent(&self) -> bool {
        self.by_id.len() == self.by_email.len()
            && self.by_id.values().all(|entry| {
                entry
                    .email
                    .as_deref()
                    .and_then(|email| self.by_email.get(email))
                    .is_some_and(|other| other.id == entry.id)
            })
    }
}

/// The shared directory. Reads are lock-free, replacement swaps a whole
/// snapshot.
#[derive(Debug, Default)]
pub struct DirectoryStore {
    current: ArcSwap<DirectorySnapshot>,
}

impl DirectoryStore {
    /// Empty store that has never been refreshed (always stale)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup_by_id(&self, id: &str) -> Option<DirectoryEntry> {
        self.current.load().get_by_id(id).cloned()
    }

    pub fn lookup_by_email(&self, email: &str) -> Option<DirectoryEntry> {
        self.current.load().get_by_email(email).cloned()
    }

    /// Consistent view of the current generation
    pub fn snapshot(&self) -> Arc<DirectorySnapshot> {
        self.current.load_full()
    }

    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_empty()
    }

    pub fn last_refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.current.load().refreshed_at_utc
    }

    /// True iff the store was refreshed less than `ttl` ago
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.current
            .load()
            .refreshed_at
            .is_some_and(|at| at.elapsed() < ttl)
    }

    /// Rebuild both indexes from `entries` and publish them in one swap.
    ///
    /// Ineligible entries are dropped. If two eligible entries share an
    /// email, the first one wins. Returns the number of indexed entries.
    ///
    /// Callers must serialize replacements; `RefreshCoordinator` does this
    /// under its refresh lock.
    pub fn replace_all(&self, entries: impl IntoIterator<Item = DirectoryEntry>) -> usize {
        let mut by_id: HashMap<String, Arc<DirectoryEntry>> = HashMap::new();
        let mut by_email: HashMap<String, Arc<DirectoryEntry>> = HashMap::new();
        let mut skipped = 0usize;

        for entry in entries {
            if !entry.is_eligible() {
                skipped += 1;
                continue;
            }
            let Some(email) = entry.email.clone() else {
                continue;
            };
            if by_id.contains_key(&entry.id) || by_email.contains_key(&email) {
                tracing::warn!(
                    user_id = %entry.id,
                    "Duplicate id or email in directory fetch, keeping first entry"
                );
                skipped += 1;
                continue;
            }

            let entry = Arc::new(entry);
            by_id.insert(entry.id.clone(), entry.clone());
            by_email.insert(email, entry);
        }

        let previous = self.current.load();
        let now = Instant::now();
        let refreshed_at = match previous.refreshed_at {
            Some(prev) if prev > now => prev,
            _ => now,
        };

        let indexed = by_id.len();
        self.current.store(Arc::new(DirectorySnapshot {
            by_id,
            by_email,
            refreshed_at: Some(refreshed_at),
            refreshed_at_utc: Some(Utc::now()),
        }));

        tracing::debug!(indexed = indexed, skipped = skipped, "Directory snapshot replaced");
        indexed
    }
}
