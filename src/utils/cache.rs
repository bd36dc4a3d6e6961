use chrono::{DateTime, Utc};
use moka::future::Cache as MokaCache;

use crate::services::Group;
use crate::sync::MembershipSet;

/// Upper bound on cached groups; one entry per configured group is expected
const MAX_CACHED_GROUPS: u64 = 1_000;

/// Last known remote state of one access group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Remote identifier, needed to write without resolving the name again
    pub remote_id: String,
    /// Remote name as reported by the API
    pub remote_name: String,
    pub members: MembershipSet,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Snapshot a freshly resolved group
    pub fn from_group(group: &Group, fetched_at: DateTime<Utc>) -> Self {
        Self {
            remote_id: group.id.clone(),
            remote_name: group.name.clone(),
            members: group.members.clone(),
            fetched_at,
        }
    }

    /// Rebuild the group this entry was taken from
    pub fn group(&self) -> Group {
        Group {
            id: self.remote_id.clone(),
            name: self.remote_name.clone(),
            members: self.members.clone(),
        }
    }

    /// How long ago the snapshot was taken
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.fetched_at
    }
}

/// In-memory snapshots of remote group membership, keyed by configured group name
///
/// Entries never expire on their own. Whether an entry is still fresh enough
/// to use is decided by the reconciler from `CacheEntry::fetched_at`.
#[derive(Clone)]
pub struct GroupCache {
    entries: MokaCache<String, CacheEntry>,
}

impl GroupCache {
    pub fn new() -> Self {
        Self {
            entries: MokaCache::builder().max_capacity(MAX_CACHED_GROUPS).build(),
        }
    }

    pub async fn get(&self, group_name: &str) -> Option<CacheEntry> {
        self.entries.get(group_name).await
    }

    pub async fn put(&self, group_name: &str, entry: CacheEntry) {
        self.entries.insert(group_name.to_string(), entry).await;
    }

    pub async fn invalidate(&self, group_name: &str) {
        self.entries.invalidate(group_name).await;
    }

    pub fn contains(&self, group_name: &str) -> bool {
        self.entries.contains_key(group_name)
    }
}

impl Default for GroupCache {
    fn default() -> Self {
        Self::new()
    }
}
