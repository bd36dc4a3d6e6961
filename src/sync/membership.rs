//! Membership sets and the difference between authorized and remote membership

use std::collections::BTreeSet;

/// A set of email addresses, compared by set equality
///
/// Ordered so write payloads and log lines are deterministic.
pub type MembershipSet = BTreeSet<String>;

/// Emails that must be added to, and removed from, a remote group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub to_add: MembershipSet,
    pub to_remove: MembershipSet,
}

impl MembershipDiff {
    /// Compares the authorized set with the current remote set
    pub fn between(authorized: &MembershipSet, current: &MembershipSet) -> Self {
        Self {
            to_add: authorized.difference(current).cloned().collect(),
            to_remove: current.difference(authorized).cloned().collect(),
        }
    }

    /// True when the remote group already matches the authorized set
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Joins a set for log output
pub(crate) fn join(set: &MembershipSet) -> String {
    set.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}
