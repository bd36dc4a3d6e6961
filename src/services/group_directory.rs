//! Remote access group directory trait
//!
//! Defines how the reconciler reads and overwrites access group membership.
//! Implementations can target any remote system with full-replace semantics.

use async_trait::async_trait;

use crate::error::DirectoryError;
use crate::sync::MembershipSet;

/// A remote access group as last seen by `GroupDirectory::resolve`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Identifier assigned by the remote system, used for writes
    pub id: String,
    /// Name exactly as the remote system reports it
    pub name: String,
    /// Emails currently listed in the group's include rule
    pub members: MembershipSet,
}

/// Trait for remote access group directories
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    /// Looks up a group by name, ignoring case
    ///
    /// The returned group carries its current membership, so no separate
    /// read call is needed.
    ///
    /// # Returns
    /// * `Ok(group)` - The first group whose name matches
    /// * `Err(DirectoryError::GroupNotFound)` - No group matched
    /// * `Err(DirectoryError::Unavailable)` - Listing the groups failed
    async fn resolve(&self, name: &str) -> Result<Group, DirectoryError>;

    /// Overwrites the group's include rule with exactly `members`
    ///
    /// This is a full replace: exclude and require rules are reset to empty.
    async fn set_members(&self, group: &Group, members: &MembershipSet)
    -> Result<(), DirectoryError>;

    /// Current members of a resolved group
    fn current_members(&self, group: &Group) -> MembershipSet {
        group.members.clone()
    }
}
