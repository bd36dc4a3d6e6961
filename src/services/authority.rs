//! Authority source trait for looking up who may join an access group
//!
//! The reconciler only depends on this interface. `RoleDatabase` is the
//! production implementation; tests substitute in-memory fakes.

use async_trait::async_trait;

use crate::error::AuthorityError;
use crate::sync::MembershipSet;

/// Trait for sources of authorized email addresses
#[async_trait]
pub trait AuthoritySource: Send + Sync {
    /// Returns the emails of every user holding at least one of `roles`
    ///
    /// # Arguments
    /// * `roles` - Role names that grant access, in configuration order
    ///
    /// # Returns
    /// * `Ok(emails)` - The authorized set (possibly empty)
    /// * `Err(AuthorityError::Unavailable)` - The query could not be executed
    /// * `Err(AuthorityError::Query)` - The query failed while running
    ///
    /// Implementations must not retry; the caller owns that decision.
    async fn authorized_emails(&self, roles: &[String]) -> Result<MembershipSet, AuthorityError>;
}
