//! Reconciliation of one access group against the authority source
//!
//! For each group the authorized set is read from the database and compared
//! with the last known remote membership. The remote snapshot is re-read when
//! it is missing or older than the staleness threshold. When the two sets
//! differ the remote group is overwritten with the authorized set and the
//! snapshot is dropped, so the next pass compares against what was written.

use chrono::Duration;

use super::membership::{MembershipDiff, join};
use crate::config::GroupMapping;
use crate::error::{FailureAction, SyncError};
use crate::services::{AuthoritySource, GroupDirectory};
use crate::utils::cache::{CacheEntry, GroupCache};
use crate::utils::clock::Clock;

/// Default maximum age of a remote snapshot (30 minutes)
pub const DEFAULT_STALENESS_THRESHOLD_SECS: i64 = 30 * 60;

/// Result of reconciling a single group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOutcome {
    /// Remote membership already matched; `refreshed` is true when the
    /// comparison used a snapshot fetched during this pass
    InSync { refreshed: bool },
    /// Remote membership was overwritten with the authorized set
    Corrected { diff: MembershipDiff },
}

/// Counts of what happened during one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub in_sync: usize,
    pub corrected: usize,
    pub skipped: usize,
    /// True when a dependency outage ended the tick before every group ran
    pub aborted: bool,
}

pub struct Reconciler<A, D, C> {
    authority: A,
    directory: D,
    cache: GroupCache,
    clock: C,
    staleness_threshold: Duration,
    halt_on_error: bool,
}

impl<A, D, C> Reconciler<A, D, C>
where
    A: AuthoritySource,
    D: GroupDirectory,
    C: Clock,
{
    /// Creates a reconciler that halts on the first error and uses the default threshold
    pub fn new(authority: A, directory: D, cache: GroupCache, clock: C) -> Self {
        Self {
            authority,
            directory,
            cache,
            clock,
            staleness_threshold: Duration::seconds(DEFAULT_STALENESS_THRESHOLD_SECS),
            halt_on_error: true,
        }
    }

    pub fn with_staleness_threshold(mut self, threshold: Duration) -> Self {
        self.staleness_threshold = threshold;
        self
    }

    /// When false, failures skip the group or end the tick instead of halting
    pub fn with_halt_on_error(mut self, halt_on_error: bool) -> Self {
        self.halt_on_error = halt_on_error;
        self
    }

    pub fn cache(&self) -> &GroupCache {
        &self.cache
    }

    /// A snapshot is stale once it is strictly older than the threshold.
    /// An entry exactly at the threshold is still used.
    fn is_stale(&self, entry: &CacheEntry) -> bool {
        entry.age(self.clock.now()) > self.staleness_threshold
    }

    /// Bring one remote group in line with its authorized set
    ///
    /// # Errors
    /// Any collaborator failure is returned unchanged. A failed write leaves
    /// the cached snapshot in place.
    pub async fn reconcile_group(&self, mapping: &GroupMapping) -> Result<GroupOutcome, SyncError> {
        let authorized = self.authority.authorized_emails(&mapping.roles).await?;

        let (entry, refreshed) = match self.cache.get(&mapping.name).await {
            Some(entry) if !self.is_stale(&entry) => (entry, false),
            cached => {
                if cached.is_some() {
                    log::debug!("Cached snapshot of '{}' is stale, refreshing", mapping.name);
                } else {
                    log::debug!("No cached snapshot of '{}', fetching", mapping.name);
                }
                let group = self.directory.resolve(&mapping.name).await?;
                let entry = CacheEntry {
                    members: self.directory.current_members(&group),
                    ..CacheEntry::from_group(&group, self.clock.now())
                };
                self.cache.put(&mapping.name, entry.clone()).await;
                (entry, true)
            }
        };

        let diff = MembershipDiff::between(&authorized, &entry.members);
        if diff.is_empty() {
            log::debug!(
                "Access group '{}' in sync ({} member(s))",
                mapping.name,
                authorized.len()
            );
            return Ok(GroupOutcome::InSync { refreshed });
        }

        log::info!(
            "Correcting access group '{}': add [{}], remove [{}]",
            mapping.name,
            join(&diff.to_add),
            join(&diff.to_remove)
        );
        log::info!("Authorized for '{}': [{}]", mapping.name, join(&authorized));
        log::info!("Remote for '{}': [{}]", mapping.name, join(&entry.members));

        self.directory.set_members(&entry.group(), &authorized).await?;
        self.cache.invalidate(&mapping.name).await;

        Ok(GroupOutcome::Corrected { diff })
    }

    /// Reconcile every group in configuration order
    ///
    /// Failures are handled according to `SyncError::action`: a halting error
    /// is returned immediately, otherwise the group is skipped or the rest of
    /// the tick is abandoned.
    pub async fn run_tick(&self, groups: &[GroupMapping]) -> Result<TickReport, SyncError> {
        let mut report = TickReport::default();

        for mapping in groups {
            match self.reconcile_group(mapping).await {
                Ok(GroupOutcome::InSync { .. }) => report.in_sync += 1,
                Ok(GroupOutcome::Corrected { .. }) => report.corrected += 1,
                Err(e) => match e.action(self.halt_on_error) {
                    FailureAction::Halt => return Err(e),
                    FailureAction::AbortTick => {
                        log::error!(
                            "Aborting tick at access group '{}': {}",
                            mapping.name,
                            e
                        );
                        report.aborted = true;
                        break;
                    }
                    FailureAction::SkipGroup => {
                        log::error!("Skipping access group '{}': {}", mapping.name, e);
                        report.skipped += 1;
                    }
                },
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthorityError, DirectoryError};
    use crate::sync::MembershipSet;
    use crate::utils::test_utils::{FakeAuthority, FakeDirectory, ManualClock, mapping, set};

    fn reconciler(
        authority: &FakeAuthority,
        directory: &FakeDirectory,
        clock: &ManualClock,
    ) -> Reconciler<FakeAuthority, FakeDirectory, ManualClock> {
        Reconciler::new(
            authority.clone(),
            directory.clone(),
            GroupCache::new(),
            clock.clone(),
        )
    }

    #[tokio::test]
    async fn test_no_write_when_in_sync_across_ticks() {
        let authority = FakeAuthority::default();
        authority.grant("admin", &["a@x.com", "b@x.com"]);
        let directory = FakeDirectory::default().with_group("g1", "Staff", &["a@x.com", "b@x.com"]);
        let clock = ManualClock::start();
        let r = reconciler(&authority, &directory, &clock);
        let groups = vec![mapping("staff", &["admin"])];

        for _ in 0..10 {
            let report = r.run_tick(&groups).await.unwrap();
            assert_eq!(report.in_sync, 1);
            clock.advance(Duration::seconds(60));
        }

        assert!(directory.writes().is_empty(), "No write expected");
        // Ten minutes of ticks fit inside one snapshot lifetime
        assert_eq!(directory.resolves(), 1);
    }

    #[tokio::test]
    async fn test_converges_with_single_full_write() {
        let authority = FakeAuthority::default();
        authority.grant("admin", &["a@x.com", "b@x.com", "c@x.com"]);
        let directory = FakeDirectory::default().with_group("g1", "Staff", &["a@x.com", "d@x.com"]);
        let clock = ManualClock::start();
        let r = reconciler(&authority, &directory, &clock);

        let outcome = r.reconcile_group(&mapping("staff", &["admin"])).await.unwrap();

        assert_eq!(
            outcome,
            GroupOutcome::Corrected {
                diff: MembershipDiff {
                    to_add: set(&["b@x.com", "c@x.com"]),
                    to_remove: set(&["d@x.com"]),
                }
            }
        );
        assert_eq!(
            directory.writes(),
            vec![("g1".to_string(), set(&["a@x.com", "b@x.com", "c@x.com"]))]
        );
    }

    #[tokio::test]
    async fn test_cache_evicted_after_write() {
        let authority = FakeAuthority::default();
        authority.grant("admin", &["a@x.com"]);
        let directory = FakeDirectory::default().with_group("g1", "Staff", &["z@x.com"]);
        let clock = ManualClock::start();
        let r = reconciler(&authority, &directory, &clock);
        let group = mapping("staff", &["admin"]);

        r.reconcile_group(&group).await.unwrap();
        assert_eq!(directory.resolves(), 1);
        assert!(r.cache().get("staff").await.is_none());

        // Next pass must read the remote again instead of trusting the old snapshot
        let outcome = r.reconcile_group(&group).await.unwrap();
        assert_eq!(outcome, GroupOutcome::InSync { refreshed: true });
        assert_eq!(directory.resolves(), 2);
        assert_eq!(directory.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_fresh_snapshot_hides_remote_drift_until_stale() {
        let authority = FakeAuthority::default();
        authority.grant("admin", &["a@x.com"]);
        let directory = FakeDirectory::default().with_group("g1", "Staff", &["a@x.com"]);
        let clock = ManualClock::start();
        let r = reconciler(&authority, &directory, &clock);
        let group = mapping("staff", &["admin"]);

        r.reconcile_group(&group).await.unwrap();

        // Someone edits the group by hand; the fresh snapshot still says in sync
        directory.set_remote("g1", &["a@x.com", "intruder@x.com"]);
        clock.advance(Duration::minutes(10));
        assert_eq!(
            r.reconcile_group(&group).await.unwrap(),
            GroupOutcome::InSync { refreshed: false }
        );
        assert_eq!(directory.resolves(), 1);

        // Past the threshold the snapshot is re-read and the drift corrected
        clock.advance(Duration::minutes(21));
        let outcome = r.reconcile_group(&group).await.unwrap();
        assert_eq!(
            outcome,
            GroupOutcome::Corrected {
                diff: MembershipDiff {
                    to_add: MembershipSet::new(),
                    to_remove: set(&["intruder@x.com"]),
                }
            }
        );
        assert_eq!(directory.resolves(), 2);
    }

    #[tokio::test]
    async fn test_stale_snapshot_refreshed_even_when_equal() {
        let authority = FakeAuthority::default();
        authority.grant("admin", &["a@x.com"]);
        let directory = FakeDirectory::default().with_group("g1", "Staff", &["a@x.com"]);
        let clock = ManualClock::start();
        let r = reconciler(&authority, &directory, &clock);
        let group = mapping("staff", &["admin"]);

        r.reconcile_group(&group).await.unwrap();
        clock.advance(Duration::minutes(31));

        assert_eq!(
            r.reconcile_group(&group).await.unwrap(),
            GroupOutcome::InSync { refreshed: true }
        );
        assert_eq!(directory.resolves(), 2);
        assert!(directory.writes().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_exactly_at_threshold_is_reused() {
        let authority = FakeAuthority::default();
        authority.grant("admin", &["a@x.com"]);
        let directory = FakeDirectory::default().with_group("g1", "Staff", &["a@x.com"]);
        let clock = ManualClock::start();
        let r = reconciler(&authority, &directory, &clock);
        let group = mapping("staff", &["admin"]);

        r.reconcile_group(&group).await.unwrap();

        // Refresh happens when the age is strictly greater than the threshold
        clock.advance(Duration::minutes(30));
        assert_eq!(
            r.reconcile_group(&group).await.unwrap(),
            GroupOutcome::InSync { refreshed: false }
        );
        assert_eq!(directory.resolves(), 1);

        clock.advance(Duration::seconds(1));
        assert_eq!(
            r.reconcile_group(&group).await.unwrap(),
            GroupOutcome::InSync { refreshed: true }
        );
        assert_eq!(directory.resolves(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_from_the_future_counts_as_fresh() {
        let authority = FakeAuthority::default();
        authority.grant("admin", &["a@x.com"]);
        let directory = FakeDirectory::default().with_group("g1", "Staff", &["a@x.com"]);
        let clock = ManualClock::start();
        let r = reconciler(&authority, &directory, &clock);
        let group = mapping("staff", &["admin"]);

        r.reconcile_group(&group).await.unwrap();

        // Wall clock stepped back by two hours
        clock.advance(Duration::hours(-2));
        assert_eq!(
            r.reconcile_group(&group).await.unwrap(),
            GroupOutcome::InSync { refreshed: false }
        );
        assert_eq!(directory.resolves(), 1);
    }

    #[tokio::test]
    async fn test_group_name_matches_across_unicode_case() {
        let authority = FakeAuthority::default();
        authority.grant("admin", &["e@x.com"]);
        let directory = FakeDirectory::default().with_group("g1", "Équipe", &["e@x.com"]);
        let clock = ManualClock::start();
        let r = reconciler(&authority, &directory, &clock);

        assert_eq!(
            r.reconcile_group(&mapping("équipe", &["admin"])).await.unwrap(),
            GroupOutcome::InSync { refreshed: true }
        );
        assert!(directory.writes().is_empty());
    }

    #[tokio::test]
    async fn test_custom_threshold() {
        let authority = FakeAuthority::default();
        authority.grant("admin", &["a@x.com"]);
        let directory = FakeDirectory::default().with_group("g1", "Staff", &["a@x.com"]);
        let clock = ManualClock::start();
        let r = reconciler(&authority, &directory, &clock)
            .with_staleness_threshold(Duration::seconds(90));
        let group = mapping("staff", &["admin"]);

        r.reconcile_group(&group).await.unwrap();
        clock.advance(Duration::seconds(91));
        r.reconcile_group(&group).await.unwrap();

        assert_eq!(directory.resolves(), 2);
    }

    #[tokio::test]
    async fn test_unknown_group_fails_without_write() {
        let authority = FakeAuthority::default();
        authority.grant("admin", &["a@x.com"]);
        let directory = FakeDirectory::default().with_group("g1", "Staff", &[]);
        let clock = ManualClock::start();
        let r = reconciler(&authority, &directory, &clock);

        let result = r.reconcile_group(&mapping("moderators", &["admin"])).await;

        assert_eq!(
            result,
            Err(SyncError::Directory(DirectoryError::GroupNotFound(
                "moderators".to_string()
            )))
        );
        assert!(directory.writes().is_empty());
        assert!(r.cache().get("moderators").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_write_keeps_snapshot() {
        let authority = FakeAuthority::default();
        authority.grant("admin", &["a@x.com"]);
        let directory = FakeDirectory::default().with_group("g1", "Staff", &["b@x.com"]);
        directory.reject_writes();
        let clock = ManualClock::start();
        let r = reconciler(&authority, &directory, &clock);

        let result = r.reconcile_group(&mapping("staff", &["admin"])).await;

        assert!(matches!(
            result,
            Err(SyncError::Directory(DirectoryError::Write(_)))
        ));
        let entry = r.cache().get("staff").await.expect("snapshot kept");
        assert_eq!(entry.members, set(&["b@x.com"]));
    }

    #[tokio::test]
    async fn test_authority_failure_skips_remote_read() {
        let authority = FakeAuthority::default();
        authority.fail_with(AuthorityError::Unavailable("connection refused".to_string()));
        let directory = FakeDirectory::default().with_group("g1", "Staff", &[]);
        let clock = ManualClock::start();
        let r = reconciler(&authority, &directory, &clock);

        let result = r.reconcile_group(&mapping("staff", &["admin"])).await;

        assert!(matches!(
            result,
            Err(SyncError::Authority(AuthorityError::Unavailable(_)))
        ));
        assert_eq!(directory.resolves(), 0);
    }

    #[tokio::test]
    async fn test_halting_tick_stops_at_first_failure() {
        let authority = FakeAuthority::default();
        authority.grant("admin", &["a@x.com"]);
        let directory = FakeDirectory::default()
            .with_group("g1", "Staff", &[])
            .with_group("g2", "Admins", &[]);
        let clock = ManualClock::start();
        let r = reconciler(&authority, &directory, &clock);
        let groups = vec![
            mapping("missing", &["admin"]),
            mapping("staff", &["admin"]),
            mapping("admins", &["admin"]),
        ];

        let result = r.run_tick(&groups).await;

        assert!(result.is_err());
        assert!(directory.writes().is_empty(), "Later groups must not run");
    }

    #[tokio::test]
    async fn test_isolating_tick_skips_failed_group() {
        let authority = FakeAuthority::default();
        authority.grant("admin", &["a@x.com"]);
        let directory = FakeDirectory::default()
            .with_group("g1", "Staff", &[])
            .with_group("g2", "Admins", &["a@x.com"]);
        let clock = ManualClock::start();
        let r = reconciler(&authority, &directory, &clock).with_halt_on_error(false);
        let groups = vec![
            mapping("missing", &["admin"]),
            mapping("staff", &["admin"]),
            mapping("admins", &["admin"]),
        ];

        let report = r.run_tick(&groups).await.unwrap();

        assert_eq!(
            report,
            TickReport {
                in_sync: 1,
                corrected: 1,
                skipped: 1,
                aborted: false,
            }
        );
        assert_eq!(directory.writes(), vec![("g1".to_string(), set(&["a@x.com"]))]);
    }

    #[tokio::test]
    async fn test_isolating_tick_aborts_on_outage() {
        let authority = FakeAuthority::default();
        authority.fail_with(AuthorityError::Unavailable("down".to_string()));
        let directory = FakeDirectory::default().with_group("g1", "Staff", &[]);
        let clock = ManualClock::start();
        let r = reconciler(&authority, &directory, &clock).with_halt_on_error(false);
        let groups = vec![mapping("staff", &["admin"]), mapping("admins", &["admin"])];

        let report = r.run_tick(&groups).await.unwrap();

        assert!(report.aborted);
        assert_eq!(report.in_sync + report.corrected + report.skipped, 0);
    }

    #[tokio::test]
    async fn test_end_to_end_staff_scenario() {
        let authority = FakeAuthority::default();
        authority.grant("admin", &["a@x.com"]);
        authority.grant("mod", &["b@x.com"]);
        let directory = FakeDirectory::default().with_group("g-staff", "Staff", &["b@x.com", "c@x.com"]);
        let clock = ManualClock::start();
        let r = reconciler(&authority, &directory, &clock);
        let groups = vec![mapping("Staff", &["admin", "mod"])];

        let first = r.run_tick(&groups).await.unwrap();
        assert_eq!(first.corrected, 1);
        assert_eq!(
            directory.writes(),
            vec![("g-staff".to_string(), set(&["a@x.com", "b@x.com"]))]
        );

        // Immediate re-check reads the written state and finds nothing to do
        let second = r.run_tick(&groups).await.unwrap();
        assert_eq!(second.in_sync, 1);
        assert_eq!(directory.writes().len(), 1);
        assert_eq!(directory.resolves(), 2);
    }
}
