//! Access group synchronization
//!
//! This module provides:
//! - Membership sets and their difference
//! - The reconciler that corrects one group at a time
//! - The scheduler that runs the reconciler over every group, forever

mod membership;
mod reconciler;
mod scheduler;

pub use membership::{MembershipDiff, MembershipSet};
pub use reconciler::{DEFAULT_STALENESS_THRESHOLD_SECS, GroupOutcome, Reconciler, TickReport};
pub use scheduler::{DEFAULT_CHECK_INTERVAL_SECS, IntervalTicks, Scheduler, TickSource};
