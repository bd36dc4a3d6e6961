//! Drives the reconciler over every configured group on a fixed interval
//!
//! One tick reconciles the groups strictly in configuration order. The wait
//! starts after the last group finishes, so a slow tick delays the next one
//! instead of overlapping it.

use async_trait::async_trait;
use std::time::Duration;

use super::reconciler::Reconciler;
use crate::config::GroupMapping;
use crate::error::SyncError;
use crate::services::{AuthoritySource, GroupDirectory};
use crate::utils::clock::Clock;

/// Default pause between ticks (60 seconds)
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;

/// Decides when the next tick runs
#[async_trait]
pub trait TickSource: Send {
    /// Waits until the next tick is due. Returning false stops the scheduler.
    async fn wait(&mut self) -> bool;
}

/// Sleeps a fixed interval between ticks, forever
#[derive(Debug, Clone, Copy)]
pub struct IntervalTicks {
    interval: Duration,
}

impl IntervalTicks {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for IntervalTicks {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS))
    }
}

#[async_trait]
impl TickSource for IntervalTicks {
    async fn wait(&mut self) -> bool {
        tokio::time::sleep(self.interval).await;
        true
    }
}

pub struct Scheduler<A, D, C, T> {
    reconciler: Reconciler<A, D, C>,
    groups: Vec<GroupMapping>,
    ticks: T,
}

impl<A, D, C, T> Scheduler<A, D, C, T>
where
    A: AuthoritySource,
    D: GroupDirectory,
    C: Clock,
    T: TickSource,
{
    pub fn new(reconciler: Reconciler<A, D, C>, groups: Vec<GroupMapping>, ticks: T) -> Self {
        Self {
            reconciler,
            groups,
            ticks,
        }
    }

    pub fn reconciler(&self) -> &Reconciler<A, D, C> {
        &self.reconciler
    }

    /// Run ticks until the tick source stops or a halting error occurs
    ///
    /// The first tick runs immediately. With `IntervalTicks` this only returns
    /// on error.
    pub async fn run(&mut self) -> Result<(), SyncError> {
        log::info!(
            "Starting access group sync for {} group(s)",
            self.groups.len()
        );

        let mut tick: u64 = 0;
        loop {
            tick += 1;
            log::debug!("Tick {} started", tick);

            let report = self.reconciler.run_tick(&self.groups).await?;

            log::debug!(
                "Tick {} finished: {} in sync, {} corrected, {} skipped{}",
                tick,
                report.in_sync,
                report.corrected,
                report.skipped,
                if report.aborted { ", aborted early" } else { "" }
            );

            if !self.ticks.wait().await {
                log::info!("Stopping access group sync after {} tick(s)", tick);
                return Ok(());
            }
        }
    }
}
