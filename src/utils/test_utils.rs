//! Test doubles for the reconciler and scheduler tests
//!
//! The fakes share their state through `Arc`s, so a test keeps a clone to
//! change assignments or inspect calls while the reconciler owns the other.

#![cfg(test)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::GroupMapping;
use crate::error::{AuthorityError, DirectoryError};
use crate::services::{AuthoritySource, Group, GroupDirectory};
use crate::sync::MembershipSet;
use crate::utils::clock::Clock;

pub fn set(emails: &[&str]) -> MembershipSet {
    emails.iter().map(|e| e.to_string()).collect()
}

pub fn mapping(name: &str, roles: &[&str]) -> GroupMapping {
    GroupMapping {
        name: name.to_string(),
        roles: roles.iter().map(|r| r.to_string()).collect(),
    }
}

/// Role name -> emails
#[derive(Clone, Default)]
pub struct FakeAuthority {
    roles: Arc<Mutex<HashMap<String, MembershipSet>>>,
    failure: Arc<Mutex<Option<AuthorityError>>>,
    calls: Arc<Mutex<usize>>,
}

impl FakeAuthority {
    pub fn grant(&self, role: &str, emails: &[&str]) {
        self.roles
            .lock()
            .unwrap()
            .insert(role.to_string(), set(emails));
    }

    pub fn fail_with(&self, err: AuthorityError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl AuthoritySource for FakeAuthority {
    async fn authorized_emails(&self, roles: &[String]) -> Result<MembershipSet, AuthorityError> {
        *self.calls.lock().unwrap() += 1;
        let failure = self.failure.lock().unwrap().clone();
        if let Some(err) = failure {
            return Err(err);
        }
        let assignments = self.roles.lock().unwrap();
        Ok(roles
            .iter()
            .filter_map(|r| assignments.get(r))
            .flatten()
            .cloned()
            .collect())
    }
}

/// Remote groups with call counters; writes update the stored membership
#[derive(Clone, Default)]
pub struct FakeDirectory {
    groups: Arc<Mutex<Vec<Group>>>,
    resolves: Arc<Mutex<usize>>,
    writes: Arc<Mutex<Vec<(String, MembershipSet)>>>,
    reject_writes: Arc<Mutex<bool>>,
}

impl FakeDirectory {
    pub fn with_group(self, id: &str, name: &str, members: &[&str]) -> Self {
        self.groups.lock().unwrap().push(Group {
            id: id.to_string(),
            name: name.to_string(),
            members: set(members),
        });
        self
    }

    pub fn resolves(&self) -> usize {
        *self.resolves.lock().unwrap()
    }

    /// Every write so far as (remote id, members)
    pub fn writes(&self) -> Vec<(String, MembershipSet)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn reject_writes(&self) {
        *self.reject_writes.lock().unwrap() = true;
    }

    /// Change remote membership behind the cache's back
    pub fn set_remote(&self, id: &str, members: &[&str]) {
        self.store(id, set(members));
    }

    fn store(&self, id: &str, members: MembershipSet) {
        let mut groups = self.groups.lock().unwrap();
        if let Some(g) = groups.iter_mut().find(|g| g.id == id) {
            g.members = members;
        }
    }
}

#[async_trait]
impl GroupDirectory for FakeDirectory {
    async fn resolve(&self, name: &str) -> Result<Group, DirectoryError> {
        *self.resolves.lock().unwrap() += 1;
        let wanted = name.to_lowercase();
        self.groups
            .lock()
            .unwrap()
            .iter()
            .find(|g| g.name.to_lowercase() == wanted)
            .cloned()
            .ok_or_else(|| DirectoryError::GroupNotFound(name.to_string()))
    }

    async fn set_members(
        &self,
        group: &Group,
        members: &MembershipSet,
    ) -> Result<(), DirectoryError> {
        if *self.reject_writes.lock().unwrap() {
            return Err(DirectoryError::Write("403 Forbidden".to_string()));
        }
        self.writes
            .lock()
            .unwrap()
            .push((group.id.clone(), members.clone()));
        self.store(&group.id, members.clone());
        Ok(())
    }
}

/// Clock that only moves when told to
#[derive(Clone)]
pub struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

impl ManualClock {
    pub fn start() -> Self {
        Self(Arc::new(Mutex::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        )))
    }

    pub fn advance(&self, by: Duration) {
        *self.0.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}
