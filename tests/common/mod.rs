use access_group_sync::error::AuthorityError;
use access_group_sync::services::{AuthoritySource, CloudflareClient};
use access_group_sync::sync::MembershipSet;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use wiremock::MockServer;

pub const ACCOUNT: &str = "test-account";
pub const TOKEN: &str = "test-token";

pub fn set(emails: &[&str]) -> MembershipSet {
    emails.iter().map(|e| e.to_string()).collect()
}

/// In-memory role assignments standing in for the control panel database.
///
/// NOTE: Mirrors `src/utils/test_utils.rs::FakeAuthority`, which integration
/// tests can't reach because it is `#[cfg(test)]`.
#[derive(Clone, Default)]
pub struct StaticRoles {
    roles: Arc<Mutex<HashMap<String, MembershipSet>>>,
}

impl StaticRoles {
    pub fn grant(&self, role: &str, emails: &[&str]) {
        self.roles
            .lock()
            .unwrap()
            .insert(role.to_string(), set(emails));
    }
}

#[async_trait]
impl AuthoritySource for StaticRoles {
    async fn authorized_emails(&self, roles: &[String]) -> Result<MembershipSet, AuthorityError> {
        let assignments = self.roles.lock().unwrap();
        Ok(roles
            .iter()
            .filter_map(|r| assignments.get(r))
            .flatten()
            .cloned()
            .collect())
    }
}

pub fn cloudflare_client(server: &MockServer) -> CloudflareClient {
    CloudflareClient::with_base_url(
        reqwest::Client::new(),
        TOKEN.to_string(),
        ACCOUNT.to_string(),
        server.uri(),
    )
}

pub fn groups_path() -> String {
    format!("/accounts/{}/access/groups", ACCOUNT)
}

pub fn listing(groups: &[(&str, &str, Vec<&str>)]) -> serde_json::Value {
    let result: Vec<serde_json::Value> = groups
        .iter()
        .map(|(id, name, members)| {
            serde_json::json!({
                "id": id,
                "name": name,
                "include": members
                    .iter()
                    .map(|m| serde_json::json!({ "email": { "email": m } }))
                    .collect::<Vec<_>>(),
                "exclude": [],
                "require": []
            })
        })
        .collect();

    serde_json::json!({
        "success": true,
        "errors": [],
        "messages": [],
        "result": result
    })
}
