//! Cloudflare Zero Trust API client for access groups
//!
//! Lists the account's access groups to resolve one by name and overwrites a
//! group's include rule with a list of email conditions.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::group_directory::{Group, GroupDirectory};
use crate::config::CloudflareConfig;
use crate::error::DirectoryError;
use crate::sync::MembershipSet;

/// Default Cloudflare API base URL
pub const DEFAULT_CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Response from GET /accounts/{account}/access/groups
#[derive(Debug, Deserialize)]
struct ListGroupsResponse {
    result: Vec<AccessGroup>,
}

#[derive(Debug, Deserialize)]
struct AccessGroup {
    id: String,
    name: String,
    #[serde(default)]
    include: Vec<IncludeRule>,
}

/// One include condition. Only `{"email": {"email": ...}}` rules are managed;
/// other rule kinds deserialize with `email: None`.
#[derive(Debug, Deserialize)]
struct IncludeRule {
    email: Option<EmailRule>,
}

#[derive(Debug, Deserialize)]
struct EmailRule {
    email: String,
}

/// Cloudflare access group client
pub struct CloudflareClient {
    http_client: Client,
    token: String,
    account_id: String,
    base_url: String,
}

impl CloudflareClient {
    /// Creates a new client against the public Cloudflare API
    pub fn new(http_client: Client, token: String, account_id: String) -> Self {
        Self::with_base_url(
            http_client,
            token,
            account_id,
            DEFAULT_CLOUDFLARE_API_BASE.to_string(),
        )
    }

    /// Creates a new client with a custom API base URL
    ///
    /// This is useful for testing with a mock server.
    pub fn with_base_url(
        http_client: Client,
        token: String,
        account_id: String,
        base_url: String,
    ) -> Self {
        Self {
            http_client,
            token,
            account_id,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Builds a client from the `[cloudflare]` settings, applying the request timeout
    pub fn from_config(config: &CloudflareConfig) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self::with_base_url(
            http_client,
            config.token.clone(),
            config.account_id.clone(),
            config.api_base.clone(),
        ))
    }

    fn groups_url(&self) -> String {
        format!("{}/accounts/{}/access/groups", self.base_url, self.account_id)
    }
}

#[async_trait]
impl GroupDirectory for CloudflareClient {
    async fn resolve(&self, name: &str) -> Result<Group, DirectoryError> {
        log::debug!("Listing Cloudflare access groups to resolve '{}'", name);

        let response = self
            .http_client
            .get(self.groups_url())
            .bearer_auth(&self.token)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            log::warn!("Cloudflare API error listing groups: {} - {}", status, error_text);
            return Err(DirectoryError::Unavailable(format!(
                "Cloudflare API error: {} - {}",
                status, error_text
            )));
        }

        let data: ListGroupsResponse = response
            .json()
            .await
            .map_err(|e| DirectoryError::Unavailable(format!("Invalid group listing: {}", e)))?;

        let wanted = name.to_lowercase();
        let group = data
            .result
            .into_iter()
            .find(|g| g.name.to_lowercase() == wanted)
            .ok_or_else(|| DirectoryError::GroupNotFound(name.to_string()))?;

        let other_rules = group.include.iter().filter(|rule| rule.email.is_none()).count();
        let members: MembershipSet = group
            .include
            .into_iter()
            .filter_map(|rule| rule.email.map(|e| e.email))
            .collect();

        if other_rules > 0 {
            log::warn!(
                "Access group '{}' has {} include rule(s) that are not single emails; \
                 the next correction will drop them",
                group.name,
                other_rules
            );
        }

        Ok(Group {
            id: group.id,
            name: group.name,
            members,
        })
    }

    async fn set_members(
        &self,
        group: &Group,
        members: &MembershipSet,
    ) -> Result<(), DirectoryError> {
        let url = format!("{}/{}", self.groups_url(), group.id);
        let include: Vec<serde_json::Value> = members
            .iter()
            .map(|email| serde_json::json!({ "email": { "email": email } }))
            .collect();

        let response = self
            .http_client
            .put(url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({
                "name": group.name,
                "include": include,
                "exclude": [],
                "require": [],
            }))
            .send()
            .await
            .map_err(|e| DirectoryError::Write(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            log::warn!(
                "Cloudflare API error updating group '{}': {} - {}",
                group.name,
                status,
                error_text
            );
            return Err(DirectoryError::Write(format!(
                "Cloudflare API error: {} - {}",
                status, error_text
            )));
        }

        Ok(())
    }
}
