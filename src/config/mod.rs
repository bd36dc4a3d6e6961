//! Configuration for the access group sync service
//!
//! Loaded via the `config` crate from the file named on the command line,
//! with `ACCESS_SYNC__<SECTION>__<KEY>` environment variables layered on top.
//! Section and key names are case-insensitive; the loader lower-cases them,
//! which also lower-cases the configured group names.

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::path::Path;

use crate::services::cloudflare::DEFAULT_CLOUDFLARE_API_BASE;
use crate::sync::{DEFAULT_CHECK_INTERVAL_SECS, DEFAULT_STALENESS_THRESHOLD_SECS};

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "ACCESS_SYNC";

/// Connection settings for the role database
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_database_port")]
    pub port: u16,
    pub user: String,
    #[serde(alias = "pw", default)]
    pub password: String,
    #[serde(alias = "db")]
    pub name: String,
    /// How long to wait for a connection before the database counts as unavailable
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

/// Credentials for the Cloudflare API
#[derive(Clone, Deserialize)]
pub struct CloudflareConfig {
    pub token: String,
    pub account_id: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

// Keep the API token out of debug output
impl fmt::Debug for CloudflareConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudflareConfig")
            .field("token", &"<redacted>")
            .field("account_id", &self.account_id)
            .field("api_base", &self.api_base)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Loop timing and failure handling
#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    /// Pause between the end of one tick and the start of the next, in seconds
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Maximum age of a cached remote snapshot, in seconds
    #[serde(default = "default_staleness_threshold_secs")]
    pub staleness_threshold_secs: u64,
    /// Stop the process on the first failure instead of skipping ahead
    #[serde(default = "default_halt_on_error")]
    pub halt_on_error: bool,
}

fn default_database_port() -> u16 {
    3306
}

fn default_acquire_timeout_secs() -> u64 {
    10
}

fn default_api_base() -> String {
    DEFAULT_CLOUDFLARE_API_BASE.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_check_interval_secs() -> u64 {
    DEFAULT_CHECK_INTERVAL_SECS
}

fn default_staleness_threshold_secs() -> u64 {
    DEFAULT_STALENESS_THRESHOLD_SECS as u64
}

fn default_halt_on_error() -> bool {
    true
}

impl SyncSettings {
    /// The staleness threshold as a signed duration
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidSetting` when the value does not fit a
    /// `chrono::Duration`.
    pub fn staleness_threshold(&self) -> Result<chrono::Duration, ConfigError> {
        i64::try_from(self.staleness_threshold_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| ConfigError::InvalidSetting {
                key: "sync.staleness_threshold_secs".to_string(),
                reason: format!("{} seconds is out of range", self.staleness_threshold_secs),
            })
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            staleness_threshold_secs: default_staleness_threshold_secs(),
            halt_on_error: default_halt_on_error(),
        }
    }
}

/// A remote access group and the roles whose members may join it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMapping {
    pub name: String,
    pub roles: Vec<String>,
}

/// Fully validated configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database: DatabaseConfig,
    pub cloudflare: CloudflareConfig,
    pub sync: SyncSettings,
    /// Groups in the order they appear in the configuration
    pub groups: Vec<GroupMapping>,
}

/// Roles as written in the file: `admin, mod` or `["admin", "mod"]`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RoleList {
    Csv(String),
    List(Vec<String>),
}

impl RoleList {
    fn into_roles(self) -> Vec<String> {
        match self {
            RoleList::Csv(s) => s.split(',').map(|r| r.trim().to_string()).collect(),
            RoleList::List(v) => v.into_iter().map(|r| r.trim().to_string()).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(alias = "adkatsdb")]
    database: DatabaseConfig,
    cloudflare: CloudflareConfig,
    #[serde(default)]
    sync: SyncSettings,
    #[serde(alias = "groupmapping", default, deserialize_with = "ordered_entries")]
    group_mapping: Vec<(String, RoleList)>,
}

/// Deserialize a map into its entries, keeping the source order
fn ordered_entries<'de, D>(deserializer: D) -> Result<Vec<(String, RoleList)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct EntriesVisitor;

    impl<'de> Visitor<'de> for EntriesVisitor {
        type Value = Vec<(String, RoleList)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of access group names to role lists")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = Vec::new();
            while let Some((name, roles)) = map.next_entry::<String, RoleList>()? {
                entries.push((name, roles));
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(EntriesVisitor)
}

#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read or did not match the expected shape
    Load(config::ConfigError),
    /// A group mapping entry had no roles or an empty role name
    InvalidGroupMapping { group: String, reason: String },
    /// No groups were configured
    NoGroups,
    /// A setting parsed but holds an unusable value
    InvalidSetting { key: String, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Load(e) => write!(f, "Failed to load configuration: {}", e),
            ConfigError::InvalidGroupMapping { group, reason } => {
                write!(f, "Invalid group mapping for '{}': {}", group, reason)
            }
            ConfigError::NoGroups => write!(f, "No access groups configured in [group_mapping]"),
            ConfigError::InvalidSetting { key, reason } => {
                write!(f, "Invalid value for '{}': {}", key, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Load(e) => Some(e),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Load(e)
    }
}

impl SyncConfig {
    /// Loads the configuration file at `path`, then applies environment overrides
    ///
    /// The format follows the file extension (`.ini`, `.toml`, `.yaml`, `.json`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, a required key is absent, or
    /// the group mapping is empty or malformed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(environment())
            .build()?
            .try_deserialize()?;

        Self::from_raw(raw)
    }

    /// Parses configuration from an in-memory string, then applies environment overrides
    pub fn parse(contents: &str, format: config::FileFormat) -> Result<Self, ConfigError> {
        let raw: RawConfig = config::Config::builder()
            .add_source(config::File::from_str(contents, format))
            .add_source(environment())
            .build()?
            .try_deserialize()?;

        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        raw.sync.staleness_threshold()?;

        let mut groups = Vec::with_capacity(raw.group_mapping.len());

        for (name, roles) in raw.group_mapping {
            let roles = roles.into_roles();
            if roles.is_empty() {
                return Err(ConfigError::InvalidGroupMapping {
                    group: name,
                    reason: "no roles listed".to_string(),
                });
            }
            if roles.iter().any(|r| r.is_empty()) {
                return Err(ConfigError::InvalidGroupMapping {
                    group: name,
                    reason: "empty role name".to_string(),
                });
            }
            groups.push(GroupMapping { name, roles });
        }

        if groups.is_empty() {
            return Err(ConfigError::NoGroups);
        }

        Ok(Self {
            database: raw.database,
            cloudflare: raw.cloudflare,
            sync: raw.sync,
            groups,
        })
    }
}

// Values stay strings until deserialized, so ids with leading zeros survive
fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
}
