//! MySQL-backed authority source
//!
//! Reads role assignments from the control panel database. The pool is created
//! lazily and holds a single connection that is pinged before every reuse, so
//! a connection dropped by the server is replaced on the next query.

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlDatabaseError, MySqlPool, MySqlPoolOptions};
use sqlx::{MySql, QueryBuilder};
use std::time::Duration;

use super::authority::AuthoritySource;
use crate::config::DatabaseConfig;
use crate::error::AuthorityError;
use crate::sync::MembershipSet;

/// MySQL server error numbers that mean the query can never run as configured
const ER_DBACCESS_DENIED_ERROR: u16 = 1044;
const ER_ACCESS_DENIED_ERROR: u16 = 1045;
const ER_BAD_DB_ERROR: u16 = 1049;
const ER_PARSE_ERROR: u16 = 1064;

const AUTHORIZED_EMAILS_QUERY: &str = "SELECT DISTINCT u.email \
     FROM bfacp_users u \
     INNER JOIN bfacp_assigned_roles ar ON u.id = ar.user_id \
     INNER JOIN bfacp_roles r ON ar.role_id = r.id \
     WHERE r.name IN (";

/// Authority source reading users, role assignments and roles from MySQL
#[derive(Clone)]
pub struct RoleDatabase {
    pool: MySqlPool,
}

impl RoleDatabase {
    /// Wraps an existing pool
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Creates a lazily connecting pool from the database settings
    ///
    /// No connection is attempted until the first query, so an unreachable
    /// database surfaces as `AuthorityError::Unavailable` from the reconciler
    /// rather than at startup. Must be called from inside the tokio runtime.
    pub fn connect_lazy(config: &DatabaseConfig) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name);

        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .test_before_acquire(true)
            .connect_lazy_with(options);

        log::info!(
            "Configured role database {}@{}:{}/{}",
            config.user,
            config.host,
            config.port,
            config.name
        );

        Self { pool }
    }
}

#[async_trait]
impl AuthoritySource for RoleDatabase {
    async fn authorized_emails(&self, roles: &[String]) -> Result<MembershipSet, AuthorityError> {
        if roles.is_empty() {
            return Ok(MembershipSet::new());
        }

        let mut builder: QueryBuilder<MySql> = QueryBuilder::new(AUTHORIZED_EMAILS_QUERY);
        let mut separated = builder.separated(", ");
        for role in roles {
            separated.push_bind(role.clone());
        }
        separated.push_unseparated(") ORDER BY u.email");

        let rows: Vec<Option<String>> = builder
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await
            .map_err(classify_error)?;

        let emails: MembershipSet = rows.into_iter().flatten().collect();

        log::debug!(
            "Roles [{}] authorize {} email(s)",
            roles.join(", "),
            emails.len()
        );

        Ok(emails)
    }
}

/// Split sqlx failures into "cannot run at all" and "failed while running"
fn classify_error(err: sqlx::Error) -> AuthorityError {
    let unavailable = match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Configuration(_) => true,
        sqlx::Error::Database(db_err) => db_err
            .try_downcast_ref::<MySqlDatabaseError>()
            .is_some_and(|e| {
                matches!(
                    e.number(),
                    ER_DBACCESS_DENIED_ERROR
                        | ER_ACCESS_DENIED_ERROR
                        | ER_BAD_DB_ERROR
                        | ER_PARSE_ERROR
                )
            }),
        _ => false,
    };

    if unavailable {
        AuthorityError::Unavailable(err.to_string())
    } else {
        AuthorityError::Query(err.to_string())
    }
}
