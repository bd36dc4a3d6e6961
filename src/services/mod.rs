//! Services module for the database and remote API collaborators

pub mod authority;
pub mod cloudflare;
pub mod group_directory;
pub mod role_database;

pub use authority::AuthoritySource;
pub use cloudflare::CloudflareClient;
pub use group_directory::{Group, GroupDirectory};
pub use role_database::RoleDatabase;
