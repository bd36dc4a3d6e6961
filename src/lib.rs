pub mod config;
pub mod error;
pub mod services;
pub mod sync;
pub mod utils;

pub use error::SyncError;
