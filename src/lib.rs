pub mod cli;
pub mod config;
pub mod database_ops;
pub mod error;
pub mod logging;

pub mod util {
    pub mod env;
}

pub use config::CatalogConfig;
pub use database_ops::catalog::{CatalogProvider, CatalogQueries, CatalogSync};
pub use database_ops::db::Db;
pub use error::{FetchError, StoreError, SyncError};
