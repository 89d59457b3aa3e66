pub mod database;
pub mod error;
pub mod samples;
pub mod schema;
pub mod sessions;

pub use database::Database;
pub use error::StoreError;
