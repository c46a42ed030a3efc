//! Concrete connectors
//!
//! - `airtable` - destination writer for Airtable bases
//! - `mariadb` - MariaDB / MySQL source (driver behind the `mysql` feature)
//! - `embedding` - provider-backed embeddings for `vector` mappings

pub mod airtable;
pub mod embedding;
pub mod mariadb;

pub use airtable::{AirtableConfig, AirtableDestination};
pub use embedding::ProviderEmbeddingGenerator;
pub use mariadb::MariaDbConfig;
#[cfg(feature = "mysql")]
pub use mariadb::MariaDbSource;
