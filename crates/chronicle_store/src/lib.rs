mod batch;
pub mod config;
pub mod datastore;
mod db;
pub mod events;
mod evolution;
mod index;
mod layout;
pub mod migration;
mod relationship;
mod retention;
mod retry;
pub mod schema_manifest;
mod sql;
pub mod store;
mod write;

pub use chronicle_core::*;
pub use config::{
    BatchConfig, BatchStrategy, ChronicleConfig, DatabaseConfig, IndexConfig, PoolConfig,
    RetentionConfig, RetentionPolicy, SchemaMode, WriteConfig,
};
pub use datastore::{default_sqlite_path, load_or_init_config, open_store};
pub use events::{ChannelEventProducer, NoopEventProducer};
pub use schema_manifest::{check_schema_manifest, load_schema_manifest};
pub use store::{BackendCapabilities, ChronicleStore};
