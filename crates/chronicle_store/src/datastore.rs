use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::DEFAULT_DB_NAME;
use crate::{ChronicleConfig, ChronicleResult, ChronicleStore, Registry};

pub fn load_or_init_config(base: &Path) -> ChronicleResult<ChronicleConfig> {
    let default_sqlite = base.join(DEFAULT_DB_NAME);
    ChronicleConfig::load_or_init(base, &default_sqlite)
}

pub async fn open_store(
    base: &Path,
    registry: impl Into<Arc<Registry>>,
) -> ChronicleResult<ChronicleStore> {
    let config = load_or_init_config(base)?;
    ChronicleStore::connect(&config, base, registry).await
}

pub fn default_sqlite_path(base: &Path) -> PathBuf {
    base.join(DEFAULT_DB_NAME)
}
