use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use chronicle_core::{ChronicleError, ChronicleResult, DEFAULT_MAX_CRITERIA};

const DEFAULT_CONFIG_NAME: &str = "chronicle.json";
pub(crate) const DEFAULT_DB_NAME: &str = "chronicle.sqlite";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DatabaseConfig {
    Sqlite { path: Option<String> },
    Postgres { url: String },
    Mysql { url: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WriteConfig {
    pub max_transaction_retries: Option<u32>,
    pub atomic_multiple_update: Option<bool>,
    pub max_payload_bytes: Option<usize>,
}

impl WriteConfig {
    pub fn with_defaults() -> Self {
        Self {
            max_transaction_retries: Some(5),
            atomic_multiple_update: Some(false),
            max_payload_bytes: Some(1_048_576),
        }
    }
}

/// Physical layout the store reads from and writes to.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SchemaMode {
    /// Append-only history table.
    #[default]
    HistoryTable,
    /// One row per entity, latest values only.
    EntityTable,
    /// Writes go to both layouts; reads are served from the history table.
    Dual,
}

impl SchemaMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SchemaMode::HistoryTable => "history_table",
            SchemaMode::EntityTable => "entity_table",
            SchemaMode::Dual => "dual",
        }
    }

    pub fn uses_history(self) -> bool {
        !matches!(self, SchemaMode::EntityTable)
    }

    pub fn uses_entity_tables(self) -> bool {
        !matches!(self, SchemaMode::HistoryTable)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    pub enabled: Option<bool>,
    pub query_timeout_ms: Option<u64>,
    pub max_criteria: Option<usize>,
}

impl IndexConfig {
    pub fn with_defaults() -> Self {
        Self {
            enabled: Some(true),
            query_timeout_ms: Some(30_000),
            max_criteria: Some(DEFAULT_MAX_CRITERIA),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BatchStrategy {
    /// One statement per key, UNIONed.
    #[default]
    Union,
    /// One statement with the keys OR-chained.
    Or,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Keys per statement; 0 means unbounded.
    pub keys_count: Option<usize>,
    pub strategy: Option<BatchStrategy>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetentionPolicy {
    Indefinite,
    Versions { max_versions_to_retain: u32 },
    Time { max_age_ms: u64 },
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub default: Option<RetentionPolicy>,
    #[serde(default)]
    pub aspects: BTreeMap<String, RetentionPolicy>,
}

impl RetentionConfig {
    pub fn policy_for(&self, aspect_type: &str) -> RetentionPolicy {
        self.aspects
            .get(aspect_type)
            .or(self.default.as_ref())
            .cloned()
            .unwrap_or(RetentionPolicy::Indefinite)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChronicleConfig {
    pub database: DatabaseConfig,
    pub pool: Option<PoolConfig>,
    pub write: Option<WriteConfig>,
    pub schema_mode: Option<SchemaMode>,
    pub dual_read_compare: Option<bool>,
    pub index: Option<IndexConfig>,
    pub batch: Option<BatchConfig>,
    pub retention: Option<RetentionConfig>,
    pub failpoints: Option<Vec<String>>,
}

impl ChronicleConfig {
    pub fn default_sqlite(path: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig::Sqlite {
                path: Some(path.into()),
            },
            pool: None,
            write: Some(WriteConfig::with_defaults()),
            schema_mode: Some(SchemaMode::HistoryTable),
            dual_read_compare: None,
            index: Some(IndexConfig::with_defaults()),
            batch: None,
            retention: None,
            failpoints: None,
        }
    }

    pub fn load_or_init(base_dir: &Path, default_sqlite_path: &Path) -> ChronicleResult<Self> {
        fs::create_dir_all(base_dir)
            .map_err(|err| ChronicleError::storage(format!("create config dir: {err}")))?;
        let config_path = base_dir.join(DEFAULT_CONFIG_NAME);
        if config_path.exists() {
            let raw = fs::read_to_string(&config_path)
                .map_err(|err| ChronicleError::storage(format!("read config: {err}")))?;
            let config: ChronicleConfig = serde_json::from_str(&raw)
                .map_err(|err| ChronicleError::invalid(err.to_string()))?;
            return Ok(config);
        }
        let default = ChronicleConfig::default_sqlite(default_sqlite_path.to_string_lossy());
        let payload = serde_json::to_string_pretty(&default)
            .map_err(|err| ChronicleError::storage(format!("serialize config: {err}")))?;
        fs::write(&config_path, payload)
            .map_err(|err| ChronicleError::storage(format!("write config: {err}")))?;
        Ok(default)
    }

    pub fn sqlite_path(&self, base_dir: &Path) -> ChronicleResult<PathBuf> {
        match &self.database {
            DatabaseConfig::Sqlite { path } => {
                let path = path.clone().unwrap_or_else(|| DEFAULT_DB_NAME.to_string());
                let candidate = PathBuf::from(path);
                if candidate.is_absolute() {
                    Ok(candidate)
                } else {
                    Ok(base_dir.join(candidate))
                }
            }
            _ => Err(ChronicleError::invalid("config is not sqlite backend")),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.database {
            DatabaseConfig::Sqlite { .. } => "sqlite",
            DatabaseConfig::Postgres { .. } => "postgres",
            DatabaseConfig::Mysql { .. } => "mysql",
        }
    }

    pub fn connection_url(&self) -> Option<&str> {
        match &self.database {
            DatabaseConfig::Sqlite { .. } => None,
            DatabaseConfig::Postgres { url } | DatabaseConfig::Mysql { url } => Some(url.as_str()),
        }
    }

    pub fn schema_mode(&self) -> SchemaMode {
        self.schema_mode.unwrap_or_default()
    }
}

/// Effective settings with every default applied.
#[derive(Clone, Debug)]
pub(crate) struct StoreSettings {
    pub max_transaction_retries: u32,
    pub atomic_multiple_update: bool,
    pub max_payload_bytes: usize,
    pub schema_mode: SchemaMode,
    pub dual_read_compare: bool,
    pub index_enabled: bool,
    pub query_timeout_ms: u64,
    pub max_criteria: usize,
    pub keys_count: usize,
    pub batch_strategy: BatchStrategy,
    pub retention: RetentionConfig,
}

impl StoreSettings {
    pub fn from_config(config: &ChronicleConfig) -> Self {
        let write = config.write.clone().unwrap_or_else(WriteConfig::with_defaults);
        let index = config.index.clone().unwrap_or_else(IndexConfig::with_defaults);
        let batch = config.batch.clone();
        Self {
            max_transaction_retries: write.max_transaction_retries.unwrap_or(5).max(1),
            atomic_multiple_update: write.atomic_multiple_update.unwrap_or(false),
            max_payload_bytes: write.max_payload_bytes.unwrap_or(1_048_576),
            schema_mode: config.schema_mode(),
            dual_read_compare: config.dual_read_compare.unwrap_or(false),
            index_enabled: index.enabled.unwrap_or(true),
            query_timeout_ms: index.query_timeout_ms.unwrap_or(30_000),
            max_criteria: index
                .max_criteria
                .unwrap_or(DEFAULT_MAX_CRITERIA)
                .min(DEFAULT_MAX_CRITERIA),
            keys_count: batch.as_ref().and_then(|cfg| cfg.keys_count).unwrap_or(0),
            batch_strategy: batch.and_then(|cfg| cfg.strategy).unwrap_or_default(),
            retention: config.retention.clone().unwrap_or_default(),
        }
    }
}
