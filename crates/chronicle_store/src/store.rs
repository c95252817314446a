use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection,
    DatabaseTransaction,
};
use sea_orm_migration::MigratorTrait;

use crate::batch::{self, BatchPlan};
use crate::config::{ChronicleConfig, DatabaseConfig, SchemaMode, StoreSettings};
use crate::events::NoopEventProducer;
use crate::evolution::evolve;
use crate::index::writer::index_aspect;
use crate::index::{entity_query, query, QueryContext};
use crate::layout::{decode_record, AspectLayout, EntityLayout, LayoutRouter, LayoutWrite};
use crate::migration::Migrator;
use crate::relationship::query::{find_entities, find_relationships, RelationshipContext};
use crate::relationship::{group_edges, writer};
use crate::retry::{run_in_transaction, TransactionBody};
use crate::schema_manifest::{check_schema_manifest, load_schema_manifest};
use crate::write::WriteEngine;
use chronicle_core::{
    AppliedVersion, AspectKey, AspectReadApi, AspectValue, AspectWithExtraInfo, AspectWriteApi,
    AuditStamp, BackfillApi, BackfillMode, ChangeEventProducer, ChronicleError, ChronicleResult,
    EqualityTester, ExtraInfo, FindEntitiesQuery, FindRelationshipsQuery, IndexFilter,
    IndexGroupByCriterion, IndexQueryApi, IndexSortCriterion, ListResult, PageRequest, Registry,
    RelationshipApi, RelationshipEdge, RelationshipRecord, RemovalOption, Urn, VersionedRecord,
};

/// Metadata aspect store over one SeaORM connection pool.
#[derive(Clone)]
pub struct ChronicleStore {
    conn: DatabaseConnection,
    backend: DatabaseBackend,
    registry: Arc<Registry>,
    settings: StoreSettings,
    failpoints: HashSet<String>,
    events: Arc<dyn ChangeEventProducer>,
    equality: HashMap<String, Arc<dyn EqualityTester>>,
    router: LayoutRouter,
}

#[derive(Clone, Copy, Debug)]
pub struct BackendCapabilities {
    pub transactional_ddl: bool,
    pub generated_columns: bool,
    pub json_types: bool,
    pub recursive_cte: bool,
}

impl ChronicleStore {
    /// Connects, runs migrations, and creates the tables the registry and schema mode
    /// require.
    pub async fn connect(
        config: &ChronicleConfig,
        base_dir: &Path,
        registry: impl Into<Arc<Registry>>,
    ) -> ChronicleResult<Self> {
        let url = build_connection_url(config, base_dir)?;
        let mut options = ConnectOptions::new(url);
        if let Some(pool) = &config.pool {
            if let Some(max) = pool.max_connections {
                options.max_connections(max);
            }
            if let Some(min) = pool.min_connections {
                options.min_connections(min);
            }
            if let Some(timeout_ms) = pool.connect_timeout_ms {
                options.connect_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.acquire_timeout_ms {
                options.acquire_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.idle_timeout_ms {
                options.idle_timeout(Duration::from_millis(timeout_ms));
            }
        }
        options.sqlx_logging(false);
        let conn = Database::connect(options).await?;
        let backend = conn.get_database_backend();
        let registry = registry.into();
        let settings = StoreSettings::from_config(config);
        let failpoints = config
            .failpoints
            .clone()
            .unwrap_or_default()
            .into_iter()
            .collect::<HashSet<_>>();
        check_schema_manifest(&load_schema_manifest()?)?;
        Migrator::up(&conn, None).await?;
        evolve(&conn, &registry, settings.schema_mode.uses_entity_tables()).await?;
        let router = LayoutRouter::new(
            settings.schema_mode,
            settings.dual_read_compare,
            EntityLayout::new(registry.clone()),
        );
        log::info!(
            "chronicle store ready: backend={} schema_mode={}",
            config.backend_name(),
            settings.schema_mode.as_str()
        );
        Ok(Self {
            conn,
            backend,
            registry,
            settings,
            failpoints,
            events: Arc::new(NoopEventProducer),
            equality: HashMap::new(),
            router,
        })
    }

    pub fn with_event_producer(mut self, producer: Arc<dyn ChangeEventProducer>) -> Self {
        self.events = producer;
        self
    }

    /// Replaces structural equality for one aspect type when deciding whether a write
    /// changes anything.
    pub fn with_equality_tester(
        mut self,
        aspect_type: impl Into<String>,
        tester: Arc<dyn EqualityTester>,
    ) -> Self {
        self.equality.insert(aspect_type.into(), tester);
        self
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn schema_mode(&self) -> SchemaMode {
        self.settings.schema_mode
    }

    pub fn capabilities(&self) -> BackendCapabilities {
        match self.backend {
            DatabaseBackend::Sqlite => BackendCapabilities {
                transactional_ddl: false,
                generated_columns: true,
                json_types: false,
                recursive_cte: true,
            },
            DatabaseBackend::Postgres => BackendCapabilities {
                transactional_ddl: true,
                generated_columns: true,
                json_types: true,
                recursive_cte: true,
            },
            DatabaseBackend::MySql => BackendCapabilities {
                transactional_ddl: false,
                generated_columns: true,
                json_types: true,
                recursive_cte: true,
            },
        }
    }

    fn writer(&self) -> WriteEngine<'_> {
        WriteEngine {
            conn: &self.conn,
            registry: &self.registry,
            router: &self.router,
            settings: &self.settings,
            failpoints: &self.failpoints,
            equality: &self.equality,
            events: self.events.as_ref(),
        }
    }

    fn query_context(&self) -> QueryContext<'_> {
        QueryContext {
            registry: &self.registry,
            timeout: Duration::from_millis(self.settings.query_timeout_ms),
            max_criteria: self.settings.max_criteria,
        }
    }

    fn relationship_context(&self) -> RelationshipContext<'_> {
        RelationshipContext {
            registry: &self.registry,
            timeout: Duration::from_millis(self.settings.query_timeout_ms),
            mode: self.settings.schema_mode,
        }
    }

    fn require_index(&self) -> ChronicleResult<()> {
        if self.settings.index_enabled || !self.settings.schema_mode.uses_history() {
            Ok(())
        } else {
            Err(ChronicleError::invalid("secondary index is disabled"))
        }
    }
}

#[async_trait]
impl AspectWriteApi for ChronicleStore {
    async fn add(
        &self,
        urn: &Urn,
        value: AspectValue,
        audit: AuditStamp,
    ) -> ChronicleResult<AppliedVersion> {
        let writer = self.writer();
        let aspect_type = value.aspect_type.clone();
        let write = writer.prepare(urn, &aspect_type, Some(value), audit)?;
        writer.write(&write).await
    }

    async fn add_many(
        &self,
        urn: &Urn,
        values: Vec<AspectValue>,
        audit: AuditStamp,
    ) -> ChronicleResult<Vec<AppliedVersion>> {
        let writer = self.writer();
        let mut writes = Vec::with_capacity(values.len());
        for value in values {
            let aspect_type = value.aspect_type.clone();
            writes.push(writer.prepare(urn, &aspect_type, Some(value), audit.clone())?);
        }
        writer.write_many(&writes).await
    }

    async fn delete(
        &self,
        urn: &Urn,
        aspect_type: &str,
        audit: AuditStamp,
    ) -> ChronicleResult<AppliedVersion> {
        let writer = self.writer();
        let write = writer.prepare(urn, aspect_type, None, audit)?;
        writer.write(&write).await
    }
}

#[async_trait]
impl AspectReadApi for ChronicleStore {
    async fn get(&self, key: &AspectKey) -> ChronicleResult<Option<AspectValue>> {
        self.registry.check_aspect_for(&key.urn, &key.aspect_type)?;
        match self.router.get_record(&self.conn, key).await? {
            Some(record) => decode_record(&record),
            None => Ok(None),
        }
    }

    async fn get_many(
        &self,
        keys: &[AspectKey],
    ) -> ChronicleResult<HashMap<AspectKey, AspectValue>> {
        for key in keys {
            self.registry.check_aspect_for(&key.urn, &key.aspect_type)?;
        }
        let plan = BatchPlan {
            keys_count: self.settings.keys_count,
            strategy: self.settings.batch_strategy,
        };
        batch::get_many(&self.conn, &self.router, plan, keys).await
    }

    async fn get_with_extra_info(
        &self,
        key: &AspectKey,
    ) -> ChronicleResult<Option<AspectWithExtraInfo>> {
        self.registry.check_aspect_for(&key.urn, &key.aspect_type)?;
        match self.router.get_record(&self.conn, key).await? {
            Some(record) => with_extra_info(&record),
            None => Ok(None),
        }
    }

    async fn exists(&self, urn: &Urn) -> ChronicleResult<bool> {
        self.registry.check_urn(urn)?;
        self.router.exists(&self.conn, urn).await
    }

    async fn list_versions(
        &self,
        aspect_type: &str,
        urn: &Urn,
        start: u64,
        page_size: u64,
    ) -> ChronicleResult<ListResult<i64>> {
        self.registry.check_aspect_for(urn, aspect_type)?;
        check_page_size(page_size)?;
        self.router
            .require_history("list_versions")?
            .list_versions(&self.conn, aspect_type, urn, start, page_size)
            .await
    }

    async fn list_by_urn(
        &self,
        aspect_type: &str,
        urn: &Urn,
        start: u64,
        page_size: u64,
    ) -> ChronicleResult<ListResult<AspectWithExtraInfo>> {
        self.registry.check_aspect_for(urn, aspect_type)?;
        check_page_size(page_size)?;
        let records = self
            .router
            .require_history("list_by_urn")?
            .list_by_urn(&self.conn, aspect_type, urn, start, page_size)
            .await?;
        page_with_extra_info(records)
    }

    async fn list_at_version(
        &self,
        aspect_type: &str,
        version: i64,
        start: u64,
        page_size: u64,
    ) -> ChronicleResult<ListResult<AspectWithExtraInfo>> {
        self.registry.aspect(aspect_type)?;
        check_page_size(page_size)?;
        let records = self
            .router
            .require_history("list_at_version")?
            .list_at_version(&self.conn, aspect_type, version, start, page_size)
            .await?;
        page_with_extra_info(records)
    }
}

#[async_trait]
impl IndexQueryApi for ChronicleStore {
    async fn list_urns(
        &self,
        entity_type: &str,
        filter: &IndexFilter,
        sort: Option<&IndexSortCriterion>,
        page: &PageRequest,
    ) -> ChronicleResult<ListResult<Urn>> {
        self.require_index()?;
        let ctx = self.query_context();
        match self.settings.schema_mode {
            SchemaMode::EntityTable => {
                entity_query::list_urns(&self.conn, &ctx, entity_type, filter, sort, page).await
            }
            SchemaMode::HistoryTable | SchemaMode::Dual => {
                query::list_urns(&self.conn, &ctx, entity_type, filter, sort, page).await
            }
        }
    }

    async fn count_aggregate(
        &self,
        entity_type: &str,
        filter: &IndexFilter,
        group_by: &IndexGroupByCriterion,
    ) -> ChronicleResult<BTreeMap<String, u64>> {
        self.require_index()?;
        let ctx = self.query_context();
        match self.settings.schema_mode {
            SchemaMode::EntityTable => {
                entity_query::count_aggregate(&self.conn, &ctx, entity_type, filter, group_by)
                    .await
            }
            SchemaMode::HistoryTable | SchemaMode::Dual => {
                query::count_aggregate(&self.conn, &ctx, entity_type, filter, group_by).await
            }
        }
    }
}

#[async_trait]
impl RelationshipApi for ChronicleStore {
    async fn add_relationships(
        &self,
        edges: Vec<RelationshipEdge>,
        removal: RemovalOption,
        audit: AuditStamp,
    ) -> ChronicleResult<usize> {
        let groups = group_edges(&self.registry, edges)?;
        let mut inserted = 0;
        for (relationship_type, edges) in &groups {
            let body = EdgeGroup {
                relationship_type,
                edges,
                removal,
                audit: &audit,
            };
            inserted += run_in_transaction(
                &self.conn,
                self.settings.max_transaction_retries,
                "add_relationships",
                &body,
            )
            .await?;
        }
        Ok(inserted)
    }

    async fn find_relationships(
        &self,
        query: &FindRelationshipsQuery,
    ) -> ChronicleResult<Vec<RelationshipRecord>> {
        find_relationships(&self.conn, &self.relationship_context(), query).await
    }

    async fn find_entities(&self, query: &FindEntitiesQuery) -> ChronicleResult<Vec<Urn>> {
        find_entities(&self.conn, &self.relationship_context(), query).await
    }
}

#[async_trait]
impl BackfillApi for ChronicleStore {
    async fn backfill(
        &self,
        mode: BackfillMode,
        urns: &[Urn],
        aspect_types: &[String],
    ) -> ChronicleResult<BTreeMap<Urn, Vec<String>>> {
        let history = self.router.require_history("backfill")?;
        let index = matches!(mode, BackfillMode::Index | BackfillMode::All);
        let entity = matches!(mode, BackfillMode::EntityTable | BackfillMode::All);
        if entity && !self.settings.schema_mode.uses_entity_tables() {
            return Err(ChronicleError::unsupported(
                self.settings.schema_mode.as_str(),
                "backfill of entity tables",
            ));
        }
        for urn in urns {
            self.registry.check_urn(urn)?;
        }
        for aspect_type in aspect_types {
            self.registry.aspect(aspect_type)?;
        }
        let records = history
            .latest_records(&self.conn, urns, aspect_types)
            .await?;
        let mut backfilled: BTreeMap<Urn, Vec<String>> = BTreeMap::new();
        for record in &records {
            let body = BackfillRecord {
                store: self,
                record,
                index,
                entity,
            };
            run_in_transaction(
                &self.conn,
                self.settings.max_transaction_retries,
                "backfill",
                &body,
            )
            .await?;
            backfilled
                .entry(record.key.urn.clone())
                .or_default()
                .push(record.key.aspect_type.clone());
        }
        log::info!(
            "backfilled {} aspects across {} urns",
            records.len(),
            backfilled.len()
        );
        Ok(backfilled)
    }
}

struct EdgeGroup<'a> {
    relationship_type: &'a str,
    edges: &'a [RelationshipEdge],
    removal: RemovalOption,
    audit: &'a AuditStamp,
}

impl TransactionBody for EdgeGroup<'_> {
    type Output = usize;

    async fn run(&self, tx: &DatabaseTransaction) -> ChronicleResult<usize> {
        writer::write_group(
            tx,
            self.relationship_type,
            self.edges,
            self.removal,
            self.audit,
        )
        .await
    }
}

/// Re-derives the index rows and entity-table cell of one history record.
struct BackfillRecord<'a> {
    store: &'a ChronicleStore,
    record: &'a VersionedRecord,
    index: bool,
    entity: bool,
}

impl TransactionBody for BackfillRecord<'_> {
    type Output = ();

    async fn run(&self, tx: &DatabaseTransaction) -> ChronicleResult<()> {
        let urn = &self.record.key.urn;
        let aspect_type = &self.record.key.aspect_type;
        if self.index {
            index_aspect(tx, &self.store.registry, urn, aspect_type, &self.record.payload).await?;
        }
        let on_entity = self
            .store
            .registry
            .entity(urn.entity_type())?
            .aspects
            .iter()
            .any(|aspect| aspect == aspect_type);
        if self.entity && on_entity {
            let layout = self.store.router.entity();
            let audit = self.record.audit();
            let shadow = layout.read_latest(tx, urn, aspect_type).await?;
            let write = LayoutWrite {
                urn,
                aspect_type,
                payload: &self.record.payload,
                audit: &audit,
            };
            layout.apply(tx, &write, shadow.as_ref()).await?;
        }
        Ok(())
    }
}

fn check_page_size(page_size: u64) -> ChronicleResult<()> {
    if page_size == 0 {
        Err(ChronicleError::invalid("page size must be positive"))
    } else {
        Ok(())
    }
}

fn with_extra_info(record: &VersionedRecord) -> ChronicleResult<Option<AspectWithExtraInfo>> {
    Ok(decode_record(record)?.map(|value| AspectWithExtraInfo {
        value,
        info: ExtraInfo {
            urn: record.key.urn.clone(),
            version: record.key.version,
            audit: record.audit(),
        },
    }))
}

fn page_with_extra_info(
    records: ListResult<VersionedRecord>,
) -> ChronicleResult<ListResult<AspectWithExtraInfo>> {
    let mut values = Vec::with_capacity(records.values.len());
    for record in &records.values {
        if let Some(value) = with_extra_info(record)? {
            values.push(value);
        }
    }
    Ok(ListResult {
        values,
        next_start: records.next_start,
        next_cursor: records.next_cursor,
        has_more: records.has_more,
        total_count: records.total_count,
        total_page_count: records.total_page_count,
        page_size: records.page_size,
    })
}

fn build_connection_url(config: &ChronicleConfig, base_dir: &Path) -> ChronicleResult<String> {
    match &config.database {
        DatabaseConfig::Sqlite { .. } => {
            let path = config.sqlite_path(base_dir)?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|err| ChronicleError::storage(format!("create db dir: {err}")))?;
            }
            Ok(format!("sqlite://{}?mode=rwc", path.display()))
        }
        DatabaseConfig::Postgres { url } | DatabaseConfig::Mysql { url } => Ok(url.clone()),
    }
}
