//! Multi-key reads. Keys are split into chunks of `keys_count` and each chunk is fetched
//! with one statement: per-key selects UNIONed together, or a single OR-chained predicate.

use std::collections::{BTreeMap, HashMap};

use sea_orm::sea_query::{Condition, Expr, Query, SelectStatement, UnionType};
use sea_orm::{ConnectionTrait, DatabaseBackend};

use crate::config::{BatchStrategy, SchemaMode};
use crate::db::MetadataAspect;
use crate::layout::{decode_record, LayoutRouter};
use crate::layout::history::{record_from_row, RECORD_COLUMNS};
use crate::sql::query_all;
use chronicle_core::{
    AspectKey, AspectValue, ChronicleError, ChronicleResult, Urn, VersionedRecord,
    LATEST_VERSION,
};

/// SQLite caps compound selects at 500 terms.
const SQLITE_MAX_UNION_TERMS: usize = 500;

#[derive(Clone, Copy, Debug)]
pub(crate) struct BatchPlan {
    pub keys_count: usize,
    pub strategy: BatchStrategy,
}

impl BatchPlan {
    fn chunk_size(&self, backend: DatabaseBackend) -> usize {
        let union_cap = match (self.strategy, backend) {
            (BatchStrategy::Union, DatabaseBackend::Sqlite) => SQLITE_MAX_UNION_TERMS,
            _ => usize::MAX,
        };
        match self.keys_count {
            0 => union_cap,
            count => count.min(union_cap),
        }
    }
}

pub(crate) async fn get_many<C: ConnectionTrait>(
    conn: &C,
    router: &LayoutRouter,
    plan: BatchPlan,
    keys: &[AspectKey],
) -> ChronicleResult<HashMap<AspectKey, AspectValue>> {
    let mut unique: Vec<&AspectKey> = keys.iter().collect();
    unique.sort();
    unique.dedup();
    if unique.is_empty() {
        return Ok(HashMap::new());
    }
    let records = match router.mode() {
        SchemaMode::HistoryTable | SchemaMode::Dual => {
            let backend = conn.get_database_backend();
            let mut records = Vec::new();
            for chunk in unique.chunks(plan.chunk_size(backend)) {
                let select = match plan.strategy {
                    BatchStrategy::Union => union_select(chunk),
                    BatchStrategy::Or => or_select(chunk),
                };
                for row in query_all(conn, &select).await? {
                    records.push(record_from_row(&row)?);
                }
            }
            records
        }
        SchemaMode::EntityTable => entity_records(conn, router, &unique).await?,
    };
    associate(&unique, records)
}

fn key_select(key: &AspectKey) -> SelectStatement {
    Query::select()
        .from(MetadataAspect::Table)
        .columns(RECORD_COLUMNS)
        .and_where(Expr::col(MetadataAspect::Urn).eq(key.urn.to_string()))
        .and_where(Expr::col(MetadataAspect::Aspect).eq(key.aspect_type.as_str()))
        .and_where(Expr::col(MetadataAspect::Version).eq(key.version))
        .to_owned()
}

fn union_select(chunk: &[&AspectKey]) -> SelectStatement {
    let mut keys = chunk.iter();
    let mut select = match keys.next() {
        Some(first) => key_select(first),
        None => Query::select()
            .from(MetadataAspect::Table)
            .columns(RECORD_COLUMNS)
            .and_where(Expr::val(1).eq(0))
            .to_owned(),
    };
    select.unions(keys.map(|key| (UnionType::All, key_select(key))));
    select
}

fn or_select(chunk: &[&AspectKey]) -> SelectStatement {
    let mut any_key = Condition::any();
    for key in chunk {
        any_key = any_key.add(
            Condition::all()
                .add(Expr::col(MetadataAspect::Urn).eq(key.urn.to_string()))
                .add(Expr::col(MetadataAspect::Aspect).eq(key.aspect_type.as_str()))
                .add(Expr::col(MetadataAspect::Version).eq(key.version)),
        );
    }
    Query::select()
        .from(MetadataAspect::Table)
        .columns(RECORD_COLUMNS)
        .cond_where(any_key)
        .to_owned()
}

/// Entity tables only hold the latest value, so only version-0 keys can be served.
async fn entity_records<C: ConnectionTrait>(
    conn: &C,
    router: &LayoutRouter,
    keys: &[&AspectKey],
) -> ChronicleResult<Vec<VersionedRecord>> {
    if keys.iter().any(|key| key.version != LATEST_VERSION) {
        return Err(ChronicleError::unsupported(
            SchemaMode::EntityTable.as_str(),
            "batch get of historical versions",
        ));
    }
    let mut by_type: BTreeMap<&str, (Vec<Urn>, Vec<String>)> = BTreeMap::new();
    for key in keys {
        let (urns, aspects) = by_type.entry(key.urn.entity_type()).or_default();
        if !urns.contains(&key.urn) {
            urns.push(key.urn.clone());
        }
        if !aspects.contains(&key.aspect_type) {
            aspects.push(key.aspect_type.clone());
        }
    }
    let mut records = Vec::new();
    for (entity_type, (urns, aspects)) in by_type {
        records.extend(
            router
                .entity()
                .latest_for_urns(conn, entity_type, &urns, &aspects)
                .await?,
        );
    }
    Ok(records)
}

/// Matches rows back to the requested keys: case-insensitive urn, exact aspect and version.
/// Tombstones and keys without a row are left out.
fn associate(
    keys: &[&AspectKey],
    records: Vec<VersionedRecord>,
) -> ChronicleResult<HashMap<AspectKey, AspectValue>> {
    let mut by_key: HashMap<(String, String, i64), VersionedRecord> = HashMap::new();
    for record in records {
        by_key.insert(
            (
                record.key.urn.to_string().to_lowercase(),
                record.key.aspect_type.clone(),
                record.key.version,
            ),
            record,
        );
    }
    let mut values = HashMap::new();
    for key in keys {
        let lookup = (
            key.urn.to_string().to_lowercase(),
            key.aspect_type.clone(),
            key.version,
        );
        if let Some(record) = by_key.get(&lookup) {
            if let Some(value) = decode_record(record)? {
                values.insert((*key).clone(), value);
            }
        }
    }
    Ok(values)
}
