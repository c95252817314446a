use sea_orm::sea_query::{Alias, Expr, Func, Order, Query, SelectStatement};
use sea_orm::{ConnectionTrait, QueryResult};

use super::{AspectLayout, LatestSlot, LayoutWrite};
use crate::db::MetadataAspect;
use crate::sql::{col_name, exec, query_all, query_one};
use chronicle_core::{
    AppliedVersion, AspectKey, ChronicleError, ChronicleResult, ListResult, StoredPayload, Urn,
    VersionedRecord, LATEST_VERSION, TOMBSTONE_SENTINEL,
};

pub(crate) const RECORD_COLUMNS: [MetadataAspect; 7] = [
    MetadataAspect::Urn,
    MetadataAspect::Aspect,
    MetadataAspect::Version,
    MetadataAspect::Metadata,
    MetadataAspect::Createdon,
    MetadataAspect::Createdby,
    MetadataAspect::Createdfor,
];

/// Append-only `metadata_aspect` table: version 0 holds the current value and every
/// replacement moves the previous one to the next free positive version.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct HistoryLayout;

impl AspectLayout for HistoryLayout {
    async fn read_latest<C: ConnectionTrait>(
        &self,
        conn: &C,
        urn: &Urn,
        aspect_type: &str,
    ) -> ChronicleResult<Option<LatestSlot>> {
        let key = AspectKey::latest(urn.clone(), aspect_type);
        Ok(self.get_version(conn, &key).await?.map(|record| LatestSlot {
            lock_token: record.created_on,
            record,
        }))
    }

    async fn apply<C: ConnectionTrait>(
        &self,
        conn: &C,
        write: &LayoutWrite<'_>,
        current: Option<&LatestSlot>,
    ) -> ChronicleResult<AppliedVersion> {
        let incoming = record_for(write);
        let Some(slot) = current else {
            insert_record(conn, &incoming).await?;
            return Ok(AppliedVersion::Inserted);
        };
        let displaced_to = self.next_version(conn, write.urn, write.aspect_type).await?;
        let mut displaced = slot.record.clone();
        displaced.key.version = displaced_to;
        insert_record(conn, &displaced).await?;

        let update = Query::update()
            .table(MetadataAspect::Table)
            .values([
                (
                    MetadataAspect::Metadata,
                    incoming.payload.as_column().into(),
                ),
                (MetadataAspect::Createdon, incoming.created_on.into()),
                (MetadataAspect::Createdby, incoming.created_by.clone().into()),
                (MetadataAspect::Createdfor, incoming.created_for.clone().into()),
            ])
            .and_where(Expr::col(MetadataAspect::Urn).eq(write.urn.to_string()))
            .and_where(Expr::col(MetadataAspect::Aspect).eq(write.aspect_type))
            .and_where(Expr::col(MetadataAspect::Version).eq(LATEST_VERSION))
            .and_where(Expr::col(MetadataAspect::Createdon).eq(slot.lock_token))
            .to_owned();
        if exec(conn, &update).await? == 0 {
            return Err(ChronicleError::optimistic_lock(format!(
                "{} {} changed since createdon {}",
                write.urn, write.aspect_type, slot.lock_token
            )));
        }
        Ok(AppliedVersion::Replaced { displaced_to })
    }

    async fn exists<C: ConnectionTrait>(&self, conn: &C, urn: &Urn) -> ChronicleResult<bool> {
        let select = Query::select()
            .from(MetadataAspect::Table)
            .column(MetadataAspect::Aspect)
            .and_where(Expr::col(MetadataAspect::Urn).eq(urn.to_string()))
            .and_where(Expr::col(MetadataAspect::Version).eq(LATEST_VERSION))
            .and_where(Expr::col(MetadataAspect::Metadata).ne(TOMBSTONE_SENTINEL))
            .limit(1)
            .to_owned();
        Ok(query_one(conn, &select).await?.is_some())
    }
}

impl HistoryLayout {
    pub async fn get_version<C: ConnectionTrait>(
        &self,
        conn: &C,
        key: &AspectKey,
    ) -> ChronicleResult<Option<VersionedRecord>> {
        let select = Query::select()
            .from(MetadataAspect::Table)
            .columns(RECORD_COLUMNS)
            .and_where(Expr::col(MetadataAspect::Urn).eq(key.urn.to_string()))
            .and_where(Expr::col(MetadataAspect::Aspect).eq(key.aspect_type.as_str()))
            .and_where(Expr::col(MetadataAspect::Version).eq(key.version))
            .to_owned();
        query_one(conn, &select)
            .await?
            .map(|row| record_from_row(&row))
            .transpose()
    }

    /// `max(version) + 1` over the positive versions of `(urn, aspect)`, or 1.
    pub async fn next_version<C: ConnectionTrait>(
        &self,
        conn: &C,
        urn: &Urn,
        aspect_type: &str,
    ) -> ChronicleResult<i64> {
        let select = Query::select()
            .from(MetadataAspect::Table)
            .expr_as(
                Func::max(Expr::col(MetadataAspect::Version)),
                Alias::new("max_version"),
            )
            .and_where(Expr::col(MetadataAspect::Urn).eq(urn.to_string()))
            .and_where(Expr::col(MetadataAspect::Aspect).eq(aspect_type))
            .and_where(Expr::col(MetadataAspect::Version).ne(LATEST_VERSION))
            .to_owned();
        let max_version = match query_one(conn, &select).await? {
            Some(row) => row.try_get::<Option<i64>>("", "max_version")?,
            None => None,
        };
        Ok(max_version.unwrap_or(0) + 1)
    }

    pub async fn list_versions<C: ConnectionTrait>(
        &self,
        conn: &C,
        aspect_type: &str,
        urn: &Urn,
        start: u64,
        page_size: u64,
    ) -> ChronicleResult<ListResult<i64>> {
        let records = self
            .list_by_urn(conn, aspect_type, urn, start, page_size)
            .await?;
        Ok(records.map(|record| record.key.version))
    }

    /// Every non-deleted version of `(urn, aspect)`, ascending.
    pub async fn list_by_urn<C: ConnectionTrait>(
        &self,
        conn: &C,
        aspect_type: &str,
        urn: &Urn,
        start: u64,
        page_size: u64,
    ) -> ChronicleResult<ListResult<VersionedRecord>> {
        let mut base = live_rows(aspect_type);
        base.and_where(Expr::col(MetadataAspect::Urn).eq(urn.to_string()));
        let total = count_rows(conn, &base).await?;
        let page = base
            .columns(RECORD_COLUMNS)
            .order_by(MetadataAspect::Version, Order::Asc)
            .limit(page_size)
            .offset(start)
            .to_owned();
        let records = query_all(conn, &page)
            .await?
            .iter()
            .map(record_from_row)
            .collect::<ChronicleResult<Vec<_>>>()?;
        Ok(ListResult::from_offset(records, start, page_size, total))
    }

    /// The value every urn holds at `version`, ordered by urn.
    pub async fn list_at_version<C: ConnectionTrait>(
        &self,
        conn: &C,
        aspect_type: &str,
        version: i64,
        start: u64,
        page_size: u64,
    ) -> ChronicleResult<ListResult<VersionedRecord>> {
        let mut base = live_rows(aspect_type);
        base.and_where(Expr::col(MetadataAspect::Version).eq(version));
        let total = count_rows(conn, &base).await?;
        let page = base
            .columns(RECORD_COLUMNS)
            .order_by(MetadataAspect::Urn, Order::Asc)
            .limit(page_size)
            .offset(start)
            .to_owned();
        let records = query_all(conn, &page)
            .await?
            .iter()
            .map(record_from_row)
            .collect::<ChronicleResult<Vec<_>>>()?;
        Ok(ListResult::from_offset(records, start, page_size, total))
    }

    /// Version-0 rows of the given urns, optionally restricted to some aspect types.
    pub async fn latest_records<C: ConnectionTrait>(
        &self,
        conn: &C,
        urns: &[Urn],
        aspect_types: &[String],
    ) -> ChronicleResult<Vec<VersionedRecord>> {
        if urns.is_empty() {
            return Ok(Vec::new());
        }
        let mut select = Query::select()
            .from(MetadataAspect::Table)
            .columns(RECORD_COLUMNS)
            .and_where(
                Expr::col(MetadataAspect::Urn).is_in(urns.iter().map(ToString::to_string)),
            )
            .and_where(Expr::col(MetadataAspect::Version).eq(LATEST_VERSION))
            .order_by(MetadataAspect::Urn, Order::Asc)
            .order_by(MetadataAspect::Aspect, Order::Asc)
            .to_owned();
        if !aspect_types.is_empty() {
            select.and_where(Expr::col(MetadataAspect::Aspect).is_in(aspect_types.iter().cloned()));
        }
        query_all(conn, &select)
            .await?
            .iter()
            .map(record_from_row)
            .collect()
    }
}

fn live_rows(aspect_type: &str) -> SelectStatement {
    Query::select()
        .from(MetadataAspect::Table)
        .and_where(Expr::col(MetadataAspect::Aspect).eq(aspect_type))
        .and_where(Expr::col(MetadataAspect::Metadata).ne(TOMBSTONE_SENTINEL))
        .to_owned()
}

async fn count_rows<C: ConnectionTrait>(conn: &C, base: &SelectStatement) -> ChronicleResult<u64> {
    let select = base
        .clone()
        .expr_as(
            Func::count(Expr::col(MetadataAspect::Version)),
            Alias::new("total"),
        )
        .to_owned();
    let total = match query_one(conn, &select).await? {
        Some(row) => row.try_get::<i64>("", "total")?,
        None => 0,
    };
    Ok(u64::try_from(total).unwrap_or_default())
}

fn record_for(write: &LayoutWrite<'_>) -> VersionedRecord {
    VersionedRecord {
        key: AspectKey::latest(write.urn.clone(), write.aspect_type),
        payload: write.payload.clone(),
        created_on: write.audit.time_millis,
        created_by: write.audit.actor.to_string(),
        created_for: write.audit.impersonator.as_ref().map(ToString::to_string),
    }
}

pub(crate) async fn insert_record<C: ConnectionTrait>(
    conn: &C,
    record: &VersionedRecord,
) -> ChronicleResult<()> {
    let insert = Query::insert()
        .into_table(MetadataAspect::Table)
        .columns(RECORD_COLUMNS)
        .values_panic([
            record.key.urn.to_string().into(),
            record.key.aspect_type.clone().into(),
            record.key.version.into(),
            record.payload.as_column().into(),
            record.created_on.into(),
            record.created_by.clone().into(),
            record.created_for.clone().into(),
        ])
        .to_owned();
    exec(conn, &insert).await?;
    Ok(())
}

pub(crate) fn record_from_row(row: &QueryResult) -> ChronicleResult<VersionedRecord> {
    let urn: String = row.try_get("", &col_name(MetadataAspect::Urn))?;
    let aspect_type: String = row.try_get("", &col_name(MetadataAspect::Aspect))?;
    let version: i64 = row.try_get("", &col_name(MetadataAspect::Version))?;
    let metadata: String = row.try_get("", &col_name(MetadataAspect::Metadata))?;
    let created_on: i64 = row.try_get("", &col_name(MetadataAspect::Createdon))?;
    let created_by: String = row.try_get("", &col_name(MetadataAspect::Createdby))?;
    let created_for: Option<String> = row.try_get("", &col_name(MetadataAspect::Createdfor))?;
    Ok(VersionedRecord {
        key: AspectKey::new(Urn::parse(&urn)?, aspect_type, version),
        payload: StoredPayload::from_column(metadata),
        created_on,
        created_by,
        created_for,
    })
}
