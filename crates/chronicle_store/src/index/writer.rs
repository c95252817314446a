use sea_orm::sea_query::{Expr, Query};
use sea_orm::ConnectionTrait;
use serde_json::Value as JsonValue;

use super::extract::{aspect_rows, urn_rows, IndexCell, IndexRow};
use crate::db::MetadataIndex;
use crate::sql::{exec, query_one};
use chronicle_core::{
    urn_aspect_type, ChronicleError, ChronicleResult, Registry, StoredPayload, Urn,
};

/// Regenerates the index rows of `(urn, aspect)` after a write. Runs inside the write's
/// transaction. The urn's own key rows are written once, on the first indexed write.
pub(crate) async fn index_aspect<C: ConnectionTrait>(
    conn: &C,
    registry: &Registry,
    urn: &Urn,
    aspect_type: &str,
    payload: &StoredPayload,
) -> ChronicleResult<()> {
    ensure_urn_rows(conn, registry, urn).await?;
    let rows = match payload {
        StoredPayload::Value(raw) => {
            let data: JsonValue = serde_json::from_str(raw)
                .map_err(|err| ChronicleError::invalid(format!("aspect payload: {err}")))?;
            aspect_rows(registry.aspect(aspect_type)?, &data)
        }
        StoredPayload::Tombstone => Vec::new(),
    };
    replace_rows(conn, urn, aspect_type, &rows).await
}

pub(crate) async fn ensure_urn_rows<C: ConnectionTrait>(
    conn: &C,
    registry: &Registry,
    urn: &Urn,
) -> ChronicleResult<()> {
    let entity = registry.entity(urn.entity_type())?;
    let pseudo_aspect = urn_aspect_type(&entity.name);
    let select = Query::select()
        .from(MetadataIndex::Table)
        .column(MetadataIndex::Id)
        .and_where(Expr::col(MetadataIndex::Urn).eq(urn.to_string()))
        .and_where(Expr::col(MetadataIndex::Aspect).eq(pseudo_aspect.as_str()))
        .limit(1)
        .to_owned();
    if query_one(conn, &select).await?.is_some() {
        return Ok(());
    }
    insert_rows(conn, urn, &pseudo_aspect, &urn_rows(entity, urn)).await
}

/// Delete-then-insert; rows are never diffed.
pub(crate) async fn replace_rows<C: ConnectionTrait>(
    conn: &C,
    urn: &Urn,
    aspect_type: &str,
    rows: &[IndexRow],
) -> ChronicleResult<()> {
    let delete = Query::delete()
        .from_table(MetadataIndex::Table)
        .and_where(Expr::col(MetadataIndex::Urn).eq(urn.to_string()))
        .and_where(Expr::col(MetadataIndex::Aspect).eq(aspect_type))
        .to_owned();
    exec(conn, &delete).await?;
    insert_rows(conn, urn, aspect_type, rows).await
}

async fn insert_rows<C: ConnectionTrait>(
    conn: &C,
    urn: &Urn,
    aspect_type: &str,
    rows: &[IndexRow],
) -> ChronicleResult<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut insert = Query::insert()
        .into_table(MetadataIndex::Table)
        .columns([
            MetadataIndex::Urn,
            MetadataIndex::Aspect,
            MetadataIndex::Path,
            MetadataIndex::Longval,
            MetadataIndex::Doubleval,
            MetadataIndex::Stringval,
        ])
        .to_owned();
    for row in rows {
        let (long_val, double_val, string_val) = match &row.cell {
            IndexCell::Long(value) => (Some(*value), None, None),
            IndexCell::Double(value) => (None, Some(*value), None),
            IndexCell::String(value) => (None, None, Some(value.clone())),
        };
        insert.values_panic([
            urn.to_string().into(),
            aspect_type.into(),
            row.path.clone().into(),
            long_val.into(),
            double_val.into(),
            string_val.into(),
        ]);
    }
    exec(conn, &insert).await?;
    Ok(())
}
