use std::sync::Arc;

use sea_orm::sea_query::{Alias, Condition, Expr, Query, SimpleExpr};
use sea_orm::{ConnectionTrait, QueryResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{AspectLayout, LatestSlot, LayoutWrite};
use crate::db::EntityTableCol;
use crate::evolution::{aspect_column, entity_table_name, key_column};
use crate::sql::{col_name, exec, query_all, query_one};
use chronicle_core::{
    AppliedVersion, AspectKey, ChronicleError, ChronicleResult, EntityTypeSpec, Registry,
    ScalarKind, StoredPayload, Urn, VersionedRecord, LATEST_VERSION,
};

/// JSON stored in an entity table's aspect column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Envelope {
    aspect: JsonValue,
    lastmodifiedon: i64,
    lastmodifiedby: String,
    createdfor: Option<String>,
}

/// One row per entity in `metadata_entity_<type>`, one column per aspect. No history is
/// kept; a deleted aspect is a NULL column.
#[derive(Clone, Debug)]
pub(crate) struct EntityLayout {
    registry: Arc<Registry>,
}

impl AspectLayout for EntityLayout {
    async fn read_latest<C: ConnectionTrait>(
        &self,
        conn: &C,
        urn: &Urn,
        aspect_type: &str,
    ) -> ChronicleResult<Option<LatestSlot>> {
        let entity = self.registry.entity(urn.entity_type())?;
        if !entity.aspects.iter().any(|aspect| aspect == aspect_type) {
            return Ok(None);
        }
        let column = aspect_column(aspect_type);
        let select = Query::select()
            .from(Alias::new(entity_table_name(&entity.name)))
            .column(EntityTableCol::Lastmodifiedon)
            .column(Alias::new(&column))
            .and_where(Expr::col(EntityTableCol::Urn).eq(urn.to_string()))
            .to_owned();
        let Some(row) = query_one(conn, &select).await? else {
            return Ok(None);
        };
        let lock_token: i64 = row.try_get("", &col_name(EntityTableCol::Lastmodifiedon))?;
        let raw: Option<String> = row.try_get("", &column)?;
        Ok(raw
            .map(|raw| envelope_record(urn, aspect_type, &raw))
            .transpose()?
            .map(|record| LatestSlot { record, lock_token }))
    }

    async fn apply<C: ConnectionTrait>(
        &self,
        conn: &C,
        write: &LayoutWrite<'_>,
        current: Option<&LatestSlot>,
    ) -> ChronicleResult<AppliedVersion> {
        let entity = self.registry.entity(write.urn.entity_type())?;
        let table = Alias::new(entity_table_name(&entity.name));
        let column = Alias::new(aspect_column(write.aspect_type));
        let cell: SimpleExpr = match write.payload {
            StoredPayload::Value(raw) => encode_envelope(raw, write)?.into(),
            StoredPayload::Tombstone => Option::<String>::None.into(),
        };
        let stamp = [
            (
                Alias::new(col_name(EntityTableCol::Lastmodifiedon)),
                write.audit.time_millis.into(),
            ),
            (
                Alias::new(col_name(EntityTableCol::Lastmodifiedby)),
                write.audit.actor.to_string().into(),
            ),
            (column.clone(), cell.clone()),
        ];

        match (current, write.payload) {
            (None, StoredPayload::Tombstone) => Ok(AppliedVersion::Unchanged),
            (Some(slot), _) => {
                let update = Query::update()
                    .table(table)
                    .values(stamp)
                    .and_where(Expr::col(EntityTableCol::Urn).eq(write.urn.to_string()))
                    .and_where(Expr::col(EntityTableCol::Lastmodifiedon).eq(slot.lock_token))
                    .to_owned();
                if exec(conn, &update).await? == 0 {
                    return Err(ChronicleError::optimistic_lock(format!(
                        "{} row changed since lastmodifiedon {}",
                        write.urn, slot.lock_token
                    )));
                }
                Ok(AppliedVersion::Replaced {
                    displaced_to: LATEST_VERSION,
                })
            }
            (None, StoredPayload::Value(_)) => {
                let update = Query::update()
                    .table(table.clone())
                    .values(stamp)
                    .and_where(Expr::col(EntityTableCol::Urn).eq(write.urn.to_string()))
                    .and_where(Expr::col(column.clone()).is_null())
                    .to_owned();
                if exec(conn, &update).await? > 0 {
                    return Ok(AppliedVersion::Inserted);
                }
                let mut columns = vec![
                    Alias::new(col_name(EntityTableCol::Urn)),
                    Alias::new(col_name(EntityTableCol::Lastmodifiedon)),
                    Alias::new(col_name(EntityTableCol::Lastmodifiedby)),
                ];
                let mut values: Vec<SimpleExpr> = vec![
                    write.urn.to_string().into(),
                    write.audit.time_millis.into(),
                    write.audit.actor.to_string().into(),
                ];
                for (field, value) in key_values(entity, write.urn)? {
                    columns.push(Alias::new(field));
                    values.push(value);
                }
                columns.push(column);
                values.push(cell);
                let insert = Query::insert()
                    .into_table(table)
                    .columns(columns)
                    .values_panic(values)
                    .to_owned();
                exec(conn, &insert).await?;
                Ok(AppliedVersion::Inserted)
            }
        }
    }

    async fn exists<C: ConnectionTrait>(&self, conn: &C, urn: &Urn) -> ChronicleResult<bool> {
        let entity = self.registry.entity(urn.entity_type())?;
        if entity.aspects.is_empty() {
            return Ok(false);
        }
        let mut any_value = Condition::any();
        for aspect in &entity.aspects {
            any_value = any_value.add(Expr::col(Alias::new(aspect_column(aspect))).is_not_null());
        }
        let select = Query::select()
            .from(Alias::new(entity_table_name(&entity.name)))
            .column(EntityTableCol::Urn)
            .and_where(Expr::col(EntityTableCol::Urn).eq(urn.to_string()))
            .cond_where(any_value)
            .limit(1)
            .to_owned();
        Ok(query_one(conn, &select).await?.is_some())
    }
}

impl EntityLayout {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Latest non-null values of `aspect_types` for urns of one entity type.
    pub async fn latest_for_urns<C: ConnectionTrait>(
        &self,
        conn: &C,
        entity_type: &str,
        urns: &[Urn],
        aspect_types: &[String],
    ) -> ChronicleResult<Vec<VersionedRecord>> {
        let entity = self.registry.entity(entity_type)?;
        let aspects: Vec<&String> = aspect_types
            .iter()
            .filter(|aspect| entity.aspects.contains(aspect))
            .collect();
        if urns.is_empty() || aspects.is_empty() {
            return Ok(Vec::new());
        }
        let mut select = Query::select()
            .from(Alias::new(entity_table_name(&entity.name)))
            .column(EntityTableCol::Urn)
            .and_where(Expr::col(EntityTableCol::Urn).is_in(urns.iter().map(ToString::to_string)))
            .to_owned();
        for aspect in &aspects {
            select.column(Alias::new(aspect_column(aspect)));
        }
        let mut records = Vec::new();
        for row in query_all(conn, &select).await? {
            let urn = Urn::parse(&row.try_get::<String>("", &col_name(EntityTableCol::Urn))?)?;
            for aspect in &aspects {
                if let Some(record) = column_record(&row, &urn, aspect)? {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }
}

fn column_record(
    row: &QueryResult,
    urn: &Urn,
    aspect_type: &str,
) -> ChronicleResult<Option<VersionedRecord>> {
    let raw: Option<String> = row.try_get("", &aspect_column(aspect_type))?;
    raw.map(|raw| envelope_record(urn, aspect_type, &raw))
        .transpose()
}

fn encode_envelope(raw: &str, write: &LayoutWrite<'_>) -> ChronicleResult<String> {
    let aspect: JsonValue = serde_json::from_str(raw)
        .map_err(|err| ChronicleError::invalid(format!("aspect payload is not JSON: {err}")))?;
    let envelope = Envelope {
        aspect,
        lastmodifiedon: write.audit.time_millis,
        lastmodifiedby: write.audit.actor.to_string(),
        createdfor: write.audit.impersonator.as_ref().map(ToString::to_string),
    };
    serde_json::to_string(&envelope)
        .map_err(|err| ChronicleError::storage(format!("encode envelope: {err}")))
}

fn envelope_record(urn: &Urn, aspect_type: &str, raw: &str) -> ChronicleResult<VersionedRecord> {
    let envelope: Envelope = serde_json::from_str(raw)
        .map_err(|err| ChronicleError::storage(format!("decode envelope: {err}")))?;
    let payload = serde_json::to_string(&envelope.aspect)
        .map_err(|err| ChronicleError::storage(format!("encode aspect: {err}")))?;
    Ok(VersionedRecord {
        key: AspectKey::latest(urn.clone(), aspect_type),
        payload: StoredPayload::Value(payload),
        created_on: envelope.lastmodifiedon,
        created_by: envelope.lastmodifiedby,
        created_for: envelope.createdfor,
    })
}

/// `k_<field>` column values decoded from the urn's key parts.
fn key_values(entity: &EntityTypeSpec, urn: &Urn) -> ChronicleResult<Vec<(String, SimpleExpr)>> {
    let mut values = Vec::with_capacity(entity.key_fields.len());
    for (index, field) in entity.key_fields.iter().enumerate() {
        let part = urn.part(index).ok_or_else(|| {
            ChronicleError::invalid(format!("urn '{urn}' lacks key field '{}'", field.name))
        })?;
        let value: SimpleExpr = match field.kind {
            ScalarKind::String => part.to_string().into(),
            ScalarKind::Long => part
                .parse::<i64>()
                .map_err(|_| {
                    ChronicleError::invalid(format!(
                        "urn '{urn}' key field '{}' is not a long",
                        field.name
                    ))
                })?
                .into(),
            ScalarKind::Double => part
                .parse::<f64>()
                .map_err(|_| {
                    ChronicleError::invalid(format!(
                        "urn '{urn}' key field '{}' is not a double",
                        field.name
                    ))
                })?
                .into(),
        };
        values.push((key_column(&field.name), value));
    }
    Ok(values)
}
