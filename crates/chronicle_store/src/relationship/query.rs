//! Read side of the relationship tables.
//!
//! Single-hop lookups join the edge table with the entity tables of either side when a
//! side filter reaches into aspect data. Multi-hop lookups walk the edge table with a
//! recursive CTE bounded by `max_hops`; `UNION` deduplicates `(urn, hops)` pairs so
//! cycles terminate.

use std::time::Duration;

use sea_orm::{ConnectionTrait, DatabaseBackend, QueryResult};

use super::check_relationship_type;
use crate::config::SchemaMode;
use crate::evolution::{entity_table_name, relationship_table_name};
use crate::index::entity_query::{path_target, Target};
use crate::index::{operand_kind, push_condition, query_timed};
use crate::sql::{json_text_expr, quote_ident, SqlBuilder};
use chronicle_core::{
    path_segments, AuditStamp, ChronicleError, ChronicleResult, EdgeCriterion, EdgeField,
    EntityField, EntityFilter, FindEntitiesQuery, FindRelationshipsQuery, Registry,
    RelationshipDirection, RelationshipRecord, ScalarKind, Urn,
};

pub(crate) struct RelationshipContext<'a> {
    pub registry: &'a Registry,
    pub timeout: Duration,
    pub mode: SchemaMode,
}

/// Column pair naming the near and far end of an edge for a walk direction.
struct Ends {
    from: &'static str,
    from_type: &'static str,
    to: &'static str,
    to_type: &'static str,
}

fn ends(direction: RelationshipDirection) -> Ends {
    match direction {
        RelationshipDirection::Outgoing => Ends {
            from: "source",
            from_type: "source_type",
            to: "destination",
            to_type: "destination_type",
        },
        RelationshipDirection::Incoming => Ends {
            from: "destination",
            from_type: "destination_type",
            to: "source",
            to_type: "source_type",
        },
    }
}

/// One side of an edge as seen by a side filter.
struct Side<'a> {
    filter: &'a EntityFilter,
    urn_sql: String,
    type_sql: String,
    alias: &'static str,
}

impl Side<'_> {
    fn push_join(&self, sql: &mut SqlBuilder, ctx: &RelationshipContext<'_>) -> ChronicleResult<()> {
        if self.filter.is_urn_only() {
            return Ok(());
        }
        if !ctx.mode.uses_entity_tables() {
            return Err(ChronicleError::unsupported(
                ctx.mode.as_str(),
                "relationship filters on aspect fields",
            ));
        }
        let Some(entity_type) = &self.filter.entity_type else {
            return Err(ChronicleError::invalid(
                "aspect criteria require the entity type of their side",
            ));
        };
        let entity = ctx.registry.entity(entity_type)?;
        sql.push(" JOIN ")
            .push_ident(&entity_table_name(&entity.name))
            .push(" ")
            .push(self.alias)
            .push(" ON ")
            .push(self.alias)
            .push(".urn = ")
            .push(&self.urn_sql);
        Ok(())
    }

    fn push_conditions(
        &self,
        sql: &mut SqlBuilder,
        registry: &Registry,
    ) -> ChronicleResult<()> {
        let backend = sql.backend();
        if let Some(entity_type) = &self.filter.entity_type {
            registry.entity(entity_type)?;
            sql.push(" AND ")
                .push(&self.type_sql)
                .push(" = ")
                .bind(entity_type.clone());
        }
        for criterion in &self.filter.criteria {
            match &criterion.field {
                EntityField::Urn => {
                    sql.push(" AND ");
                    push_condition(sql, &self.urn_sql, criterion.condition, &criterion.value)?;
                }
                EntityField::Aspect { aspect_type, path } => {
                    let Some(entity_type) = &self.filter.entity_type else {
                        return Err(ChronicleError::invalid(
                            "aspect criteria require the entity type of their side",
                        ));
                    };
                    let entity = registry.entity(entity_type)?;
                    match path_target(registry, entity, aspect_type, path)? {
                        Target::Any => {}
                        Target::Nothing => {
                            sql.push(" AND 1 = 0");
                        }
                        Target::Column(column) => {
                            let column_sql =
                                format!("{}.{}", self.alias, quote_ident(backend, &column));
                            sql.push(" AND ");
                            push_condition(sql, &column_sql, criterion.condition, &criterion.value)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn payload_expr(
    backend: DatabaseBackend,
    alias: &str,
    path: &str,
    kind: ScalarKind,
) -> ChronicleResult<String> {
    let segments = path_segments(path)?;
    let text = json_text_expr(backend, &format!("{alias}.metadata"), &segments);
    Ok(match (backend, kind) {
        (_, ScalarKind::String) | (DatabaseBackend::Sqlite, _) => text,
        (DatabaseBackend::Postgres, ScalarKind::Long) => format!("CAST({text} AS BIGINT)"),
        (DatabaseBackend::Postgres, ScalarKind::Double) => {
            format!("CAST({text} AS DOUBLE PRECISION)")
        }
        (DatabaseBackend::MySql, ScalarKind::Long) => format!("CAST({text} AS SIGNED)"),
        (DatabaseBackend::MySql, ScalarKind::Double) => format!("CAST({text} AS DOUBLE)"),
    })
}

fn push_edge_criteria(
    sql: &mut SqlBuilder,
    alias: &str,
    criteria: &[EdgeCriterion],
) -> ChronicleResult<()> {
    let backend = sql.backend();
    for criterion in criteria {
        let column_sql = match &criterion.field {
            EdgeField::Source => format!("{alias}.source"),
            EdgeField::Destination => format!("{alias}.destination"),
            EdgeField::SourceType => format!("{alias}.source_type"),
            EdgeField::DestinationType => format!("{alias}.destination_type"),
            EdgeField::Payload { path } => {
                payload_expr(backend, alias, path, operand_kind(&criterion.value)?)?
            }
        };
        sql.push(" AND ");
        push_condition(sql, &column_sql, criterion.condition, &criterion.value)?;
    }
    Ok(())
}

fn push_limit(sql: &mut SqlBuilder, count: u64, offset: u64) {
    sql.push(" LIMIT ")
        .bind(i64::try_from(count).unwrap_or(i64::MAX))
        .push(" OFFSET ")
        .bind(i64::try_from(offset).unwrap_or(i64::MAX));
}

pub(crate) async fn find_relationships<C: ConnectionTrait>(
    conn: &C,
    ctx: &RelationshipContext<'_>,
    query: &FindRelationshipsQuery,
) -> ChronicleResult<Vec<RelationshipRecord>> {
    query.validate()?;
    let relationship_type = &query.relationship.relationship_type;
    check_relationship_type(ctx.registry, relationship_type)?;
    let backend = conn.get_database_backend();
    let empty = EntityFilter::default();
    let source = Side {
        filter: query.source.as_ref().unwrap_or(&empty),
        urn_sql: "r.source".to_string(),
        type_sql: "r.source_type".to_string(),
        alias: "s",
    };
    let destination = Side {
        filter: query.destination.as_ref().unwrap_or(&empty),
        urn_sql: "r.destination".to_string(),
        type_sql: "r.destination_type".to_string(),
        alias: "d",
    };

    let mut sql = SqlBuilder::new(backend);
    sql.push(
        "SELECT r.source AS source, r.destination AS destination, r.metadata AS metadata, \
         r.lastmodifiedon AS lastmodifiedon, r.lastmodifiedby AS lastmodifiedby FROM ",
    )
    .push_ident(&relationship_table_name(relationship_type))
    .push(" r");
    source.push_join(&mut sql, ctx)?;
    destination.push_join(&mut sql, ctx)?;
    sql.push(" WHERE r.deleted_ts IS NULL");
    source.push_conditions(&mut sql, ctx.registry)?;
    destination.push_conditions(&mut sql, ctx.registry)?;
    push_edge_criteria(&mut sql, "r", &query.relationship.criteria)?;
    sql.push(" ORDER BY r.source ASC, r.destination ASC, r.id ASC");
    push_limit(&mut sql, query.count, query.offset);

    let rows = query_timed(conn, sql.build(), ctx.timeout).await?;
    rows.iter()
        .map(|row| record_from_row(relationship_type, row))
        .collect()
}

pub(crate) async fn find_entities<C: ConnectionTrait>(
    conn: &C,
    ctx: &RelationshipContext<'_>,
    query: &FindEntitiesQuery,
) -> ChronicleResult<Vec<Urn>> {
    query.validate()?;
    let relationship_type = &query.relationship.relationship_type;
    check_relationship_type(ctx.registry, relationship_type)?;
    let backend = conn.get_database_backend();
    let table = relationship_table_name(relationship_type);
    let ends = ends(query.relationship.direction);
    let empty = EntityFilter::default();
    let target_filter = query.target.as_ref().unwrap_or(&empty);
    let start = Side {
        filter: &query.start,
        urn_sql: format!("r.{}", ends.from),
        type_sql: format!("r.{}", ends.from_type),
        alias: "st",
    };

    let mut sql = SqlBuilder::new(backend);
    if query.max_hops == 1 {
        let target = Side {
            filter: target_filter,
            urn_sql: format!("r.{}", ends.to),
            type_sql: format!("r.{}", ends.to_type),
            alias: "tt",
        };
        sql.push("SELECT DISTINCT r.")
            .push(ends.to)
            .push(" AS urn FROM ")
            .push_ident(&table)
            .push(" r");
        start.push_join(&mut sql, ctx)?;
        target.push_join(&mut sql, ctx)?;
        sql.push(" WHERE r.deleted_ts IS NULL");
        start.push_conditions(&mut sql, ctx.registry)?;
        target.push_conditions(&mut sql, ctx.registry)?;
        push_edge_criteria(&mut sql, "r", &query.relationship.criteria)?;
    } else {
        sql.push("WITH RECURSIVE walk(urn, node_type, hops) AS (SELECT r.")
            .push(ends.to)
            .push(", r.")
            .push(ends.to_type)
            .push(", 1 FROM ")
            .push_ident(&table)
            .push(" r");
        start.push_join(&mut sql, ctx)?;
        sql.push(" WHERE r.deleted_ts IS NULL");
        start.push_conditions(&mut sql, ctx.registry)?;
        push_edge_criteria(&mut sql, "r", &query.relationship.criteria)?;
        sql.push(" UNION SELECT r.")
            .push(ends.to)
            .push(", r.")
            .push(ends.to_type)
            .push(", w.hops + 1 FROM walk w JOIN ")
            .push_ident(&table)
            .push(" r ON r.")
            .push(ends.from)
            .push(" = w.urn WHERE r.deleted_ts IS NULL");
        push_edge_criteria(&mut sql, "r", &query.relationship.criteria)?;
        sql.push(" AND w.hops < ")
            .bind(i64::from(query.max_hops))
            .push(") SELECT DISTINCT w.urn AS urn FROM walk w");
        let target = Side {
            filter: target_filter,
            urn_sql: "w.urn".to_string(),
            type_sql: "w.node_type".to_string(),
            alias: "tt",
        };
        target.push_join(&mut sql, ctx)?;
        sql.push(" WHERE w.hops >= ").bind(i64::from(query.min_hops));
        target.push_conditions(&mut sql, ctx.registry)?;
    }
    sql.push(" ORDER BY urn ASC");
    push_limit(&mut sql, query.count, query.offset);

    let rows = query_timed(conn, sql.build(), ctx.timeout).await?;
    rows.iter()
        .map(|row| {
            let raw: String = row.try_get("", "urn")?;
            Urn::parse(&raw)
        })
        .collect()
}

fn record_from_row(relationship_type: &str, row: &QueryResult) -> ChronicleResult<RelationshipRecord> {
    let source: String = row.try_get("", "source")?;
    let destination: String = row.try_get("", "destination")?;
    let metadata: Option<String> = row.try_get("", "metadata")?;
    let last_modified_on: i64 = row.try_get("", "lastmodifiedon")?;
    let last_modified_by: String = row.try_get("", "lastmodifiedby")?;
    let payload = match metadata {
        Some(raw) if !raw.is_empty() => serde_json::from_str(&raw).map_err(|err| {
            ChronicleError::storage(format!("corrupt {relationship_type} edge payload: {err}"))
        })?,
        _ => serde_json::Value::Null,
    };
    Ok(RelationshipRecord {
        relationship_type: relationship_type.to_string(),
        source: Urn::parse(&source)?,
        destination: Urn::parse(&destination)?,
        payload,
        last_modified: AuditStamp::new(Urn::parse(&last_modified_by)?, last_modified_on),
    })
}
