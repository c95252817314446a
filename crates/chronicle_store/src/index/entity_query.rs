//! Index queries answered from `metadata_entity_<type>` when no history table exists.
//! Criteria map onto key columns (`k_*`), aspect columns (`a_*`) and the generated
//! columns mirroring indexed paths (`i_*`).

use std::collections::BTreeMap;

use sea_orm::{ConnectionTrait, DatabaseBackend};

use super::{
    group_value, page_from_rows, push_condition, push_page, query_timed, urns_with_total,
    QueryContext,
};
use crate::config::SchemaMode;
use crate::evolution::{aspect_column, column_exists, entity_table_name, index_column, key_column};
use crate::sql::{quote_ident, SqlBuilder};
use chronicle_core::{
    path_segments, urn_aspect_type, ChronicleError, ChronicleResult, EntityTypeSpec,
    IndexCriterion, IndexFilter, IndexGroupByCriterion, IndexSortCriterion, ListResult,
    PageRequest, Registry, SortOrder, Urn, URN_ASPECT_PREFIX,
};

/// Column backing `(aspect, path)` on the entity table of `entity`.
pub(crate) enum Target {
    /// Always true for rows of this table.
    Any,
    /// Never true for rows of this table.
    Nothing,
    Column(String),
}

pub(crate) fn path_target(
    registry: &Registry,
    entity: &EntityTypeSpec,
    aspect_type: &str,
    path: &str,
) -> ChronicleResult<Target> {
    let resolved = registry.resolve_path(aspect_type, path)?;
    if let Some(entity_type) = aspect_type.strip_prefix(URN_ASPECT_PREFIX) {
        if entity_type != entity.name {
            return Ok(Target::Nothing);
        }
        let segments = path_segments(path)?;
        return Ok(Target::Column(key_column(segments[0])));
    }
    if !entity.aspects.iter().any(|aspect| aspect == aspect_type) {
        return Ok(Target::Nothing);
    }
    if resolved.fans_out {
        return Err(ChronicleError::unsupported(
            SchemaMode::EntityTable.as_str(),
            format!("filtering on array path {path} of {aspect_type}"),
        ));
    }
    let aspect = registry.aspect(aspect_type)?;
    if !aspect.indexed_paths.iter().any(|indexed| indexed == path) {
        return Err(ChronicleError::invalid(format!(
            "path {path} of {aspect_type} is not indexed"
        )));
    }
    Ok(Target::Column(index_column(aspect_type, path)?))
}

fn aspect_target(entity: &EntityTypeSpec, aspect_type: &str) -> Target {
    if let Some(entity_type) = aspect_type.strip_prefix(URN_ASPECT_PREFIX) {
        return if entity_type == entity.name {
            Target::Any
        } else {
            Target::Nothing
        };
    }
    if entity.aspects.iter().any(|aspect| aspect == aspect_type) {
        Target::Column(aspect_column(aspect_type))
    } else {
        Target::Nothing
    }
}

fn qualified(backend: DatabaseBackend, column: &str) -> String {
    format!("e.{}", quote_ident(backend, column))
}

fn push_criteria(
    sql: &mut SqlBuilder,
    registry: &Registry,
    entity: &EntityTypeSpec,
    criteria: &[IndexCriterion],
) -> ChronicleResult<()> {
    let backend = sql.backend();
    sql.push(" WHERE 1 = 1");
    for criterion in criteria {
        match &criterion.path_params {
            None => match aspect_target(entity, &criterion.aspect_type) {
                Target::Any => {}
                Target::Nothing => {
                    sql.push(" AND 1 = 0");
                }
                Target::Column(column) => {
                    sql.push(" AND ")
                        .push(&qualified(backend, &column))
                        .push(" IS NOT NULL");
                }
            },
            Some(params) => {
                match path_target(registry, entity, &criterion.aspect_type, &params.path)? {
                    Target::Any => {}
                    Target::Nothing => {
                        sql.push(" AND 1 = 0");
                    }
                    Target::Column(column) => {
                        sql.push(" AND ");
                        push_condition(
                            sql,
                            &qualified(backend, &column),
                            params.condition,
                            &params.value,
                        )?;
                    }
                }
            }
        }
    }
    Ok(())
}

pub(crate) async fn list_urns<C: ConnectionTrait>(
    conn: &C,
    ctx: &QueryContext<'_>,
    entity_type: &str,
    filter: &IndexFilter,
    sort: Option<&IndexSortCriterion>,
    page: &PageRequest,
) -> ChronicleResult<ListResult<Urn>> {
    let filter = &ctx.check_filter(entity_type, filter)?;
    page.validate()?;
    let entity = ctx.registry.entity(entity_type)?;
    let backend = conn.get_database_backend();
    let sort_column = match sort {
        Some(sort) => match path_target(ctx.registry, entity, &sort.aspect_type, &sort.path)? {
            Target::Column(column) => Some((column, sort.order)),
            Target::Any | Target::Nothing => None,
        },
        None => None,
    };

    let mut sql = SqlBuilder::new(backend);
    sql.push("SELECT e.urn AS urn, COUNT(*) OVER () AS total_count FROM ")
        .push_ident(&entity_table_name(&entity.name))
        .push(" e");
    push_criteria(&mut sql, ctx.registry, entity, &filter.criteria)?;
    if let PageRequest::Cursor {
        last_urn: Some(last_urn),
        ..
    } = page
    {
        sql.push(" AND e.urn > ").bind(last_urn.to_string());
    }
    sql.push(" ORDER BY ");
    if let Some((column, order)) = &sort_column {
        sql.push(&qualified(backend, column)).push(match order {
            SortOrder::Ascending => " ASC, ",
            SortOrder::Descending => " DESC, ",
        });
    }
    sql.push("e.urn ASC");
    push_page(&mut sql, page);

    let rows = query_timed(conn, sql.build(), ctx.timeout).await?;
    let (urns, mut total) = urns_with_total(&rows)?;
    if let PageRequest::Offset { start, .. } = page {
        if urns.is_empty() && *start > 0 {
            let mut count = SqlBuilder::new(backend);
            count
                .push("SELECT COUNT(*) AS total_count FROM ")
                .push_ident(&entity_table_name(&entity.name))
                .push(" e");
            push_criteria(&mut count, ctx.registry, entity, &filter.criteria)?;
            let rows = query_timed(conn, count.build(), ctx.timeout).await?;
            if let Some(row) = rows.first() {
                total = u64::try_from(row.try_get::<i64>("", "total_count")?).unwrap_or_default();
            }
        }
    }
    Ok(page_from_rows(page, urns, total))
}

pub(crate) async fn count_aggregate<C: ConnectionTrait>(
    conn: &C,
    ctx: &QueryContext<'_>,
    entity_type: &str,
    filter: &IndexFilter,
    group_by: &IndexGroupByCriterion,
) -> ChronicleResult<BTreeMap<String, u64>> {
    let filter = &ctx.check_filter(entity_type, filter)?;
    let entity = ctx.registry.entity(entity_type)?;
    let table = entity_table_name(&entity.name);
    let resolved = ctx
        .registry
        .resolve_path(&group_by.aspect_type, &group_by.path)?;
    let column = if group_by.aspect_type == urn_aspect_type(&entity.name) {
        key_column(path_segments(&group_by.path)?[0])
    } else {
        index_column(&group_by.aspect_type, &group_by.path)?
    };
    if !column_exists(conn, &table, &column).await? {
        log::warn!("group-by column {column} does not exist on {table}; returning no groups");
        return Ok(BTreeMap::new());
    }
    let backend = conn.get_database_backend();
    let group_sql = qualified(backend, &column);

    let mut sql = SqlBuilder::new(backend);
    sql.push("SELECT ")
        .push(&group_sql)
        .push(" AS group_value, COUNT(*) AS group_count FROM ")
        .push_ident(&table)
        .push(" e");
    push_criteria(&mut sql, ctx.registry, entity, &filter.criteria)?;
    sql.push(" AND ")
        .push(&group_sql)
        .push(" IS NOT NULL GROUP BY ")
        .push(&group_sql);

    let rows = query_timed(conn, sql.build(), ctx.timeout).await?;
    let mut groups = BTreeMap::new();
    for row in &rows {
        let Some(value) = group_value(row, resolved.kind)? else {
            continue;
        };
        let count: i64 = row.try_get("", "group_count")?;
        groups.insert(value, u64::try_from(count).unwrap_or_default());
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_core::{
        AspectSpec, Condition, FieldDef, FieldType, IndexValue, RecordSchema, ScalarKind,
    };

    fn registry() -> Registry {
        Registry::builder()
            .aspect(
                AspectSpec::new(
                    "profile",
                    RecordSchema::new(vec![
                        FieldDef::required("name", FieldType::String),
                        FieldDef::optional("age", FieldType::Long),
                        FieldDef::optional("tags", FieldType::array(FieldType::String)),
                    ]),
                )
                .indexed("/age")
                .indexed("/tags"),
            )
            .entity(
                EntityTypeSpec::new("foo")
                    .key_field("id", ScalarKind::Long)
                    .aspect("profile"),
            )
            .build()
            .expect("registry")
    }

    #[test]
    fn criteria_map_to_entity_columns() {
        let registry = registry();
        let entity = registry.entity("foo").expect("entity");
        let criteria = vec![
            IndexCriterion::has_aspect("profile"),
            IndexCriterion::path("profile", "/age", Condition::LessThan, IndexValue::Long(40)),
            IndexCriterion::path("urn.foo", "/id", Condition::GreaterThan, IndexValue::Long(3)),
            IndexCriterion::has_aspect("urn.bar"),
        ];
        let mut sql = SqlBuilder::new(DatabaseBackend::Sqlite);
        push_criteria(&mut sql, &registry, entity, &criteria).expect("criteria");
        assert_eq!(
            sql.sql(),
            " WHERE 1 = 1 AND e.\"a_profile\" IS NOT NULL AND e.\"i_profile$age\" < ? \
             AND e.\"k_id\" > ? AND 1 = 0"
        );
    }

    #[test]
    fn array_and_unindexed_paths_are_rejected() {
        let registry = registry();
        let entity = registry.entity("foo").expect("entity");
        let fan_out = path_target(&registry, entity, "profile", "/tags");
        assert!(matches!(
            fan_out,
            Err(ChronicleError::UnsupportedInSchemaMode { .. })
        ));
        let unindexed = path_target(&registry, entity, "profile", "/name");
        assert!(matches!(unindexed, Err(ChronicleError::Validation { .. })));
    }
}
