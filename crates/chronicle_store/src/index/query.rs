use std::collections::BTreeMap;

use sea_orm::ConnectionTrait;

use super::{
    effective_criteria, group_value, operand_kind, page_from_rows, push_condition, push_page,
    query_timed, urns_with_total, QueryContext,
};
use crate::sql::SqlBuilder;
use chronicle_core::{
    ChronicleResult, IndexCriterion, IndexFilter, IndexGroupByCriterion, IndexSortCriterion,
    ListResult, PageRequest, ScalarKind, SortOrder, Urn, URN_ASPECT_PREFIX,
};

const INDEX_TABLE: &str = "metadata_index";

pub(crate) fn typed_column(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Long => "longval",
        ScalarKind::Double => "doubleval",
        ScalarKind::String => "stringval",
    }
}

/// `FROM metadata_index t0 JOIN metadata_index t1 ... [extra join] WHERE <t0 criterion>`.
/// Every criterion after the first becomes a self-join on `urn`.
fn push_filter_body(
    sql: &mut SqlBuilder,
    criteria: &[IndexCriterion],
    extra_join: Option<(&str, &str, &str, bool)>,
) -> ChronicleResult<()> {
    sql.push(" FROM ").push(INDEX_TABLE).push(" t0");
    for (position, criterion) in criteria.iter().enumerate().skip(1) {
        let alias = format!("t{position}");
        sql.push(" JOIN ")
            .push(INDEX_TABLE)
            .push(" ")
            .push(&alias)
            .push(" ON ")
            .push(&alias)
            .push(".urn = t0.urn AND ");
        push_criterion(sql, &alias, criterion)?;
    }
    if let Some((alias, aspect_type, path, outer)) = extra_join {
        sql.push(if outer { " LEFT JOIN " } else { " JOIN " })
            .push(INDEX_TABLE)
            .push(" ")
            .push(alias)
            .push(" ON ")
            .push(alias)
            .push(".urn = t0.urn AND ")
            .push(alias)
            .push(".aspect = ")
            .bind(aspect_type)
            .push(" AND ")
            .push(alias)
            .push(".path = ")
            .bind(path);
    }
    sql.push(" WHERE ");
    match criteria.first() {
        Some(first) => push_criterion(sql, "t0", first),
        None => {
            sql.push("1 = 1");
            Ok(())
        }
    }
}

fn push_criterion(sql: &mut SqlBuilder, alias: &str, criterion: &IndexCriterion) -> ChronicleResult<()> {
    sql.push(alias)
        .push(".aspect = ")
        .bind(criterion.aspect_type.as_str());
    if let Some(params) = &criterion.path_params {
        sql.push(" AND ")
            .push(alias)
            .push(".path = ")
            .bind(params.path.as_str())
            .push(" AND ");
        let column = format!("{alias}.{}", typed_column(operand_kind(&params.value)?));
        push_condition(sql, &column, params.condition, &params.value)?;
    }
    Ok(())
}

/// Filtered, optionally sorted page of urns from the index table.
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
    let criteria = effective_criteria(entity_type, filter);
    let sort_kind = match sort {
        Some(sort) => Some(ctx.registry.resolve_path(&sort.aspect_type, &sort.path)?.kind),
        None => None,
    };
    let backend = conn.get_database_backend();

    let mut sql = SqlBuilder::new(backend);
    sql.push("SELECT t0.urn AS urn, COUNT(*) OVER () AS total_count");
    let sort_join = sort.map(|sort| ("tsort", sort.aspect_type.as_str(), sort.path.as_str(), true));
    push_filter_body(&mut sql, &criteria, sort_join)?;
    if let PageRequest::Cursor {
        last_urn: Some(last_urn),
        ..
    } = page
    {
        sql.push(" AND t0.urn > ").bind(last_urn.to_string());
    }
    sql.push(" GROUP BY t0.urn ORDER BY ");
    if let (Some(sort), Some(kind)) = (sort, sort_kind) {
        let column = typed_column(kind);
        match sort.order {
            SortOrder::Ascending => sql.push("MIN(tsort.").push(column).push(") ASC, "),
            SortOrder::Descending => sql.push("MAX(tsort.").push(column).push(") DESC, "),
        };
    }
    sql.push("t0.urn ASC");
    push_page(&mut sql, page);

    let rows = query_timed(conn, sql.build(), ctx.timeout).await?;
    let (urns, mut total) = urns_with_total(&rows)?;
    if let PageRequest::Offset { start, .. } = page {
        if urns.is_empty() && *start > 0 {
            total = count_matches(conn, ctx, &criteria).await?;
        }
    }
    Ok(page_from_rows(page, urns, total))
}

/// Total number of urns matching `criteria`, for offset pages past the end.
async fn count_matches<C: ConnectionTrait>(
    conn: &C,
    ctx: &QueryContext<'_>,
    criteria: &[IndexCriterion],
) -> ChronicleResult<u64> {
    let mut sql = SqlBuilder::new(conn.get_database_backend());
    sql.push("SELECT COUNT(*) AS total_count FROM (SELECT t0.urn AS urn");
    push_filter_body(&mut sql, criteria, None)?;
    sql.push(" GROUP BY t0.urn) matched");
    let rows = query_timed(conn, sql.build(), ctx.timeout).await?;
    let total = match rows.first() {
        Some(row) => row.try_get::<i64>("", "total_count")?,
        None => 0,
    };
    Ok(u64::try_from(total).unwrap_or_default())
}

/// `group value -> number of matching urns` over one extra `(aspect, path)` join.
pub(crate) async fn count_aggregate<C: ConnectionTrait>(
    conn: &C,
    ctx: &QueryContext<'_>,
    entity_type: &str,
    filter: &IndexFilter,
    group_by: &IndexGroupByCriterion,
) -> ChronicleResult<BTreeMap<String, u64>> {
    let filter = &ctx.check_filter(entity_type, filter)?;
    let kind = ctx
        .registry
        .resolve_path(&group_by.aspect_type, &group_by.path)?
        .kind;
    if !is_indexed(ctx, group_by)? {
        log::warn!(
            "group-by path {} of {} is not indexed; returning no groups",
            group_by.path,
            group_by.aspect_type
        );
        return Ok(BTreeMap::new());
    }
    let criteria = effective_criteria(entity_type, filter);
    let column = typed_column(kind);

    let mut sql = SqlBuilder::new(conn.get_database_backend());
    sql.push("SELECT tgroup.")
        .push(column)
        .push(" AS group_value, COUNT(DISTINCT t0.urn) AS group_count");
    push_filter_body(
        &mut sql,
        &criteria,
        Some((
            "tgroup",
            group_by.aspect_type.as_str(),
            group_by.path.as_str(),
            false,
        )),
    )?;
    sql.push(" GROUP BY tgroup.").push(column);

    let rows = query_timed(conn, sql.build(), ctx.timeout).await?;
    let mut groups = BTreeMap::new();
    for row in &rows {
        let Some(value) = group_value(row, kind)? else {
            continue;
        };
        let count: i64 = row.try_get("", "group_count")?;
        groups.insert(value, u64::try_from(count).unwrap_or_default());
    }
    Ok(groups)
}

fn is_indexed(ctx: &QueryContext<'_>, group_by: &IndexGroupByCriterion) -> ChronicleResult<bool> {
    if group_by.aspect_type.starts_with(URN_ASPECT_PREFIX) {
        return Ok(true);
    }
    let aspect = ctx.registry.aspect(&group_by.aspect_type)?;
    Ok(aspect.indexed_paths.iter().any(|path| path == &group_by.path))
}
