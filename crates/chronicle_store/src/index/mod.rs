//! Secondary index: typed rows in `metadata_index` written with every aspect write, and
//! the filter, sort, paging and group-count queries served from them (or, without a
//! history table, from the entity tables' generated columns).

pub(crate) mod entity_query;
pub(crate) mod extract;
pub(crate) mod query;
pub(crate) mod writer;

use std::time::Duration;

use sea_orm::{ConnectionTrait, DatabaseBackend, QueryResult, Statement};

use crate::sql::{escape_like, index_value_to_sea, SqlBuilder};
use chronicle_core::{
    urn_aspect_type, ChronicleError, ChronicleResult, Condition, IndexCriterion, IndexFilter,
    IndexValue, ListResult, PageRequest, Registry, ScalarKind, Urn,
};

/// Per-call inputs shared by both query builders.
pub(crate) struct QueryContext<'a> {
    pub registry: &'a Registry,
    pub timeout: Duration,
    pub max_criteria: usize,
}

impl QueryContext<'_> {
    /// Validates `filter` against the registry before any I/O and returns it with every
    /// operand converted to the declared kind of its path, so both layouts compare the
    /// same column family.
    pub fn check_filter(
        &self,
        entity_type: &str,
        filter: &IndexFilter,
    ) -> ChronicleResult<IndexFilter> {
        self.registry.entity(entity_type)?;
        filter.validate(self.max_criteria)?;
        let mut typed = filter.clone();
        for criterion in &mut typed.criteria {
            if !self.registry.is_known_aspect(&criterion.aspect_type) {
                return Err(ChronicleError::invalid(format!(
                    "unknown aspect type '{}' in index filter",
                    criterion.aspect_type
                )));
            }
            if let Some(params) = &mut criterion.path_params {
                let kind = self
                    .registry
                    .resolve_path(&criterion.aspect_type, &params.path)?
                    .kind;
                params.value = params.value.coerce_to(kind).map_err(|err| {
                    ChronicleError::invalid(format!(
                        "{} {} of {}: {err}",
                        criterion.aspect_type, params.path, entity_type
                    ))
                })?;
            }
        }
        Ok(typed)
    }
}

/// The filter's criteria plus the implicit `urn.<entityType>` criterion when no criterion
/// already constrains the entity's own urn aspect.
pub(crate) fn effective_criteria(entity_type: &str, filter: &IndexFilter) -> Vec<IndexCriterion> {
    let own = urn_aspect_type(entity_type);
    let mut criteria = filter.criteria.clone();
    if !criteria.iter().any(|criterion| criterion.aspect_type == own) {
        criteria.push(IndexCriterion::has_aspect(own));
    }
    criteria
}

pub(crate) fn operand_kind(value: &IndexValue) -> ChronicleResult<ScalarKind> {
    match value {
        IndexValue::Array(values) => values
            .first()
            .and_then(IndexValue::scalar_kind)
            .ok_or_else(|| ChronicleError::invalid("IN requires a non-empty value set")),
        scalar => scalar
            .scalar_kind()
            .ok_or_else(|| ChronicleError::invalid("operand has no scalar kind")),
    }
}

/// Appends `<column_sql> <op> <operand>` with bound values.
pub(crate) fn push_condition(
    sql: &mut SqlBuilder,
    column_sql: &str,
    condition: Condition,
    value: &IndexValue,
) -> ChronicleResult<()> {
    sql.push(column_sql);
    match condition {
        Condition::In => {
            let IndexValue::Array(values) = value else {
                return Err(ChronicleError::invalid("IN requires an array value"));
            };
            sql.push(" IN (");
            for (position, item) in values.iter().enumerate() {
                if position > 0 {
                    sql.push(", ");
                }
                sql.bind(index_value_to_sea(item)?);
            }
            sql.push(")");
        }
        Condition::StartWith => {
            let IndexValue::String(prefix) = value else {
                return Err(ChronicleError::invalid("START_WITH requires a string value"));
            };
            let escape = like_escape(sql.backend());
            sql.push(" LIKE ")
                .bind(format!("{}%", escape_like(prefix)))
                .push(escape);
        }
        comparison => {
            sql.push(comparison_operator(comparison));
            sql.bind(index_value_to_sea(value)?);
        }
    }
    Ok(())
}

fn comparison_operator(condition: Condition) -> &'static str {
    match condition {
        Condition::Equal => " = ",
        Condition::GreaterThan => " > ",
        Condition::GreaterThanOrEqualTo => " >= ",
        Condition::LessThan => " < ",
        Condition::LessThanOrEqualTo => " <= ",
        Condition::In | Condition::StartWith => " = ",
    }
}

fn like_escape(backend: DatabaseBackend) -> &'static str {
    match backend {
        DatabaseBackend::MySql => " ESCAPE '\\\\'",
        DatabaseBackend::Postgres | DatabaseBackend::Sqlite => " ESCAPE '\\'",
    }
}

/// Runs a query under the configured execution timeout.
pub(crate) async fn query_timed<C: ConnectionTrait>(
    conn: &C,
    stmt: Statement,
    timeout: Duration,
) -> ChronicleResult<Vec<QueryResult>> {
    match tokio::time::timeout(timeout, conn.query_all(stmt)).await {
        Ok(rows) => Ok(rows?),
        Err(_) => Err(ChronicleError::execution(format!(
            "index query exceeded {} ms",
            timeout.as_millis()
        ))),
    }
}

/// Rows carry `urn` and the window count `total_count`.
pub(crate) fn urns_with_total(rows: &[QueryResult]) -> ChronicleResult<(Vec<Urn>, u64)> {
    let mut urns = Vec::with_capacity(rows.len());
    let mut total = 0u64;
    for row in rows {
        let raw: String = row.try_get("", "urn")?;
        let count: i64 = row.try_get("", "total_count")?;
        total = u64::try_from(count).unwrap_or_default();
        urns.push(Urn::parse(&raw)?);
    }
    Ok((urns, total))
}

/// Builds the page from rows fetched with `LIMIT page_size + 1` in cursor mode or
/// `LIMIT page_size OFFSET start` in offset mode.
pub(crate) fn page_from_rows(
    page: &PageRequest,
    mut urns: Vec<Urn>,
    total_count: u64,
) -> ListResult<Urn> {
    match page {
        PageRequest::Cursor { page_size, .. } => {
            let size = *page_size as usize;
            let has_more = urns.len() > size;
            urns.truncate(size);
            let next_cursor = if has_more { urns.last().cloned() } else { None };
            ListResult {
                values: urns,
                next_start: None,
                next_cursor,
                has_more,
                total_count,
                total_page_count: chronicle_core::page_count(total_count, *page_size),
                page_size: *page_size,
            }
        }
        PageRequest::Offset { start, page_size } => {
            ListResult::from_offset(urns, *start, *page_size, total_count)
        }
    }
}

/// `LIMIT`/`OFFSET` tail for the requested page.
pub(crate) fn push_page(sql: &mut SqlBuilder, page: &PageRequest) {
    match page {
        PageRequest::Cursor { page_size, .. } => {
            sql.push(" LIMIT ")
                .bind(i64::try_from(page_size.saturating_add(1)).unwrap_or(i64::MAX));
        }
        PageRequest::Offset { start, page_size } => {
            sql.push(" LIMIT ")
                .bind(i64::try_from(*page_size).unwrap_or(i64::MAX))
                .push(" OFFSET ")
                .bind(i64::try_from(*start).unwrap_or(i64::MAX));
        }
    }
}

/// Reads a group-by value from the column family of `kind` as its display string.
pub(crate) fn group_value(row: &QueryResult, kind: ScalarKind) -> ChronicleResult<Option<String>> {
    Ok(match kind {
        ScalarKind::Long => row
            .try_get::<Option<i64>>("", "group_value")?
            .map(|value| value.to_string()),
        ScalarKind::Double => row
            .try_get::<Option<f64>>("", "group_value")?
            .map(|value| value.to_string()),
        ScalarKind::String => row.try_get::<Option<String>>("", "group_value")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implicit_entity_criterion_is_appended_once() {
        let filter = IndexFilter::new(vec![IndexCriterion::has_aspect("profile")]);
        let criteria = effective_criteria("foo", &filter);
        assert_eq!(criteria.len(), 2);
        assert_eq!(criteria[1].aspect_type, "urn.foo");

        let filter = IndexFilter::new(vec![IndexCriterion::path(
            "urn.foo",
            "/id",
            Condition::GreaterThan,
            IndexValue::Long(3),
        )]);
        assert_eq!(effective_criteria("foo", &filter).len(), 1);
    }

    #[test]
    fn conditions_render_with_binds() {
        let mut sql = SqlBuilder::new(DatabaseBackend::Sqlite);
        push_condition(
            &mut sql,
            "t0.longval",
            Condition::In,
            &IndexValue::Array(vec![IndexValue::Long(1), IndexValue::Long(2)]),
        )
        .expect("in");
        sql.push(" AND ");
        push_condition(
            &mut sql,
            "t0.stringval",
            Condition::StartWith,
            &IndexValue::string("ab_"),
        )
        .expect("prefix");
        assert_eq!(
            sql.sql(),
            "t0.longval IN (?, ?) AND t0.stringval LIKE ? ESCAPE '\\'"
        );
    }

    #[test]
    fn cursor_pages_trim_the_lookahead_row() {
        let urns: Vec<Urn> = (30..36)
            .map(|id| Urn::simple("foo", id.to_string()).expect("urn"))
            .collect();
        let page = page_from_rows(&PageRequest::cursor(None, 5), urns, 6);
        assert_eq!(page.values.len(), 5);
        assert!(page.has_more);
        assert_eq!(
            page.next_cursor.map(|urn| urn.to_string()),
            Some("urn:li:foo:34".to_string())
        );
        assert_eq!(page.total_page_count, 2);
    }
}
