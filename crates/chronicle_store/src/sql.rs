use sea_orm::sea_query::{
    self, MysqlQueryBuilder, PostgresQueryBuilder, QueryStatementWriter, SqliteQueryBuilder,
    Value as SeaValue,
};
use sea_orm::{ConnectionTrait, DatabaseBackend, QueryResult, Statement};

use chronicle_core::{ChronicleError, ChronicleResult, IndexValue};

pub(crate) fn col_name(column: impl sea_query::Iden) -> String {
    column.to_string()
}

pub(crate) fn build_stmt<S: QueryStatementWriter>(
    backend: DatabaseBackend,
    stmt: &S,
) -> (String, sea_query::Values) {
    match backend {
        DatabaseBackend::Sqlite => stmt.build(SqliteQueryBuilder),
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        DatabaseBackend::MySql => stmt.build(MysqlQueryBuilder),
    }
}

/// Runs a statement and returns the number of rows it touched.
pub(crate) async fn exec<C, S>(conn: &C, stmt: &S) -> ChronicleResult<u64>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let result = conn
        .execute(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(result.rows_affected())
}

pub(crate) async fn query_all<C, S>(conn: &C, stmt: &S) -> ChronicleResult<Vec<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let rows = conn
        .query_all(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(rows)
}

pub(crate) async fn query_one<C, S>(conn: &C, stmt: &S) -> ChronicleResult<Option<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let row = conn
        .query_one(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(row)
}

pub(crate) fn quote_ident(backend: DatabaseBackend, name: &str) -> String {
    match backend {
        DatabaseBackend::MySql => format!("`{}`", name.replace('`', "``")),
        DatabaseBackend::Postgres | DatabaseBackend::Sqlite => {
            format!("\"{}\"", name.replace('"', "\"\""))
        }
    }
}

/// Lowercases a type name and maps anything outside `[a-z0-9_]` to `_`, for use inside
/// table and column names.
pub(crate) fn ident_fragment(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Escapes `%`, `_` and the escape character itself for a `LIKE ... ESCAPE '\'` pattern.
pub(crate) fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Converts a criterion operand into a bind value. Booleans are stored as strings.
pub(crate) fn index_value_to_sea(value: &IndexValue) -> ChronicleResult<SeaValue> {
    match value {
        IndexValue::Boolean(value) => Ok(value.to_string().into()),
        IndexValue::Long(value) => Ok((*value).into()),
        IndexValue::Double(value) => Ok((*value).into()),
        IndexValue::String(value) => Ok(value.clone().into()),
        IndexValue::Array(_) => Err(ChronicleError::invalid(
            "array operand is only valid under IN",
        )),
    }
}

/// Expression extracting a JSON path from a text column, as text.
pub(crate) fn json_text_expr(backend: DatabaseBackend, column_sql: &str, segments: &[&str]) -> String {
    match backend {
        DatabaseBackend::Sqlite => {
            let path = sqlite_json_path(segments);
            format!(
                "(CASE json_type({column_sql}, '{path}') WHEN 'true' THEN 'true' WHEN 'false' THEN 'false' ELSE json_extract({column_sql}, '{path}') END)"
            )
        }
        DatabaseBackend::Postgres => {
            format!(
                "(({column_sql})::jsonb #>> '{{{}}}')",
                segments
                    .iter()
                    .map(|segment| segment.replace('\'', "''"))
                    .collect::<Vec<_>>()
                    .join(",")
            )
        }
        DatabaseBackend::MySql => format!(
            "JSON_UNQUOTE(JSON_EXTRACT({column_sql}, '{}'))",
            sqlite_json_path(segments)
        ),
    }
}

/// `$."a"."b"` path accepted by SQLite and MySQL JSON functions.
pub(crate) fn sqlite_json_path(segments: &[&str]) -> String {
    let mut path = String::from("$");
    for segment in segments {
        path.push_str(".\"");
        path.push_str(&segment.replace('\'', "''").replace('"', "\\\""));
        path.push('"');
    }
    path
}

/// Raw SQL assembled piecewise with positional binds in the backend's placeholder style.
pub(crate) struct SqlBuilder {
    backend: DatabaseBackend,
    sql: String,
    values: Vec<SeaValue>,
}

impl SqlBuilder {
    pub fn new(backend: DatabaseBackend) -> Self {
        Self {
            backend,
            sql: String::new(),
            values: Vec::new(),
        }
    }

    pub fn backend(&self) -> DatabaseBackend {
        self.backend
    }

    pub fn push(&mut self, fragment: &str) -> &mut Self {
        self.sql.push_str(fragment);
        self
    }

    pub fn push_ident(&mut self, name: &str) -> &mut Self {
        let quoted = quote_ident(self.backend, name);
        self.sql.push_str(&quoted);
        self
    }

    pub fn bind(&mut self, value: impl Into<SeaValue>) -> &mut Self {
        self.values.push(value.into());
        match self.backend {
            DatabaseBackend::Postgres => {
                let placeholder = format!("${}", self.values.len());
                self.sql.push_str(&placeholder);
            }
            DatabaseBackend::MySql | DatabaseBackend::Sqlite => self.sql.push('?'),
        }
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn build(self) -> Statement {
        Statement::from_sql_and_values(self.backend, self.sql, self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_follow_backend() {
        let mut sql = SqlBuilder::new(DatabaseBackend::Postgres);
        sql.push("SELECT * FROM ")
            .push_ident("t")
            .push(" WHERE a = ")
            .bind(1i64)
            .push(" AND b = ")
            .bind("x");
        assert_eq!(sql.sql(), "SELECT * FROM \"t\" WHERE a = $1 AND b = $2");
        let mut sql = SqlBuilder::new(DatabaseBackend::MySql);
        sql.push_ident("t").push(" = ").bind(1i64);
        assert_eq!(sql.sql(), "`t` = ?");
    }

    #[test]
    fn like_patterns_are_escaped() {
        assert_eq!(escape_like("50%_a\\b"), "50\\%\\_a\\\\b");
    }

    #[test]
    fn fragments_are_sanitised() {
        assert_eq!(ident_fragment("Dataset.Profile-v2"), "dataset_profile_v2");
    }

    #[test]
    fn json_paths_per_backend() {
        assert_eq!(
            json_text_expr(DatabaseBackend::Postgres, "m", &["a", "b"]),
            "((m)::jsonb #>> '{a,b}')"
        );
        assert_eq!(
            json_text_expr(DatabaseBackend::MySql, "m", &["a"]),
            "JSON_UNQUOTE(JSON_EXTRACT(m, '$.\"a\"'))"
        );
    }
}
