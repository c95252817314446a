//! Registry-driven tables: one entity table per entity type and one edge table per
//! relationship type. Every step is idempotent; columns are added only when missing.

use std::collections::HashSet;

use sea_orm::sea_query::{Alias, ColumnDef, Index, Table};
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};

use crate::db::{EntityTableCol, RelationshipCol};
use crate::sql::{ident_fragment, json_text_expr, quote_ident, sqlite_json_path};
use chronicle_core::{path_segments, ChronicleResult, EntityTypeSpec, Registry, ScalarKind};

pub(crate) const ENTITY_TABLE_PREFIX: &str = "metadata_entity_";
pub(crate) const RELATIONSHIP_TABLE_PREFIX: &str = "metadata_relationship_";
/// Key inside the mode-B column envelope that holds the aspect payload.
pub(crate) const ENVELOPE_ASPECT_KEY: &str = "aspect";

pub(crate) fn entity_table_name(entity_type: &str) -> String {
    format!("{ENTITY_TABLE_PREFIX}{}", ident_fragment(entity_type))
}

pub(crate) fn relationship_table_name(relationship_type: &str) -> String {
    format!("{RELATIONSHIP_TABLE_PREFIX}{}", ident_fragment(relationship_type))
}

pub(crate) fn aspect_column(aspect_type: &str) -> String {
    format!("a_{}", ident_fragment(aspect_type))
}

pub(crate) fn key_column(field: &str) -> String {
    format!("k_{}", ident_fragment(field))
}

/// `i_<aspect>$<seg1>$<seg2>` for the generated column mirroring an indexed path.
pub(crate) fn index_column(aspect_type: &str, path: &str) -> ChronicleResult<String> {
    let segments = path_segments(path)?;
    let mut name = format!("i_{}", ident_fragment(aspect_type));
    for segment in segments {
        name.push('$');
        name.push_str(&ident_fragment(segment));
    }
    Ok(name)
}

/// Column names of `table`, generated columns included.
pub(crate) async fn table_columns<C: ConnectionTrait>(
    conn: &C,
    table: &str,
) -> ChronicleResult<HashSet<String>> {
    let backend = conn.get_database_backend();
    let stmt = match backend {
        DatabaseBackend::Sqlite => Statement::from_string(
            backend,
            format!(
                "SELECT name AS column_name FROM pragma_table_xinfo('{}')",
                table.replace('\'', "''")
            ),
        ),
        DatabaseBackend::Postgres => Statement::from_sql_and_values(
            backend,
            "SELECT column_name::text AS column_name FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1",
            [table.into()],
        ),
        DatabaseBackend::MySql => Statement::from_sql_and_values(
            backend,
            "SELECT CAST(column_name AS CHAR) AS column_name FROM information_schema.columns \
             WHERE table_schema = DATABASE() AND table_name = ?",
            [table.into()],
        ),
    };
    let rows = conn.query_all(stmt).await?;
    let mut columns = HashSet::new();
    for row in rows {
        let name: String = row.try_get("", "column_name")?;
        columns.insert(name);
    }
    Ok(columns)
}

pub(crate) async fn column_exists<C: ConnectionTrait>(
    conn: &C,
    table: &str,
    column: &str,
) -> ChronicleResult<bool> {
    Ok(table_columns(conn, table).await?.contains(column))
}

/// Creates or extends the registry-driven tables.
pub(crate) async fn evolve<C: ConnectionTrait>(
    conn: &C,
    registry: &Registry,
    entity_tables: bool,
) -> ChronicleResult<()> {
    if entity_tables {
        for entity in registry.entities() {
            ensure_entity_table(conn, registry, entity).await?;
        }
    }
    for relationship in registry.relationships() {
        ensure_relationship_table(conn, relationship).await?;
    }
    Ok(())
}

async fn ensure_entity_table<C: ConnectionTrait>(
    conn: &C,
    registry: &Registry,
    entity: &EntityTypeSpec,
) -> ChronicleResult<()> {
    let backend = conn.get_database_backend();
    let table = entity_table_name(&entity.name);
    let create = Table::create()
        .table(Alias::new(&table))
        .if_not_exists()
        .col(
            ColumnDef::new(EntityTableCol::Urn)
                .string_len(500)
                .not_null()
                .primary_key(),
        )
        .col(
            ColumnDef::new(EntityTableCol::Lastmodifiedon)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(EntityTableCol::Lastmodifiedby)
                .string_len(255)
                .not_null(),
        )
        .to_owned();
    conn.execute(backend.build(&create)).await?;

    let mut existing = table_columns(conn, &table).await?;
    for field in &entity.key_fields {
        let name = key_column(&field.name);
        if existing.contains(&name) {
            continue;
        }
        let mut column = ColumnDef::new(Alias::new(&name));
        scalar_column_type(&mut column, field.kind);
        column.null();
        add_column(conn, &table, column).await?;
        existing.insert(name);
    }
    for aspect_type in &entity.aspects {
        let aspect = registry.aspect(aspect_type)?;
        let column_name = aspect_column(aspect_type);
        if !existing.contains(&column_name) {
            let mut column = ColumnDef::new(Alias::new(&column_name));
            column.text().null();
            add_column(conn, &table, column).await?;
            existing.insert(column_name.clone());
        }
        for path in &aspect.indexed_paths {
            let resolved = registry.resolve_path(aspect_type, path)?;
            if resolved.fans_out {
                continue;
            }
            let name = index_column(aspect_type, path)?;
            if existing.contains(&name) {
                continue;
            }
            let mut column = ColumnDef::new(Alias::new(&name));
            scalar_column_type(&mut column, resolved.kind);
            column.extra(generated_clause(backend, &column_name, path, resolved.kind)?);
            add_column(conn, &table, column).await?;
            existing.insert(name);
        }
    }
    Ok(())
}

async fn add_column<C: ConnectionTrait>(
    conn: &C,
    table: &str,
    mut column: ColumnDef,
) -> ChronicleResult<()> {
    let backend = conn.get_database_backend();
    let alter = Table::alter()
        .table(Alias::new(table))
        .add_column(&mut column)
        .to_owned();
    conn.execute(backend.build(&alter)).await?;
    log::info!("added column to {table}");
    Ok(())
}

fn scalar_column_type(column: &mut ColumnDef, kind: ScalarKind) {
    match kind {
        ScalarKind::String => {
            column.text();
        }
        ScalarKind::Long => {
            column.big_integer();
        }
        ScalarKind::Double => {
            column.double();
        }
    }
}

/// `GENERATED ALWAYS AS (...)` clause extracting `$.aspect.<path>` from the envelope column.
fn generated_clause(
    backend: DatabaseBackend,
    aspect_column: &str,
    path: &str,
    kind: ScalarKind,
) -> ChronicleResult<String> {
    let mut segments = vec![ENVELOPE_ASPECT_KEY];
    segments.extend(path_segments(path)?);
    let column_sql = quote_ident(backend, aspect_column);
    let text = json_text_expr(backend, &column_sql, &segments);
    let expr = match (backend, kind) {
        (_, ScalarKind::String) => text,
        (DatabaseBackend::Sqlite, _) => format!(
            "json_extract({column_sql}, '{}')",
            sqlite_json_path(&segments)
        ),
        (DatabaseBackend::Postgres, ScalarKind::Long) => format!("({text})::bigint"),
        (DatabaseBackend::Postgres, ScalarKind::Double) => format!("({text})::double precision"),
        (DatabaseBackend::MySql, ScalarKind::Long) => format!("CAST({text} AS SIGNED)"),
        (DatabaseBackend::MySql, ScalarKind::Double) => format!("CAST({text} AS DOUBLE)"),
    };
    let storage = match backend {
        DatabaseBackend::Postgres => "STORED",
        DatabaseBackend::Sqlite | DatabaseBackend::MySql => "VIRTUAL",
    };
    Ok(format!("GENERATED ALWAYS AS ({expr}) {storage}"))
}

async fn ensure_relationship_table<C: ConnectionTrait>(
    conn: &C,
    relationship_type: &str,
) -> ChronicleResult<()> {
    let backend = conn.get_database_backend();
    let table = relationship_table_name(relationship_type);
    let create = Table::create()
        .table(Alias::new(&table))
        .if_not_exists()
        .col(
            ColumnDef::new(RelationshipCol::Id)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(ColumnDef::new(RelationshipCol::Source).string_len(500).not_null())
        .col(
            ColumnDef::new(RelationshipCol::Destination)
                .string_len(500)
                .not_null(),
        )
        .col(
            ColumnDef::new(RelationshipCol::SourceType)
                .string_len(100)
                .not_null(),
        )
        .col(
            ColumnDef::new(RelationshipCol::DestinationType)
                .string_len(100)
                .not_null(),
        )
        .col(ColumnDef::new(RelationshipCol::Metadata).text().not_null())
        .col(
            ColumnDef::new(RelationshipCol::Lastmodifiedon)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(RelationshipCol::Lastmodifiedby)
                .string_len(255)
                .not_null(),
        )
        .col(ColumnDef::new(RelationshipCol::DeletedTs).big_integer().null())
        .to_owned();
    conn.execute(backend.build(&create)).await?;
    for (suffix, column) in [
        ("source", RelationshipCol::Source),
        ("destination", RelationshipCol::Destination),
    ] {
        let index = Index::create()
            .name(format!("idx_{table}_{suffix}"))
            .table(Alias::new(&table))
            .col(column)
            .if_not_exists()
            .to_owned();
        conn.execute(backend.build(&index)).await?;
    }
    Ok(())
}
