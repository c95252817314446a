use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{DatabaseBackend, Statement};
use sea_orm_migration::sea_query::{
    MysqlQueryBuilder, PostgresQueryBuilder, QueryStatementWriter, SqliteQueryBuilder,
};

use crate::db::*;
use chronicle_core::now_millis;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();

        manager
            .create_table(
                Table::create()
                    .table(MetadataSchemaVersion::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MetadataSchemaVersion::Version)
                            .string_len(255)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(MetadataSchemaVersion::AppliedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MetadataSchemaVersion::Checksum)
                            .string_len(64)
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MetadataAspect::Table)
                    .if_not_exists()
                    .col(urn_col(MetadataAspect::Urn))
                    .col(
                        ColumnDef::new(MetadataAspect::Aspect)
                            .string_len(200)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MetadataAspect::Version)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(MetadataAspect::Metadata).text().not_null())
                    .col(
                        ColumnDef::new(MetadataAspect::Createdon)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MetadataAspect::Createdby)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(MetadataAspect::Createdfor).string_len(255))
                    .primary_key(
                        Index::create()
                            .name("pk_metadata_aspect")
                            .col(MetadataAspect::Urn)
                            .col(MetadataAspect::Aspect)
                            .col(MetadataAspect::Version),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MetadataIndex::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MetadataIndex::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(urn_col(MetadataIndex::Urn))
                    .col(
                        ColumnDef::new(MetadataIndex::Aspect)
                            .string_len(200)
                            .not_null(),
                    )
                    .col(ColumnDef::new(MetadataIndex::Path).string_len(200).not_null())
                    .col(ColumnDef::new(MetadataIndex::Longval).big_integer())
                    .col(ColumnDef::new(MetadataIndex::Doubleval).double())
                    .col(ColumnDef::new(MetadataIndex::Stringval).text())
                    .to_owned(),
            )
            .await?;

        create_indexes(manager, backend).await?;

        let checksum = blake3::hash(self.name().as_bytes()).to_hex().to_string();
        let insert = Query::insert()
            .into_table(MetadataSchemaVersion::Table)
            .columns([
                MetadataSchemaVersion::Version,
                MetadataSchemaVersion::AppliedAt,
                MetadataSchemaVersion::Checksum,
            ])
            .values_panic([
                self.name().to_string().into(),
                now_millis().into(),
                checksum.into(),
            ])
            .to_owned();
        let (sql, values) = build_stmt(backend, &insert);
        manager
            .get_connection()
            .execute(Statement::from_sql_and_values(backend, sql, values))
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MetadataIndex::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MetadataAspect::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(
                Table::drop()
                    .table(MetadataSchemaVersion::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;
        Ok(())
    }
}

async fn create_indexes(manager: &SchemaManager<'_>, backend: DatabaseBackend) -> Result<(), DbErr> {
    manager
        .create_index(
            Index::create()
                .name("idx_metadata_aspect_aspect_version")
                .table(MetadataAspect::Table)
                .col(MetadataAspect::Aspect)
                .col(MetadataAspect::Version)
                .if_not_exists()
                .to_owned(),
        )
        .await?;
    manager
        .create_index(
            Index::create()
                .name("idx_metadata_index_urn_aspect")
                .table(MetadataIndex::Table)
                .col(MetadataIndex::Urn)
                .col(MetadataIndex::Aspect)
                .if_not_exists()
                .to_owned(),
        )
        .await?;
    manager
        .create_index(
            Index::create()
                .name("idx_metadata_index_long")
                .table(MetadataIndex::Table)
                .col(MetadataIndex::Aspect)
                .col(MetadataIndex::Path)
                .col(MetadataIndex::Longval)
                .if_not_exists()
                .to_owned(),
        )
        .await?;
    manager
        .create_index(
            Index::create()
                .name("idx_metadata_index_double")
                .table(MetadataIndex::Table)
                .col(MetadataIndex::Aspect)
                .col(MetadataIndex::Path)
                .col(MetadataIndex::Doubleval)
                .if_not_exists()
                .to_owned(),
        )
        .await?;
    // MySQL cannot index a TEXT column without a prefix length.
    if backend != DatabaseBackend::MySql {
        manager
            .create_index(
                Index::create()
                    .name("idx_metadata_index_string")
                    .table(MetadataIndex::Table)
                    .col(MetadataIndex::Aspect)
                    .col(MetadataIndex::Path)
                    .col(MetadataIndex::Stringval)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;
    }
    Ok(())
}

fn build_stmt<S: QueryStatementWriter>(
    backend: DatabaseBackend,
    stmt: &S,
) -> (String, sea_orm_migration::sea_query::Values) {
    match backend {
        DatabaseBackend::Sqlite => stmt.build(SqliteQueryBuilder),
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        DatabaseBackend::MySql => stmt.build(MysqlQueryBuilder),
    }
}

fn urn_col(col: impl Iden + 'static) -> ColumnDef {
    ColumnDef::new(col).string_len(500).not_null().to_owned()
}
