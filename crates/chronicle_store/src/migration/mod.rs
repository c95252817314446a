use sea_orm_migration::prelude::*;

mod m20250301_000001_init;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20250301_000001_init::Migration)]
    }
}

#[cfg(test)]
mod tests {
    use super::Migrator;
    use crate::{ChronicleConfig, ChronicleStore, EntityTypeSpec, Registry, ScalarKind};
    use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};
    use sea_orm_migration::MigratorTrait;
    use tempfile::tempdir;

    async fn core_tables(store: &ChronicleStore) -> Vec<String> {
        let rows = store
            .connection()
            .query_all(Statement::from_string(
                DatabaseBackend::Sqlite,
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name IN \
                 ('metadata_schema_version', 'metadata_aspect', 'metadata_index') ORDER BY name",
            ))
            .await
            .expect("tables");
        rows.iter()
            .map(|row| row.try_get::<String>("", "name").expect("name"))
            .collect()
    }

    #[tokio::test]
    async fn init_migration_rolls_back_cleanly() {
        let dir = tempdir().expect("tempdir");
        let base = dir.path();
        let config = ChronicleConfig::default_sqlite(base.join("store.sqlite").to_string_lossy());
        let registry = Registry::builder()
            .entity(EntityTypeSpec::new("foo").key_field("id", ScalarKind::String))
            .build()
            .expect("registry");
        let store = ChronicleStore::connect(&config, base, registry)
            .await
            .expect("store");
        assert_eq!(core_tables(&store).await.len(), 3);

        Migrator::down(store.connection(), None).await.expect("down");
        assert!(core_tables(&store).await.is_empty());

        Migrator::up(store.connection(), None).await.expect("up again");
        assert_eq!(core_tables(&store).await.len(), 3);
    }
}
