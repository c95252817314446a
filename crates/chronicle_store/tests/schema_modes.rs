use chronicle_store::{
    AppliedVersion, AspectKey, AspectReadApi, AspectSpec, AspectValue, AspectWriteApi, AuditStamp,
    BackfillApi, BackfillMode, ChronicleConfig, ChronicleError, ChronicleResult, ChronicleStore,
    Condition, EntityTypeSpec, FieldDef, FieldType, IndexCriterion, IndexFilter,
    IndexGroupByCriterion, IndexQueryApi, IndexValue, PageRequest, RecordSchema, Registry,
    ScalarKind, SchemaMode, Urn,
};
use sea_orm::{ConnectionTrait, Statement};
use serde_json::json;
use tempfile::tempdir;

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
            .indexed("/name")
            .indexed("/age")
            .indexed("/tags"),
        )
        .aspect(
            AspectSpec::new(
                "status",
                RecordSchema::new(vec![FieldDef::required("state", FieldType::String)]),
            )
            .indexed("/state"),
        )
        .aspect(
            AspectSpec::new(
                "metric",
                RecordSchema::new(vec![
                    FieldDef::optional("score", FieldType::Double),
                    FieldDef::optional("count", FieldType::Long),
                ]),
            )
            .indexed("/score")
            .indexed("/count"),
        )
        .entity(
            EntityTypeSpec::new("foo")
                .key_field("id", ScalarKind::String)
                .aspect("profile")
                .aspect("status"),
        )
        .entity(
            EntityTypeSpec::new("gauge")
                .key_field("id", ScalarKind::Long)
                .aspect("metric"),
        )
        .build()
        .expect("registry")
}

fn config(base: &std::path::Path, mode: SchemaMode) -> ChronicleConfig {
    let mut config = ChronicleConfig::default_sqlite(base.join("store.sqlite").to_string_lossy());
    config.schema_mode = Some(mode);
    config.dual_read_compare = Some(true);
    config
}

fn profile(name: &str, age: i64) -> AspectValue {
    AspectValue::new("profile", json!({ "name": name, "age": age, "tags": ["a"] }))
}

fn foo(id: &str) -> Urn {
    Urn::simple("foo", id).expect("urn")
}

async fn count_entity_rows(store: &ChronicleStore, predicate: &str) -> ChronicleResult<i64> {
    let conn = store.connection();
    let row = conn
        .query_one(Statement::from_string(
            conn.get_database_backend(),
            format!("SELECT COUNT(*) AS n FROM metadata_entity_foo WHERE {predicate}"),
        ))
        .await?
        .expect("count row");
    Ok(row.try_get::<i64>("", "n")?)
}

#[tokio::test]
async fn entity_mode_keeps_only_the_latest_value() -> ChronicleResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let store =
        ChronicleStore::connect(&config(base, SchemaMode::EntityTable), base, registry()).await?;
    let urn = foo("1");
    let key = AspectKey::latest(urn.clone(), "profile");

    assert_eq!(
        store.add(&urn, profile("ada", 1), AuditStamp::default()).await?,
        AppliedVersion::Inserted
    );
    assert_eq!(
        store.add(&urn, profile("ada", 2), AuditStamp::default()).await?,
        AppliedVersion::Replaced { displaced_to: 0 }
    );
    assert_eq!(store.get(&key).await?, Some(profile("ada", 2)));
    assert!(store.exists(&urn).await?);

    let err = store
        .get(&AspectKey::new(urn.clone(), "profile", 1))
        .await
        .expect_err("no history");
    assert!(matches!(err, ChronicleError::UnsupportedInSchemaMode { .. }));
    let err = store
        .list_versions("profile", &urn, 0, 10)
        .await
        .expect_err("no history");
    assert!(matches!(err, ChronicleError::UnsupportedInSchemaMode { .. }));
    let err = store
        .get_many(&[AspectKey::new(urn.clone(), "profile", 1)])
        .await
        .expect_err("no history");
    assert!(matches!(err, ChronicleError::UnsupportedInSchemaMode { .. }));

    let batch = store.get_many(&[key.clone()]).await?;
    assert_eq!(batch.get(&key), Some(&profile("ada", 2)));

    store.delete(&urn, "profile", AuditStamp::default()).await?;
    assert_eq!(store.get(&key).await?, None);
    assert!(!store.exists(&urn).await?);
    assert_eq!(
        store.delete(&urn, "profile", AuditStamp::default()).await?,
        AppliedVersion::Unchanged
    );
    Ok(())
}

#[tokio::test]
async fn entity_mode_queries_use_generated_columns() -> ChronicleResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let store =
        ChronicleStore::connect(&config(base, SchemaMode::EntityTable), base, registry()).await?;
    for (id, age, state) in [("a", 30, "active"), ("b", 45, "active"), ("c", 60, "retired")] {
        store
            .add(&foo(id), profile(id, age), AuditStamp::default())
            .await?;
        store
            .add(
                &foo(id),
                AspectValue::new("status", json!({ "state": state })),
                AuditStamp::default(),
            )
            .await?;
    }

    let younger = IndexFilter::new(vec![IndexCriterion::path(
        "profile",
        "/age",
        Condition::LessThan,
        IndexValue::Long(50),
    )]);
    let page = store
        .list_urns("foo", &younger, None, &PageRequest::offset(0, 10))
        .await?;
    assert_eq!(page.values, vec![foo("a"), foo("b")]);
    assert_eq!(page.total_count, 2);

    let groups = store
        .count_aggregate(
            "foo",
            &IndexFilter::new(vec![IndexCriterion::has_aspect("profile")]),
            &IndexGroupByCriterion {
                aspect_type: "status".to_string(),
                path: "/state".to_string(),
            },
        )
        .await?;
    assert_eq!(groups.get("active"), Some(&2));
    assert_eq!(groups.get("retired"), Some(&1));

    let by_tag = IndexFilter::new(vec![IndexCriterion::path(
        "profile",
        "/tags",
        Condition::Equal,
        IndexValue::string("a"),
    )]);
    let err = store
        .list_urns("foo", &by_tag, None, &PageRequest::offset(0, 10))
        .await
        .expect_err("array paths need the index table");
    assert!(matches!(err, ChronicleError::UnsupportedInSchemaMode { .. }));
    Ok(())
}

#[tokio::test]
async fn dual_mode_writes_both_layouts_and_reads_history() -> ChronicleResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let store = ChronicleStore::connect(&config(base, SchemaMode::Dual), base, registry()).await?;
    let urn = foo("1");
    let key = AspectKey::latest(urn.clone(), "profile");

    store.add(&urn, profile("ada", 1), AuditStamp::default()).await?;
    store.add(&urn, profile("ada", 2), AuditStamp::default()).await?;
    assert_eq!(count_entity_rows(&store, "a_profile IS NOT NULL").await?, 1);
    assert_eq!(store.list_versions("profile", &urn, 0, 10).await?.values, vec![0, 1]);

    // The mirrored cell decodes to the history value when read through the entity layout.
    let entity_store =
        ChronicleStore::connect(&config(base, SchemaMode::EntityTable), base, registry()).await?;
    let mirrored = entity_store.get(&key).await?;
    assert_eq!(mirrored, Some(profile("ada", 2)));
    assert_eq!(mirrored, store.get(&key).await?);
    let current_age = IndexFilter::new(vec![IndexCriterion::path(
        "profile",
        "/age",
        Condition::Equal,
        IndexValue::Long(2),
    )]);
    let found = entity_store
        .list_urns("foo", &current_age, None, &PageRequest::offset(0, 10))
        .await?;
    assert_eq!(found.values, vec![urn.clone()]);
    drop(entity_store);

    // A diverged entity table is only reported; reads still come from history.
    store
        .connection()
        .execute_unprepared("UPDATE metadata_entity_foo SET a_profile = NULL")
        .await?;
    assert_eq!(store.get(&key).await?, Some(profile("ada", 2)));

    store.delete(&urn, "profile", AuditStamp::default()).await?;
    assert_eq!(store.get(&key).await?, None);
    Ok(())
}

#[tokio::test]
async fn backfill_populates_new_entity_tables_from_history() -> ChronicleResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let history =
        ChronicleStore::connect(&config(base, SchemaMode::HistoryTable), base, registry()).await?;
    history
        .add(&foo("1"), profile("ada", 1), AuditStamp::default())
        .await?;
    history
        .add(&foo("2"), profile("bob", 2), AuditStamp::default())
        .await?;
    history
        .add(
            &foo("2"),
            AspectValue::new("status", json!({ "state": "active" })),
            AuditStamp::default(),
        )
        .await?;
    let err = history
        .backfill(BackfillMode::EntityTable, &[foo("1")], &[])
        .await
        .expect_err("no entity tables");
    assert!(matches!(err, ChronicleError::UnsupportedInSchemaMode { .. }));
    drop(history);

    let dual = ChronicleStore::connect(&config(base, SchemaMode::Dual), base, registry()).await?;
    assert_eq!(count_entity_rows(&dual, "1 = 1").await?, 0);
    let done = dual
        .backfill(BackfillMode::All, &[foo("1"), foo("2"), foo("3")], &[])
        .await?;
    assert_eq!(done.len(), 2);
    assert_eq!(
        done.get(&foo("2")),
        Some(&vec!["profile".to_string(), "status".to_string()])
    );
    assert_eq!(count_entity_rows(&dual, "a_profile IS NOT NULL").await?, 2);
    assert_eq!(count_entity_rows(&dual, "a_status IS NOT NULL").await?, 1);
    Ok(())
}

#[tokio::test]
async fn numeric_filters_agree_across_layouts() -> ChronicleResult<()> {
    for mode in [SchemaMode::HistoryTable, SchemaMode::EntityTable] {
        let dir = tempdir().expect("tempdir");
        let base = dir.path();
        let store = ChronicleStore::connect(&config(base, mode), base, registry()).await?;
        let gauge = Urn::simple("gauge", "1")?;
        store
            .add(
                &gauge,
                AspectValue::new("metric", json!({ "score": 5.5, "count": 7 })),
                AuditStamp::default(),
            )
            .await?;
        let page = PageRequest::offset(0, 10);

        let above = IndexFilter::new(vec![IndexCriterion::path(
            "metric",
            "/score",
            Condition::GreaterThan,
            IndexValue::Long(3),
        )]);
        let found = store.list_urns("gauge", &above, None, &page).await?;
        assert_eq!(found.values, vec![gauge.clone()], "{mode:?}");

        let exact = IndexFilter::new(vec![IndexCriterion::path(
            "metric",
            "/count",
            Condition::Equal,
            IndexValue::Double(7.0),
        )]);
        let found = store.list_urns("gauge", &exact, None, &page).await?;
        assert_eq!(found.values, vec![gauge.clone()], "{mode:?}");

        let by_key = IndexFilter::new(vec![IndexCriterion::path(
            "urn.gauge",
            "/id",
            Condition::In,
            IndexValue::Array(vec![IndexValue::Double(1.0), IndexValue::Double(2.0)]),
        )]);
        let found = store.list_urns("gauge", &by_key, None, &page).await?;
        assert_eq!(found.values, vec![gauge.clone()], "{mode:?}");

        let fractional = IndexFilter::new(vec![IndexCriterion::path(
            "metric",
            "/count",
            Condition::Equal,
            IndexValue::Double(7.5),
        )]);
        let err = store
            .list_urns("gauge", &fractional, None, &page)
            .await
            .expect_err("not a long");
        assert!(matches!(err, ChronicleError::Validation { .. }), "{mode:?}");

        let text = IndexFilter::new(vec![IndexCriterion::path(
            "metric",
            "/score",
            Condition::Equal,
            IndexValue::string("5.5"),
        )]);
        let err = store
            .list_urns("gauge", &text, None, &page)
            .await
            .expect_err("not a number");
        assert!(matches!(err, ChronicleError::Validation { .. }), "{mode:?}");
    }
    Ok(())
}

#[tokio::test]
async fn mistyped_key_parts_are_rejected_in_every_layout() -> ChronicleResult<()> {
    for mode in [SchemaMode::HistoryTable, SchemaMode::EntityTable, SchemaMode::Dual] {
        let dir = tempdir().expect("tempdir");
        let base = dir.path();
        let store = ChronicleStore::connect(&config(base, mode), base, registry()).await?;
        let mistyped = Urn::simple("gauge", "abc")?;
        let err = store
            .add(
                &mistyped,
                AspectValue::new("metric", json!({ "count": 1 })),
                AuditStamp::default(),
            )
            .await
            .expect_err("key is not a long");
        assert!(matches!(err, ChronicleError::Validation { .. }), "{mode:?}");
        assert!(!store.exists(&Urn::simple("gauge", "12")?).await?);
        let err = store.exists(&mistyped).await.expect_err("key is not a long");
        assert!(matches!(err, ChronicleError::Validation { .. }), "{mode:?}");
    }
    Ok(())
}
