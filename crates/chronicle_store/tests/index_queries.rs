use chronicle_store::{
    AspectSpec, AspectValue, AspectWriteApi, AuditStamp, ChronicleConfig, ChronicleError,
    ChronicleResult, ChronicleStore, Condition, EntityTypeSpec, FieldDef, FieldType, IndexConfig,
    IndexCriterion, IndexFilter, IndexGroupByCriterion, IndexQueryApi, IndexSortCriterion,
    IndexValue, PageRequest, RecordSchema, Registry, ScalarKind, SortOrder, Urn,
};
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
                    FieldDef::optional("active", FieldType::Boolean),
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
        .entity(
            EntityTypeSpec::new("foo")
                .key_field("id", ScalarKind::String)
                .aspect("profile")
                .aspect("status"),
        )
        .build()
        .expect("registry")
}

async fn open(base: &std::path::Path) -> ChronicleResult<ChronicleStore> {
    let config = ChronicleConfig::default_sqlite(base.join("store.sqlite").to_string_lossy());
    ChronicleStore::connect(&config, base, registry()).await
}

fn foo(id: impl ToString) -> Urn {
    Urn::simple("foo", id.to_string()).expect("urn")
}

fn state(value: &str) -> AspectValue {
    AspectValue::new("status", json!({ "state": value }))
}

fn state_is(value: &str) -> IndexFilter {
    IndexFilter::new(vec![IndexCriterion::path(
        "status",
        "/state",
        Condition::Equal,
        IndexValue::string(value),
    )])
}

async fn seed_people(store: &ChronicleStore) -> ChronicleResult<()> {
    let people = [
        ("ada", 36, json!(["rust", "math"]), "active"),
        ("bob", 20, json!(["go"]), "active"),
        ("cy", 50, json!(["rust"]), "retired"),
    ];
    for (name, age, tags, status) in people {
        let urn = foo(name);
        store
            .add(
                &urn,
                AspectValue::new(
                    "profile",
                    json!({ "name": name, "age": age, "tags": tags, "active": true }),
                ),
                AuditStamp::default(),
            )
            .await?;
        store.add(&urn, state(status), AuditStamp::default()).await?;
    }
    Ok(())
}

fn ids(urns: &[Urn]) -> Vec<String> {
    urns.iter().map(Urn::entity_key).collect()
}

#[tokio::test]
async fn offset_pages_report_totals() -> ChronicleResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    for id in 0..25 {
        store.add(&foo(id), state("active"), AuditStamp::default()).await?;
    }
    store.add(&foo("x"), state("retired"), AuditStamp::default()).await?;

    let page = store
        .list_urns("foo", &state_is("active"), None, &PageRequest::offset(5, 5))
        .await?;
    assert_eq!(page.values.len(), 5);
    assert_eq!(page.next_start, Some(10));
    assert_eq!(page.total_count, 25);
    assert_eq!(page.total_page_count, 5);
    assert!(page.has_more);

    let past_end = store
        .list_urns("foo", &state_is("active"), None, &PageRequest::offset(30, 5))
        .await?;
    assert!(past_end.values.is_empty());
    assert_eq!(past_end.total_count, 25);
    assert_eq!(past_end.next_start, None);
    Ok(())
}

#[tokio::test]
async fn cursor_pages_resume_after_the_last_urn() -> ChronicleResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    for id in 30..40 {
        store.add(&foo(id), state("active"), AuditStamp::default()).await?;
    }

    let filter = IndexFilter::new(vec![IndexCriterion::has_aspect("status")]);
    let first = store
        .list_urns("foo", &filter, None, &PageRequest::cursor(Some(foo(29)), 5))
        .await?;
    assert_eq!(ids(&first.values), vec!["30", "31", "32", "33", "34"]);
    assert!(first.has_more);
    assert_eq!(first.next_cursor, Some(foo(34)));

    let second = store
        .list_urns("foo", &filter, None, &PageRequest::cursor(first.next_cursor, 5))
        .await?;
    assert_eq!(ids(&second.values), vec!["35", "36", "37", "38", "39"]);
    assert!(!second.has_more);
    assert_eq!(second.next_cursor, None);
    Ok(())
}

#[tokio::test]
async fn criteria_combine_across_aspects_and_paths() -> ChronicleResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    seed_people(&store).await?;
    let page = PageRequest::offset(0, 10);

    let prefix = IndexFilter::new(vec![IndexCriterion::path(
        "profile",
        "/name",
        Condition::StartWith,
        IndexValue::string("b"),
    )]);
    let found = store.list_urns("foo", &prefix, None, &page).await?;
    assert_eq!(ids(&found.values), vec!["bob"]);

    let ages = IndexFilter::new(vec![
        IndexCriterion::path(
            "profile",
            "/age",
            Condition::In,
            IndexValue::Array(vec![IndexValue::Long(20), IndexValue::Long(50)]),
        ),
        IndexCriterion::path(
            "status",
            "/state",
            Condition::Equal,
            IndexValue::string("active"),
        ),
    ]);
    let found = store.list_urns("foo", &ages, None, &page).await?;
    assert_eq!(ids(&found.values), vec!["bob"]);

    let tagged = IndexFilter::new(vec![IndexCriterion::path(
        "profile",
        "/tags",
        Condition::Equal,
        IndexValue::string("rust"),
    )]);
    let found = store.list_urns("foo", &tagged, None, &page).await?;
    assert_eq!(ids(&found.values), vec!["ada", "cy"]);
    assert_eq!(found.total_count, 2);

    let by_key = IndexFilter::new(vec![IndexCriterion::path(
        "urn.foo",
        "/id",
        Condition::Equal,
        IndexValue::string("cy"),
    )]);
    let found = store.list_urns("foo", &by_key, None, &page).await?;
    assert_eq!(ids(&found.values), vec!["cy"]);
    Ok(())
}

#[tokio::test]
async fn sort_orders_by_the_indexed_value() -> ChronicleResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    seed_people(&store).await?;
    let filter = IndexFilter::new(vec![IndexCriterion::has_aspect("profile")]);
    let sort = IndexSortCriterion {
        aspect_type: "profile".to_string(),
        path: "/age".to_string(),
        order: SortOrder::Descending,
    };
    let found = store
        .list_urns("foo", &filter, Some(&sort), &PageRequest::offset(0, 10))
        .await?;
    assert_eq!(ids(&found.values), vec!["cy", "ada", "bob"]);
    Ok(())
}

#[tokio::test]
async fn count_aggregate_groups_matching_urns() -> ChronicleResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    seed_people(&store).await?;
    let filter = IndexFilter::new(vec![IndexCriterion::has_aspect("profile")]);

    let groups = store
        .count_aggregate(
            "foo",
            &filter,
            &IndexGroupByCriterion {
                aspect_type: "status".to_string(),
                path: "/state".to_string(),
            },
        )
        .await?;
    assert_eq!(groups.get("active"), Some(&2));
    assert_eq!(groups.get("retired"), Some(&1));

    let unindexed = store
        .count_aggregate(
            "foo",
            &filter,
            &IndexGroupByCriterion {
                aspect_type: "profile".to_string(),
                path: "/active".to_string(),
            },
        )
        .await?;
    assert!(unindexed.is_empty());
    Ok(())
}

#[tokio::test]
async fn deletes_and_updates_refresh_the_index() -> ChronicleResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    seed_people(&store).await?;
    let page = PageRequest::offset(0, 10);

    store
        .delete(&foo("bob"), "status", AuditStamp::default())
        .await?;
    store
        .add(&foo("cy"), state("active"), AuditStamp::default())
        .await?;
    let found = store
        .list_urns("foo", &state_is("active"), None, &page)
        .await?;
    assert_eq!(ids(&found.values), vec!["ada", "cy"]);
    let found = store
        .list_urns("foo", &state_is("retired"), None, &page)
        .await?;
    assert!(found.values.is_empty());
    Ok(())
}

#[tokio::test]
async fn malformed_filters_are_rejected() -> ChronicleResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path()).await?;
    let page = PageRequest::offset(0, 10);

    let scalar_in = IndexFilter::new(vec![IndexCriterion::path(
        "profile",
        "/age",
        Condition::In,
        IndexValue::Long(3),
    )]);
    let err = store
        .list_urns("foo", &scalar_in, None, &page)
        .await
        .expect_err("IN needs a list");
    assert!(matches!(err, ChronicleError::Validation { .. }));

    let too_many = IndexFilter::new(
        (0..11)
            .map(|age| {
                IndexCriterion::path("profile", "/age", Condition::GreaterThan, IndexValue::Long(age))
            })
            .collect(),
    );
    let err = store
        .list_urns("foo", &too_many, None, &page)
        .await
        .expect_err("criteria limit");
    assert!(matches!(err, ChronicleError::Validation { .. }));

    let unknown = IndexFilter::new(vec![IndexCriterion::has_aspect("ownership")]);
    let err = store
        .list_urns("foo", &unknown, None, &page)
        .await
        .expect_err("unknown aspect");
    assert!(matches!(err, ChronicleError::Validation { .. }));
    Ok(())
}

#[tokio::test]
async fn disabled_index_refuses_queries() -> ChronicleResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let mut config = ChronicleConfig::default_sqlite(base.join("store.sqlite").to_string_lossy());
    config.index = Some(IndexConfig {
        enabled: Some(false),
        query_timeout_ms: None,
        max_criteria: None,
    });
    let store = ChronicleStore::connect(&config, base, registry()).await?;
    store.add(&foo(1), state("active"), AuditStamp::default()).await?;
    let err = store
        .list_urns("foo", &state_is("active"), None, &PageRequest::offset(0, 10))
        .await
        .expect_err("index disabled");
    assert!(matches!(err, ChronicleError::Validation { .. }));
    Ok(())
}
