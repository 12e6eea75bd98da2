//! Integration tests against a live PostgreSQL server.
//!
//! Skipped unless `REPOKIT_TEST_DATABASE_URL` points at a database the
//! tests may create tables in.

use serde::{Deserialize, Serialize};

use repokit_core::config::DatabaseConfig;
use repokit_core::error::ErrorKind;
use repokit_core::traits::entity::{Entity, HasKey, KeySpec, Relation};
use repokit_core::traits::repository::ModelRepository;
use repokit_core::types::{FilterField, SortField};
use repokit_database::{DatabasePool, RepositoryServices};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Shelf {
    id: i64,
    label: String,
    #[serde(default)]
    widgets: Vec<Widget>,
}

impl Entity for Shelf {
    const TABLE: &'static str = "repokit_test_shelves";

    fn key_spec() -> Option<KeySpec> {
        Some(Self::declared_key())
    }

    fn relations() -> Vec<Relation> {
        vec![Relation::has_many::<Widget>("widgets", "id", "shelf_id")]
    }
}

impl HasKey<i64> for Shelf {
    fn key(&self) -> &i64 {
        &self.id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Widget {
    id: i64,
    shelf_id: i64,
    name: String,
    weight: Option<f64>,
}

impl Entity for Widget {
    const TABLE: &'static str = "repokit_test_widgets";

    fn key_spec() -> Option<KeySpec> {
        Some(Self::declared_key())
    }
}

impl HasKey<i64> for Widget {
    fn key(&self) -> &i64 {
        &self.id
    }
}

async fn connect() -> Option<DatabasePool> {
    let url = std::env::var("REPOKIT_TEST_DATABASE_URL").ok()?;
    let config = DatabaseConfig {
        url,
        max_connections: 2,
        min_connections: 1,
        ..DatabaseConfig::default()
    };
    let pool = DatabasePool::connect(&config)
        .await
        .expect("Failed to connect to test database");

    for statement in [
        "DROP TABLE IF EXISTS repokit_test_widgets",
        "DROP TABLE IF EXISTS repokit_test_shelves",
        "CREATE TABLE repokit_test_shelves (id BIGSERIAL PRIMARY KEY, label TEXT NOT NULL)",
        "CREATE TABLE repokit_test_widgets (
            id BIGSERIAL PRIMARY KEY,
            shelf_id BIGINT NOT NULL REFERENCES repokit_test_shelves(id),
            name TEXT NOT NULL,
            weight DOUBLE PRECISION
        )",
    ] {
        sqlx::query(statement)
            .execute(pool.pool())
            .await
            .expect("Failed to prepare test tables");
    }
    Some(pool)
}

fn widget(shelf_id: i64, name: &str, weight: Option<f64>) -> Widget {
    Widget {
        id: 0,
        shelf_id,
        name: name.to_string(),
        weight,
    }
}

#[tokio::test]
async fn test_postgres_unit_of_work() {
    let Some(pool) = connect().await else {
        eprintln!("REPOKIT_TEST_DATABASE_URL not set; skipping");
        return;
    };
    let services = RepositoryServices::from_pool(pool.clone());
    services.health_check().await.unwrap();

    // inserts with generated keys
    let scope = services.scope();
    scope.repository::<Shelf>().stage_insert(Shelf {
        id: 1,
        label: "top".to_string(),
        widgets: Vec::new(),
    });
    let staged = scope.repository::<Widget>().stage_insert_many(
        (1..=25)
            .map(|i| widget(1, &format!("w-{i:02}"), (i % 3 != 0).then_some(i as f64)))
            .collect(),
    );
    assert_eq!(scope.commit().await.unwrap(), 26);
    let mut ids: Vec<i64> = staged.iter().map(|w| w.get().id).collect();
    assert!(ids.iter().all(|id| *id > 0));
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 25);

    // paging
    let scope = services.scope();
    let widgets = scope.repository::<Widget>();
    let order = [SortField::asc("name")];
    for (index, expected) in [(0, 10), (2, 5), (3, 0)] {
        let page = widgets.get_paged(10, index, None, &order, &[]).await.unwrap();
        assert_eq!(page.total_count, 25);
        assert_eq!(page.items.len(), expected);
    }
    let err = widgets.get_paged(0, 0, None, &order, &[]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);

    // filters
    let heavy = widgets
        .count(Some(FilterField::gt("weight", 20.0).into()))
        .await
        .unwrap();
    assert_eq!(heavy, 3);
    let unweighted = widgets
        .count(Some(FilterField::is_null("weight").into()))
        .await
        .unwrap();
    assert_eq!(unweighted, 8);
    let named = widgets
        .get_list(
            Some(FilterField::is_in("name", vec!["w-01", "w-02", "nope"]).into()),
            &order,
            &[],
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(named.len(), 2);

    // includes
    let shelf = scope
        .repository::<Shelf>()
        .get_first(None, &["widgets".into()])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(shelf.widgets.len(), 25);

    // round trip, update and remove
    let first = widgets.get_by_id(named[0].id).await.unwrap().unwrap();
    assert_eq!(first, named[0]);
    let mut renamed = first.clone();
    renamed.name = "renamed".to_string();
    widgets.stage_update(renamed);
    widgets.stage_remove(named[1].clone());
    assert_eq!(scope.commit().await.unwrap(), 2);
    assert_eq!(widgets.count(None).await.unwrap(), 24);
    let reloaded = widgets.get_by_id(first.id).await.unwrap().unwrap();
    assert_eq!(reloaded.name, "renamed");

    // a failing statement rolls back the whole batch
    let scope = services.scope();
    let widgets = scope.repository::<Widget>();
    widgets.stage_insert(widget(1, "kept?", None));
    widgets.stage_insert(widget(404, "orphan", None));
    let err = scope.commit().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Store);
    assert!(err.store_source().is_some());
    assert!(scope.has_changes());
    assert_eq!(widgets.count(None).await.unwrap(), 24);

    pool.close().await;
}
