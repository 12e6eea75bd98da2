//! Shared fixtures for repository integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use repokit_core::result::AppResult;
use repokit_core::traits::context::{Mutation, PersistenceContext, QuerySpec, Row};
use repokit_core::traits::entity::{Entity, HasKey, KeySpec, Relation};
use repokit_database::{MemoryContext, MemoryStore, RepositoryManager, RepositoryServices};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Blog {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub posts: Vec<Post>,
}

impl Entity for Blog {
    const TABLE: &'static str = "blogs";

    fn key_spec() -> Option<KeySpec> {
        Some(Self::declared_key())
    }

    fn relations() -> Vec<Relation> {
        vec![Relation::has_many::<Post>("posts", "id", "blog_id")]
    }
}

impl HasKey<i64> for Blog {
    fn key(&self) -> &i64 {
        &self.id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub blog_id: i64,
    pub title: String,
    pub rating: Option<i64>,
    #[serde(default)]
    pub blog: Option<Box<Blog>>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl Entity for Post {
    const TABLE: &'static str = "posts";

    fn key_spec() -> Option<KeySpec> {
        Some(Self::declared_key())
    }

    fn relations() -> Vec<Relation> {
        vec![
            Relation::belongs_to::<Blog>("blog", "blog_id", "id"),
            Relation::has_many::<Comment>("comments", "id", "post_id"),
        ]
    }
}

impl HasKey<i64> for Post {
    fn key(&self) -> &i64 {
        &self.id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub body: String,
}

impl Entity for Comment {
    const TABLE: &'static str = "comments";

    fn key_spec() -> Option<KeySpec> {
        Some(KeySpec::of::<i64>("id"))
    }
}

/// Keyed by a string rather than an integer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub email: String,
    pub display_name: String,
}

impl Entity for Account {
    const TABLE: &'static str = "accounts";

    fn key_spec() -> Option<KeySpec> {
        Some(Self::declared_key())
    }
}

impl HasKey<String> for Account {
    const KEY_FIELD: &'static str = "email";

    fn key(&self) -> &String {
        &self.email
    }
}

/// No declared key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub message: String,
}

impl Entity for AuditEntry {
    const TABLE: &'static str = "audit_entries";
}

pub fn post(id: i64, blog_id: i64, title: &str) -> Post {
    Post {
        id,
        blog_id,
        title: title.to_string(),
        ..Post::default()
    }
}

pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("fixture row must be an object, got {other}"),
    }
}

/// A memory store plus services over it.
pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub services: RepositoryServices,
}

impl TestApp {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let services = RepositoryServices::from_memory(Arc::clone(&store));
        Self { store, services }
    }

    /// Seed `count` posts in blog 1 with ids `1..=count` and titles
    /// `post-NN`.
    pub fn with_posts(count: i64) -> Self {
        let app = Self::new();
        app.store.seed(
            "blogs",
            [row(serde_json::json!({"id": 1, "name": "engineering"}))],
        );
        app.store.seed(
            "posts",
            (1..=count).map(|i| {
                row(serde_json::json!({
                    "id": i,
                    "blog_id": 1,
                    "title": format!("post-{i:02}"),
                    "rating": i % 5,
                }))
            }),
        );
        app
    }

    pub fn scope(&self) -> RepositoryManager {
        self.services.scope()
    }
}

/// Memory context that counts how many statements it executes.
#[derive(Debug)]
pub struct CountingContext {
    pub inner: MemoryContext,
    pub executed: AtomicUsize,
}

impl CountingContext {
    pub fn new(store: &Arc<MemoryStore>) -> Self {
        Self {
            inner: store.open_context(),
            executed: AtomicUsize::new(0),
        }
    }

    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistenceContext for CountingContext {
    async fn fetch(&self, query: &QuerySpec) -> AppResult<Vec<Row>> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(query).await
    }

    async fn count(&self, query: &QuerySpec) -> AppResult<u64> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        self.inner.count(query).await
    }

    async fn fetch_related(&self, relation: &Relation, keys: &[Value]) -> AppResult<Vec<Row>> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_related(relation, keys).await
    }

    fn stage(&self, mutation: Mutation) {
        self.inner.stage(mutation)
    }

    fn pending_changes(&self) -> usize {
        self.inner.pending_changes()
    }

    fn discard_changes(&self) -> usize {
        self.inner.discard_changes()
    }

    fn track(&self, table: &'static str, key: &Value, row: &Row) {
        self.inner.track(table, key, row)
    }

    fn tracked_count(&self) -> usize {
        self.inner.tracked_count()
    }

    fn tracked(&self, table: &str, key: &Value) -> Option<Row> {
        self.inner.tracked(table, key)
    }

    async fn save_changes(&self) -> AppResult<u64> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        self.inner.save_changes().await
    }
}
