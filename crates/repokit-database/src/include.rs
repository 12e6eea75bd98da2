//! Eager loading of related entities.
//!
//! Each include level is loaded with one extra query per relation, keyed
//! on the distinct local values of the owner rows. Related rows are
//! attached to their owners under the relation name before the owners
//! are deserialized.

use std::collections::{HashMap, HashSet};

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;

use repokit_core::result::AppResult;
use repokit_core::traits::context::{IncludeNode, PersistenceContext, Row};

use crate::context::key_text;

/// Load every include in `nodes` into `rows`, recursing into nested
/// includes.
pub fn load_includes<'a, C>(
    context: &'a C,
    rows: &'a mut [Row],
    nodes: &'a [IncludeNode],
) -> BoxFuture<'a, AppResult<()>>
where
    C: PersistenceContext + ?Sized,
{
    async move {
        for node in nodes {
            load_relation(context, rows, node).await?;
        }
        Ok(())
    }
    .boxed()
}

async fn load_relation<C>(context: &C, rows: &mut [Row], node: &IncludeNode) -> AppResult<()>
where
    C: PersistenceContext + ?Sized,
{
    let relation = &node.relation;

    let mut seen = HashSet::new();
    let keys: Vec<Value> = rows
        .iter()
        .filter_map(|row| row.get(relation.local_field))
        .filter(|value| key_text(value).is_some_and(|k| seen.insert(k)))
        .cloned()
        .collect();

    let mut related = if keys.is_empty() {
        Vec::new()
    } else {
        context.fetch_related(relation, &keys).await?
    };

    if !node.children.is_empty() && !related.is_empty() {
        load_includes(context, &mut related, &node.children).await?;
    }

    let mut grouped: HashMap<String, Vec<Value>> = HashMap::new();
    for row in related {
        if let Some(key) = row.get(relation.foreign_field).and_then(key_text) {
            grouped.entry(key).or_default().push(Value::Object(row));
        }
    }

    for row in rows.iter_mut() {
        let matched = row
            .get(relation.local_field)
            .and_then(key_text)
            .and_then(|k| grouped.get(&k));
        let attached = if relation.kind.is_collection() {
            Value::Array(matched.cloned().unwrap_or_default())
        } else {
            matched
                .and_then(|values| values.first().cloned())
                .unwrap_or(Value::Null)
        };
        row.insert(relation.name.to_string(), attached);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use repokit_core::traits::entity::{Entity, Relation};

    use super::*;
    use crate::context::memory::MemoryStore;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Author {
        id: i64,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Book {
        id: i64,
        author_id: Option<i64>,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Review {
        id: i64,
        book_id: i64,
    }

    impl Entity for Author {
        const TABLE: &'static str = "authors";

        fn relations() -> Vec<Relation> {
            vec![Relation::has_many::<Book>("books", "id", "author_id")]
        }
    }

    impl Entity for Book {
        const TABLE: &'static str = "books";

        fn relations() -> Vec<Relation> {
            vec![
                Relation::belongs_to::<Author>("author", "author_id", "id"),
                Relation::has_many::<Review>("reviews", "id", "book_id"),
            ]
        }
    }

    impl Entity for Review {
        const TABLE: &'static str = "reviews";
    }

    fn rows(value: Value) -> Vec<Row> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    fn node(relation: Relation, children: Vec<IncludeNode>) -> IncludeNode {
        IncludeNode { relation, children }
    }

    fn seeded() -> std::sync::Arc<MemoryStore> {
        let store = MemoryStore::new();
        store.seed("authors", rows(json!([{"id": 1}, {"id": 2}])));
        store.seed(
            "books",
            rows(json!([
                {"id": 10, "author_id": 1},
                {"id": 11, "author_id": 1},
                {"id": 12, "author_id": null}
            ])),
        );
        store.seed("reviews", rows(json!([{"id": 100, "book_id": 11}])));
        store
    }

    #[tokio::test]
    async fn test_collection_relation_attaches_arrays() {
        let store = seeded();
        let ctx = store.open_context();
        let mut authors = store.rows("authors");
        let includes = vec![node(Author::relations().remove(0), vec![])];

        load_includes(&ctx, &mut authors, &includes).await.unwrap();

        assert_eq!(authors[0]["books"].as_array().unwrap().len(), 2);
        assert_eq!(authors[1]["books"], json!([]));
    }

    #[tokio::test]
    async fn test_reference_relation_attaches_object_or_null() {
        let store = seeded();
        let ctx = store.open_context();
        let mut books = store.rows("books");
        let includes = vec![node(Book::relations().remove(0), vec![])];

        load_includes(&ctx, &mut books, &includes).await.unwrap();

        assert_eq!(books[0]["author"], json!({"id": 1}));
        assert_eq!(books[2]["author"], Value::Null);
    }

    #[tokio::test]
    async fn test_nested_includes_load_through_parents() {
        let store = seeded();
        let ctx = store.open_context();
        let mut authors = store.rows("authors");
        let books = Author::relations().remove(0);
        let reviews = Book::relations().remove(1);
        let includes = vec![node(books, vec![node(reviews, vec![])])];

        load_includes(&ctx, &mut authors, &includes).await.unwrap();

        let loaded = authors[0]["books"].as_array().unwrap();
        let second = loaded.iter().find(|b| b["id"] == json!(11)).unwrap();
        assert_eq!(second["reviews"], json!([{"id": 100, "book_id": 11}]));
        let first = loaded.iter().find(|b| b["id"] == json!(10)).unwrap();
        assert_eq!(first["reviews"], json!([]));
    }
}
