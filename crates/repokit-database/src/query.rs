//! Query composition.
//!
//! A [`Query`] is a lazily evaluated view over one entity table. The
//! `apply_*` methods refine it without executing anything; repositories
//! execute the finished view. [`Query::compose`] applies includes, then
//! the filter, then the order, which is the sequence every read uses.

use std::marker::PhantomData;

use repokit_core::error::AppError;
use repokit_core::result::AppResult;
use repokit_core::traits::context::{IncludeNode, QuerySpec};
use repokit_core::traits::entity::{Entity, Relation};
use repokit_core::types::{Filter, Include, PageWindow, SortField};

/// A composable, unexecuted query over entities of type `T`.
#[derive(Debug)]
pub struct Query<T> {
    spec: QuerySpec,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            spec: self.spec.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> Default for Query<T> {
    fn default() -> Self {
        Self::all()
    }
}

impl<T: Entity> Query<T> {
    /// The base view: every row of `T`'s table in store-defined order.
    pub fn all() -> Self {
        let mut spec = QuerySpec::new(T::TABLE);
        spec.key_field = T::key_spec().map(|k| k.field());
        Self {
            spec,
            _entity: PhantomData,
        }
    }

    /// Apply includes, then the filter, then the order.
    pub fn compose(
        self,
        filter: Option<Filter>,
        order: &[SortField],
        includes: &[Include],
    ) -> AppResult<Self> {
        self.apply_includes(includes)?
            .apply_filter(filter)?
            .apply_order(order)
    }

    /// Attach related entities for each include path.
    ///
    /// Paths sharing a prefix load the shared relations once. Fails with
    /// `InvalidArgument` when a path names an unknown relation.
    pub fn apply_includes(mut self, includes: &[Include]) -> AppResult<Self> {
        for include in includes {
            let segments = include.segments()?;
            merge_path(&mut self.spec.includes, T::relations(), &segments, include)?;
        }
        Ok(self)
    }

    /// Narrow the view to rows satisfying `filter`. An existing filter is
    /// kept and combined with AND.
    pub fn apply_filter(mut self, filter: Option<Filter>) -> AppResult<Self> {
        let Some(filter) = filter else {
            return Ok(self);
        };
        filter.validate()?;
        self.spec.filter = Some(match self.spec.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        Ok(self)
    }

    /// Replace the output order. An empty slice keeps the current order.
    pub fn apply_order(mut self, order: &[SortField]) -> AppResult<Self> {
        if order.is_empty() {
            return Ok(self);
        }
        for field in order {
            field.validate()?;
        }
        self.spec.order = order.to_vec();
        Ok(self)
    }

    /// Restrict the view to one page.
    ///
    /// With both parts, page `index` of `size` items; with only a size,
    /// the first `size` items. Fails with `InvalidArgument` for a
    /// non-positive size or a negative index.
    pub fn apply_page(self, page_index: Option<i64>, page_size: Option<i64>) -> AppResult<Self> {
        match PageWindow::from_parts(page_index, page_size)? {
            Some(window) => Ok(self.apply_window(window)),
            None => Ok(self),
        }
    }

    /// Restrict the view to an already validated window.
    pub fn apply_window(mut self, window: PageWindow) -> Self {
        self.spec.offset = (window.offset() > 0).then(|| window.offset());
        self.spec.limit = Some(window.limit());
        self
    }

    /// The same view without any offset or limit.
    pub fn unpaged(mut self) -> Self {
        self.spec.offset = None;
        self.spec.limit = None;
        self
    }

    /// The executable description of this view.
    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }
}

fn merge_path(
    nodes: &mut Vec<IncludeNode>,
    available: Vec<Relation>,
    segments: &[&str],
    include: &Include,
) -> AppResult<()> {
    let Some((first, rest)) = segments.split_first() else {
        return Ok(());
    };

    let position = match nodes.iter().position(|n| n.relation.name == *first) {
        Some(position) => position,
        None => {
            let relation = available
                .into_iter()
                .find(|r| r.name == *first)
                .ok_or_else(|| {
                    AppError::invalid_argument(format!(
                        "unknown relation '{first}' in include path '{}'",
                        include.path()
                    ))
                })?;
            nodes.push(IncludeNode {
                relation,
                children: Vec::new(),
            });
            nodes.len() - 1
        }
    };

    let node = &mut nodes[position];
    let nested = node.relation.nested_relations();
    merge_path(&mut node.children, nested, rest, include)
}

#[cfg(test)]
mod tests {
    use repokit_core::error::ErrorKind;
    use repokit_core::traits::entity::KeySpec;
    use repokit_core::types::FilterField;
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Blog {
        id: i64,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Post {
        id: i64,
        blog_id: i64,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Comment {
        id: i64,
        post_id: i64,
    }

    impl Entity for Blog {
        const TABLE: &'static str = "blogs";

        fn key_spec() -> Option<KeySpec> {
            Some(KeySpec::of::<i64>("id"))
        }

        fn relations() -> Vec<Relation> {
            vec![Relation::has_many::<Post>("posts", "id", "blog_id")]
        }
    }

    impl Entity for Post {
        const TABLE: &'static str = "posts";

        fn relations() -> Vec<Relation> {
            vec![
                Relation::has_many::<Comment>("comments", "id", "post_id"),
                Relation::belongs_to::<Blog>("blog", "blog_id", "id"),
            ]
        }
    }

    impl Entity for Comment {
        const TABLE: &'static str = "comments";
    }

    #[test]
    fn test_base_view_is_unrefined() {
        let query = Query::<Blog>::all();
        let spec = query.spec();
        assert_eq!(spec.table, "blogs");
        assert_eq!(spec.key_field, Some("id"));
        assert!(spec.filter.is_none());
        assert!(spec.order.is_empty());
        assert!(spec.includes.is_empty());
        assert!(!spec.is_windowed());
    }

    #[test]
    fn test_absent_refinements_are_identity() {
        let query = Query::<Blog>::all()
            .apply_includes(&[])
            .and_then(|q| q.apply_filter(None))
            .and_then(|q| q.apply_order(&[]))
            .and_then(|q| q.apply_page(None, None))
            .unwrap();
        let spec = query.spec();
        assert!(spec.filter.is_none() && spec.order.is_empty() && spec.includes.is_empty());
        assert!(!spec.is_windowed());
    }

    #[test]
    fn test_includes_merge_shared_prefixes() {
        let query = Query::<Blog>::all()
            .apply_includes(&["posts".into(), "posts.comments".into(), "posts.blog".into()])
            .unwrap();
        let includes = &query.spec().includes;
        assert_eq!(includes.len(), 1);
        assert_eq!(includes[0].relation.name, "posts");
        let children: Vec<_> = includes[0].children.iter().map(|c| c.relation.name).collect();
        assert_eq!(children, vec!["comments", "blog"]);
    }

    #[test]
    fn test_unknown_include_is_rejected() {
        let err = Query::<Blog>::all()
            .apply_includes(&["posts.authors".into()])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_filters_accumulate_with_and() {
        let query = Query::<Post>::all()
            .apply_filter(Some(FilterField::eq("blog_id", 1).into()))
            .and_then(|q| q.apply_filter(Some(FilterField::gt("id", 10).into())))
            .unwrap();
        match query.spec().filter.as_ref() {
            Some(Filter::And(children)) => assert_eq!(children.len(), 2),
            other => panic!("expected AND filter, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_filter_field_is_rejected() {
        let err = Query::<Post>::all()
            .apply_filter(Some(FilterField::eq("id; --", 1).into()))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_order_replaces_previous_order() {
        let query = Query::<Post>::all()
            .apply_order(&[SortField::asc("id")])
            .and_then(|q| q.apply_order(&[SortField::desc("blog_id")]))
            .unwrap();
        assert_eq!(query.spec().order, vec![SortField::desc("blog_id")]);
    }

    #[test]
    fn test_page_window_variants() {
        let paged = Query::<Post>::all().apply_page(Some(2), Some(10)).unwrap();
        assert_eq!(paged.spec().offset, Some(20));
        assert_eq!(paged.spec().limit, Some(10));

        let first = Query::<Post>::all().apply_page(None, Some(5)).unwrap();
        assert_eq!(first.spec().offset, None);
        assert_eq!(first.spec().limit, Some(5));

        let unpaged = paged.unpaged();
        assert!(!unpaged.spec().is_windowed());
    }

    #[test]
    fn test_page_validation() {
        for (index, size) in [(Some(0), Some(0)), (Some(-1), Some(10)), (None, Some(-3))] {
            let err = Query::<Post>::all().apply_page(index, size).unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidArgument);
        }
    }

    #[test]
    fn test_compose_applies_every_refinement() {
        let query = Query::<Blog>::all()
            .compose(
                Some(FilterField::gte("id", 3).into()),
                &[SortField::desc("id")],
                &["posts".into()],
            )
            .unwrap();
        let spec = query.spec();
        assert!(spec.filter.is_some());
        assert_eq!(spec.order.len(), 1);
        assert_eq!(spec.includes.len(), 1);
        assert!(!spec.is_windowed());
    }
}
