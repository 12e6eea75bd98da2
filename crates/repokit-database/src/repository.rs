//! Generic repository over a persistence context.

use std::marker::PhantomData;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use repokit_core::error::AppError;
use repokit_core::result::AppResult;
use repokit_core::traits::context::{Mutation, MutationKind, PersistenceContext, Staged};
use repokit_core::traits::entity::Entity;
use repokit_core::traits::repository::ModelRepository;
use repokit_core::types::{Filter, FilterField, FilterValue, Include, PageWindow, PagedResult, SortField};

use crate::include::load_includes;
use crate::query::Query;

/// Repository for entities of type `T`, borrowing the context of the
/// [`RepositoryManager`](crate::manager::RepositoryManager) that created
/// it.
///
/// Every read composes a fresh [`Query`], so no state carries over from
/// one call to the next.
pub struct EntityRepository<'ctx, T, C: ?Sized> {
    context: &'ctx C,
    tracking: bool,
    _entity: PhantomData<fn() -> T>,
}

impl<'ctx, T, C> EntityRepository<'ctx, T, C>
where
    T: Entity,
    C: PersistenceContext + ?Sized,
{
    /// Create a repository over `context`.
    ///
    /// With `tracking`, keyed rows returned by reads are recorded in the
    /// context's change tracker.
    pub fn new(context: &'ctx C, tracking: bool) -> Self {
        Self {
            context,
            tracking,
            _entity: PhantomData,
        }
    }

    /// Whether reads record snapshots in the change tracker.
    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// The base view over `T`.
    pub fn query(&self) -> Query<T> {
        Query::all()
    }

    /// Execute a composed query, loading includes and converting rows to
    /// entities.
    pub async fn execute(&self, query: &Query<T>) -> AppResult<Vec<T>> {
        let spec = query.spec();
        let mut rows = self.context.fetch(spec).await?;

        if self.tracking {
            if let Some(key_field) = spec.key_field {
                for row in &rows {
                    if let Some(key) = row.get(key_field) {
                        self.context.track(spec.table, key, row);
                    }
                }
            }
        }

        if !spec.includes.is_empty() && !rows.is_empty() {
            load_includes(self.context, &mut rows, &spec.includes).await?;
        }

        debug!(
            table = spec.table,
            includes = spec.includes.len(),
            offset = ?spec.offset,
            limit = ?spec.limit,
            rows = rows.len(),
            "Executed query"
        );
        rows.into_iter()
            .map(|row| serde_json::from_value(Value::Object(row)).map_err(AppError::from))
            .collect()
    }

    /// Count the rows a composed query would return.
    pub async fn execute_count(&self, query: &Query<T>) -> AppResult<u64> {
        self.context.count(query.spec()).await
    }

    fn stage(&self, kind: MutationKind, entity: T) -> Staged<T> {
        let staged = Staged::new(entity);
        self.context.stage(Mutation::of(kind, &staged));
        staged
    }
}

impl<T, C: ?Sized> std::fmt::Debug for EntityRepository<'_, T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRepository")
            .field("entity", &std::any::type_name::<T>())
            .field("tracking", &self.tracking)
            .finish()
    }
}

#[async_trait]
impl<T, C> ModelRepository<T> for EntityRepository<'_, T, C>
where
    T: Entity,
    C: PersistenceContext + ?Sized,
{
    async fn get_first(
        &self,
        filter: Option<Filter>,
        includes: &[Include],
    ) -> AppResult<Option<T>> {
        let query = self
            .query()
            .compose(filter, &[], includes)?
            .apply_page(None, Some(1))?;
        Ok(self.execute(&query).await?.into_iter().next())
    }

    async fn get_list(
        &self,
        filter: Option<Filter>,
        order: &[SortField],
        includes: &[Include],
        page_index: Option<i64>,
        page_size: Option<i64>,
    ) -> AppResult<Vec<T>> {
        let query = self
            .query()
            .compose(filter, order, includes)?
            .apply_page(page_index, page_size)?;
        self.execute(&query).await
    }

    async fn get_paged(
        &self,
        page_size: i64,
        page_index: i64,
        filter: Option<Filter>,
        order: &[SortField],
        includes: &[Include],
    ) -> AppResult<PagedResult<T>> {
        let window = PageWindow::new(page_index, page_size)?;
        let query = self.query().compose(filter, order, includes)?;

        let total = self.execute_count(&query).await?;
        let items = self.execute(&query.apply_window(window)).await?;

        debug!(
            table = T::TABLE,
            page_index,
            page_size,
            total,
            returned = items.len(),
            "Loaded page"
        );
        Ok(PagedResult::new(window, total, items))
    }

    async fn get_by_key<K>(&self, id: K) -> AppResult<Option<T>>
    where
        K: Into<FilterValue> + Send + 'static,
    {
        let key = T::key_spec().ok_or_else(|| {
            AppError::unsupported(format!(
                "entity type for table '{}' declares no key",
                T::TABLE
            ))
        })?;
        if !key.accepts::<K>() {
            return Err(AppError::unsupported(format!(
                "key of '{}' is {}, not {}",
                T::TABLE,
                key.type_name(),
                std::any::type_name::<K>()
            )));
        }

        let query = self
            .query()
            .apply_filter(Some(FilterField::eq(key.field(), id).into()))?
            .apply_page(None, Some(2))?;
        let mut found = self.execute(&query).await?;
        if found.len() > 1 {
            return Err(AppError::multiple_results(format!(
                "more than one row in '{}' has the requested {}",
                T::TABLE,
                key.field()
            )));
        }
        Ok(found.pop())
    }

    async fn count(&self, filter: Option<Filter>) -> AppResult<u64> {
        let query = self.query().apply_filter(filter)?;
        self.execute_count(&query).await
    }

    fn stage_insert(&self, entity: T) -> Staged<T> {
        self.stage(MutationKind::Insert, entity)
    }

    fn stage_insert_many(&self, entities: Vec<T>) -> Vec<Staged<T>> {
        entities
            .into_iter()
            .map(|entity| self.stage(MutationKind::Insert, entity))
            .collect()
    }

    fn stage_remove(&self, entity: T) -> Staged<T> {
        self.stage(MutationKind::Remove, entity)
    }

    fn stage_remove_many(&self, entities: Vec<T>) -> Vec<Staged<T>> {
        entities
            .into_iter()
            .map(|entity| self.stage(MutationKind::Remove, entity))
            .collect()
    }

    fn stage_update(&self, entity: T) -> Staged<T> {
        self.stage(MutationKind::Update, entity)
    }

    fn stage_update_many(&self, entities: Vec<T>) -> Vec<Staged<T>> {
        entities
            .into_iter()
            .map(|entity| self.stage(MutationKind::Update, entity))
            .collect()
    }
}
