//! Generic repository trait for entity access.

use async_trait::async_trait;

use crate::result::AppResult;
use crate::traits::context::Staged;
use crate::traits::entity::{Entity, HasKey};
use crate::types::filter::{Filter, FilterValue};
use crate::types::include::Include;
use crate::types::pagination::PagedResult;
use crate::types::sorting::SortField;

/// Read and staging operations over one entity type.
///
/// Reads execute immediately against the backing store. Writes are only
/// staged; they reach the store when the owning unit of work commits.
#[async_trait]
pub trait ModelRepository<T: Entity>: Send + Sync {
    /// First entity matching `filter`, or `None` when nothing matches.
    async fn get_first(
        &self,
        filter: Option<Filter>,
        includes: &[Include],
    ) -> AppResult<Option<T>>;

    /// Entities matching `filter` in `order`, optionally restricted to one
    /// page.
    async fn get_list(
        &self,
        filter: Option<Filter>,
        order: &[SortField],
        includes: &[Include],
        page_index: Option<i64>,
        page_size: Option<i64>,
    ) -> AppResult<Vec<T>>;

    /// One page of entities matching `filter` plus the unpaged total.
    async fn get_paged(
        &self,
        page_size: i64,
        page_index: i64,
        filter: Option<Filter>,
        order: &[SortField],
        includes: &[Include],
    ) -> AppResult<PagedResult<T>>;

    /// Entity whose declared key equals `id`.
    ///
    /// Fails with `UnsupportedOperation` when `T` declares no key of type
    /// `K`, and with `MultipleResults` when the key is not unique.
    async fn get_by_key<K>(&self, id: K) -> AppResult<Option<T>>
    where
        K: Into<FilterValue> + Send + 'static;

    /// Key lookup checked at compile time.
    async fn get_by_id<K>(&self, id: K) -> AppResult<Option<T>>
    where
        T: HasKey<K>,
        K: Into<FilterValue> + Send + 'static,
    {
        self.get_by_key(id).await
    }

    /// Number of entities matching `filter`.
    async fn count(&self, filter: Option<Filter>) -> AppResult<u64>;

    /// Whether any entity matches `filter`.
    async fn exists(&self, filter: Option<Filter>) -> AppResult<bool> {
        Ok(self.count(filter).await? > 0)
    }

    /// Stage `entity` for insertion. The returned handle shares the entity
    /// with the context and shows store-assigned values after commit.
    fn stage_insert(&self, entity: T) -> Staged<T>;

    /// Stage every entity for insertion.
    fn stage_insert_many(&self, entities: Vec<T>) -> Vec<Staged<T>>;

    /// Stage `entity` for removal.
    fn stage_remove(&self, entity: T) -> Staged<T>;

    /// Stage every entity for removal.
    fn stage_remove_many(&self, entities: Vec<T>) -> Vec<Staged<T>>;

    /// Stage `entity` as modified in full.
    fn stage_update(&self, entity: T) -> Staged<T>;

    /// Stage every entity as modified in full.
    fn stage_update_many(&self, entities: Vec<T>) -> Vec<Staged<T>>;
}
