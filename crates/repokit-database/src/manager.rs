//! Unit-of-work manager.

use std::sync::Arc;

use tracing::{debug, info};

use repokit_core::result::AppResult;
use repokit_core::traits::context::PersistenceContext;
use repokit_core::traits::entity::Entity;

use crate::repository::EntityRepository;

/// Owns one persistence context and hands out repositories over it.
///
/// Every repository obtained from the same manager stages into the same
/// context, so a single [`commit`](Self::commit) persists all of them
/// together.
#[derive(Debug)]
pub struct RepositoryManager<C: ?Sized = dyn PersistenceContext> {
    context: Arc<C>,
    default_tracking: bool,
}

impl<C> RepositoryManager<C>
where
    C: PersistenceContext + ?Sized,
{
    /// Create a manager over `context`. Reads are untracked by default.
    pub fn new(context: Arc<C>) -> Self {
        Self {
            context,
            default_tracking: false,
        }
    }

    /// Set whether [`repository`](Self::repository) enables tracking.
    pub fn with_default_tracking(mut self, tracking: bool) -> Self {
        self.default_tracking = tracking;
        self
    }

    /// A repository for `T` with tracking chosen explicitly.
    pub fn repository_for<T: Entity>(&self, tracking: bool) -> EntityRepository<'_, T, C> {
        EntityRepository::new(&*self.context, tracking)
    }

    /// A repository for `T` using the manager's default tracking.
    pub fn repository<T: Entity>(&self) -> EntityRepository<'_, T, C> {
        self.repository_for(self.default_tracking)
    }

    /// Persist every mutation staged through this manager's repositories.
    ///
    /// On failure nothing is persisted and the staged mutations remain
    /// pending.
    pub async fn commit(&self) -> AppResult<u64> {
        let pending = self.context.pending_changes();
        let affected = self.context.save_changes().await?;
        info!(pending, affected, "Unit of work committed");
        Ok(affected)
    }

    /// Discard staged mutations, returning how many were dropped.
    pub fn rollback(&self) -> usize {
        let dropped = self.context.discard_changes();
        debug!(dropped, "Unit of work discarded");
        dropped
    }

    /// Whether any mutation is waiting for commit.
    pub fn has_changes(&self) -> bool {
        self.context.pending_changes() > 0
    }

    /// The underlying persistence context.
    pub fn context(&self) -> &C {
        &self.context
    }
}
