//! # repokit-database
//!
//! Generic data access for Repokit: the query compositor, the per-entity
//! repository, the repository manager that owns one unit of work, and
//! the persistence contexts that back them (PostgreSQL and in-memory).

pub mod connection;
pub mod context;
pub mod include;
pub mod manager;
pub mod provider;
pub mod query;
pub mod repository;

pub use connection::DatabasePool;
pub use context::memory::{MemoryContext, MemoryStore};
pub use context::postgres::PgContext;
pub use manager::RepositoryManager;
pub use provider::RepositoryServices;
pub use query::Query;
pub use repository::EntityRepository;
