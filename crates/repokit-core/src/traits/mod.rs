//! Core traits defined in `repokit-core` and implemented by other crates.

pub mod context;
pub mod entity;
pub mod repository;

pub use context::{
    IncludeNode, Mutation, MutationKind, PersistenceContext, QuerySpec, Row, RowSource,
    Staged,
};
pub use entity::{Entity, HasKey, KeySpec, Relation, RelationKind};
pub use repository::ModelRepository;
