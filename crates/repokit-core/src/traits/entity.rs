//! Entity capability traits.
//!
//! Any `serde`-serializable, default-constructible type can be stored
//! through a repository by implementing [`Entity`]. Types with a primary
//! key additionally implement [`HasKey`] and advertise it through
//! [`Entity::key_spec`], which is what key lookups check at call time.

use std::any::TypeId;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A persisted record type.
pub trait Entity: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static {
    /// Table (or collection) the entity is stored in.
    const TABLE: &'static str;

    /// The key this entity declares, if any.
    fn key_spec() -> Option<KeySpec> {
        None
    }

    /// Relations that can be eager-loaded with an include path.
    fn relations() -> Vec<Relation> {
        Vec::new()
    }

    /// Look up a relation by name.
    fn relation(name: &str) -> Option<Relation> {
        Self::relations().into_iter().find(|r| r.name == name)
    }
}

/// Capability marker for entities identified by a key of type `K`.
pub trait HasKey<K: 'static>: Entity {
    /// Field holding the key.
    const KEY_FIELD: &'static str = "id";

    /// The entity's key value.
    fn key(&self) -> &K;

    /// Key spec to return from [`Entity::key_spec`].
    fn declared_key() -> KeySpec {
        KeySpec::of::<K>(Self::KEY_FIELD)
    }
}

/// Runtime description of an entity key: the field and the Rust type of
/// its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpec {
    field: &'static str,
    type_id: TypeId,
    type_name: &'static str,
}

impl KeySpec {
    /// Describe a key of type `K` stored in `field`.
    pub fn of<K: 'static>(field: &'static str) -> Self {
        Self {
            field,
            type_id: TypeId::of::<K>(),
            type_name: std::any::type_name::<K>(),
        }
    }

    /// Field holding the key.
    pub fn field(&self) -> &'static str {
        self.field
    }

    /// Name of the key type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether keys of type `K` match this spec.
    pub fn accepts<K: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<K>()
    }
}

/// Cardinality of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// Many related rows, attached as an array.
    HasMany,
    /// At most one related row that points back at the owner.
    HasOne,
    /// At most one related row the owner points at.
    BelongsTo,
}

impl RelationKind {
    /// Whether the relation attaches a list.
    pub fn is_collection(&self) -> bool {
        matches!(self, Self::HasMany)
    }
}

/// A navigable relation from one entity table to another.
///
/// Related rows are those whose `foreign_field` equals the owner's
/// `local_field`. They are attached to the owner under `name`, so the
/// owning entity should carry a `#[serde(default)]` field of that name.
#[derive(Debug, Clone)]
pub struct Relation {
    /// Relation name, also the field the related data is attached to.
    pub name: &'static str,
    /// Cardinality.
    pub kind: RelationKind,
    /// Table of the related entity.
    pub table: &'static str,
    /// Field on the owner.
    pub local_field: &'static str,
    /// Field on the related entity.
    pub foreign_field: &'static str,
    /// Relations of the related entity, for nested include paths.
    pub nested: fn() -> Vec<Relation>,
}

impl Relation {
    fn to<E: Entity>(
        name: &'static str,
        kind: RelationKind,
        local_field: &'static str,
        foreign_field: &'static str,
    ) -> Self {
        Self {
            name,
            kind,
            table: E::TABLE,
            local_field,
            foreign_field,
            nested: E::relations,
        }
    }

    /// Rows of `E` whose `foreign_field` references this entity's
    /// `local_field`.
    pub fn has_many<E: Entity>(
        name: &'static str,
        local_field: &'static str,
        foreign_field: &'static str,
    ) -> Self {
        Self::to::<E>(name, RelationKind::HasMany, local_field, foreign_field)
    }

    /// A single row of `E` whose `foreign_field` references this entity's
    /// `local_field`.
    pub fn has_one<E: Entity>(
        name: &'static str,
        local_field: &'static str,
        foreign_field: &'static str,
    ) -> Self {
        Self::to::<E>(name, RelationKind::HasOne, local_field, foreign_field)
    }

    /// The row of `E` this entity's `local_field` points at through
    /// `foreign_field` (usually the target's key).
    pub fn belongs_to<E: Entity>(
        name: &'static str,
        local_field: &'static str,
        foreign_field: &'static str,
    ) -> Self {
        Self::to::<E>(name, RelationKind::BelongsTo, local_field, foreign_field)
    }

    /// Relations reachable from the related entity.
    pub fn nested_relations(&self) -> Vec<Relation> {
        (self.nested)()
    }
}
