//! Query fragment types shared by repositories and persistence contexts.

pub mod filter;
pub mod ident;
pub mod include;
pub mod pagination;
pub mod sorting;

pub use filter::{Filter, FilterField, FilterOp, FilterValue};
pub use ident::validate_identifier;
pub use include::Include;
pub use pagination::{PageWindow, PagedResult};
pub use sorting::{SortDirection, SortField};
