//! # repokit-core
//!
//! Core crate for Repokit. Contains the entity capability traits, the
//! persistence-context and repository contracts, configuration schemas,
//! query fragments (filters, sorting, pagination, includes), and the
//! unified error system.
//!
//! This crate has **no** internal dependencies on other Repokit crates.

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
