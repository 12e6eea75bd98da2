//! Include paths for eager loading.

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::result::AppResult;
use crate::types::ident::validate_identifier;

/// A dotted path of relation names to load alongside the queried entity,
/// e.g. `"posts"` or `"posts.comments"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Include {
    path: String,
}

impl Include {
    /// Create an include for the given relation path.
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// The full dotted path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The relation names along the path, outermost first.
    pub fn segments(&self) -> AppResult<Vec<&str>> {
        let segments: Vec<&str> = self.path.split('.').collect();
        for segment in &segments {
            validate_identifier(segment).map_err(|_| {
                AppError::invalid_argument(format!("invalid include path '{}'", self.path))
            })?;
        }
        Ok(segments)
    }
}

impl From<&str> for Include {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for Include {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}
