//! Identifier validation for table and field names.

use crate::error::AppError;
use crate::result::AppResult;

/// Check that `name` is a plain identifier (`[A-Za-z_][A-Za-z0-9_]*`).
///
/// Field names end up inside generated SQL, so anything else is rejected
/// before a query is built.
pub fn validate_identifier(name: &str) -> AppResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(AppError::invalid_argument(format!(
            "'{name}' is not a valid field name"
        )))
    }
}
