//! Pagination window and paged result types.
//!
//! Page indexes are zero-based: page `n` of size `s` starts at offset
//! `n * s`.

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::result::AppResult;

/// A validated offset/limit window over an ordered result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageWindow {
    /// Zero-based page index.
    pub index: i64,
    /// Number of items per page.
    pub size: i64,
}

impl PageWindow {
    /// Create a window for page `index` of `size` items.
    ///
    /// Fails with `InvalidArgument` when `size <= 0`, `index < 0`, or the
    /// offset does not fit in an `i64`.
    pub fn new(index: i64, size: i64) -> AppResult<Self> {
        if size <= 0 {
            return Err(AppError::invalid_argument(format!(
                "page size must be greater than zero, got {size}"
            )));
        }
        if index < 0 {
            return Err(AppError::invalid_argument(format!(
                "page index must not be negative, got {index}"
            )));
        }
        if index.checked_mul(size).is_none() {
            return Err(AppError::invalid_argument(format!(
                "page {index} of size {size} is out of range"
            )));
        }
        Ok(Self { index, size })
    }

    /// Create a window over the first `size` items.
    pub fn first(size: i64) -> AppResult<Self> {
        Self::new(0, size)
    }

    /// Build a window from optional parts.
    ///
    /// Both parts select page `index`; a size alone selects the first
    /// `size` items; an index alone requests no paging but is still
    /// range-checked.
    pub fn from_parts(index: Option<i64>, size: Option<i64>) -> AppResult<Option<Self>> {
        match (index, size) {
            (Some(index), Some(size)) => Self::new(index, size).map(Some),
            (None, Some(size)) => Self::first(size).map(Some),
            (Some(index), None) if index < 0 => Err(AppError::invalid_argument(format!(
                "page index must not be negative, got {index}"
            ))),
            _ => Ok(None),
        }
    }

    /// Number of items skipped before this page.
    pub fn offset(&self) -> i64 {
        self.index * self.size
    }

    /// Maximum number of items on this page.
    pub fn limit(&self) -> i64 {
        self.size
    }
}

/// One page of results together with the size of the unpaged set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedResult<T> {
    /// Zero-based page index.
    pub page_index: i64,
    /// Number of items per page.
    pub page_size: i64,
    /// Number of items matching the filter, ignoring the page window.
    pub total_count: u64,
    /// The items on this page.
    pub items: Vec<T>,
}

impl<T> PagedResult<T> {
    /// Assemble a page from its window, total count, and items.
    pub fn new(window: PageWindow, total_count: u64, items: Vec<T>) -> Self {
        Self {
            page_index: window.index,
            page_size: window.size,
            total_count,
            items,
        }
    }

    /// Total number of pages (zero when nothing matched).
    pub fn total_pages(&self) -> u64 {
        let size = self.page_size.max(1) as u64;
        self.total_count.div_ceil(size)
    }

    /// Whether a page exists after this one.
    pub fn has_next(&self) -> bool {
        (self.page_index as u64).saturating_add(1) < self.total_pages()
    }

    /// Whether a page exists before this one.
    pub fn has_previous(&self) -> bool {
        self.page_index > 0
    }

    /// Map the items while keeping the page metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PagedResult<U> {
        PagedResult {
            page_index: self.page_index,
            page_size: self.page_size,
            total_count: self.total_count,
            items: self.items.into_iter().map(f).collect(),
        }
    }
}
