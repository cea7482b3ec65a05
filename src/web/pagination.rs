use serde::{Deserialize, Serialize};

const MAX_PAGE_SIZE: u64 = 100;

/// One-based page of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Pagination {
    pub index: u64,
    pub size: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { index: 1, size: 10 }
    }
}

impl Pagination {
    /// Build from optional query parameters, falling back to the defaults
    /// for anything missing or zero and capping the page size.
    pub fn from_query(index: Option<u64>, size: Option<u64>) -> Self {
        let defaults = Self::default();
        Self {
            index: index.filter(|i| *i >= 1).unwrap_or(defaults.index),
            size: size
                .filter(|s| *s >= 1)
                .map(|s| s.min(MAX_PAGE_SIZE))
                .unwrap_or(defaults.size),
        }
    }

    pub fn offset(&self) -> u64 {
        self.index.saturating_sub(1).saturating_mul(self.size)
    }

    pub fn limit(&self) -> u64 {
        self.size
    }
}
