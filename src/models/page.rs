//! Paginated list envelope shared by the list endpoints.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_LIMIT: i64 = 100;
pub const MAX_PAGE_LIMIT: i64 = 1000;

/// `?limit=&offset=` query accepted by list endpoints.
#[derive(Debug, Default, Deserialize, Clone, Copy)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PageQuery {
    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// `{count, next, previous, results}` envelope.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Page<T> {
    pub count: i64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    /// Build the envelope for `results` fetched at `query` out of `count`
    /// total rows; `base` is the collection href used for the links.
    pub fn new(base: &str, query: PageQuery, count: i64, results: Vec<T>) -> Self {
        let limit = query.limit();
        let offset = query.offset();

        let next = (offset + limit < count)
            .then(|| format!("{}?limit={}&offset={}", base, limit, offset + limit));
        let previous = (offset > 0).then(|| {
            let prev = (offset - limit).max(0);
            format!("{}?limit={}&offset={}", base, limit, prev)
        });

        Self {
            count,
            next,
            previous,
            results,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            count: self.count,
            next: self.next,
            previous: self.previous,
            results: self.results.into_iter().map(f).collect(),
        }
    }
}
