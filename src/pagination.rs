//! Offset and page-number pagination parameters.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::transport::HttpRequest;

pub const DEFAULT_LIMIT: u32 = 50;
pub const DEFAULT_PAGE_LIMIT: u32 = 20;

/// Offset pagination, sent as `skip` and `limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaginationParams {
    skip: u32,
    limit: u32,
}

impl PaginationParams {
    pub fn new(skip: u32, limit: u32) -> Result<Self> {
        if limit == 0 {
            return Err(Error::InvalidPagination(format!(
                "limit must be > 0, got {}",
                limit
            )));
        }
        Ok(Self { skip, limit })
    }

    pub fn skip(&self) -> u32 {
        self.skip
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn next_page(&self) -> Self {
        Self {
            skip: self.skip.saturating_add(self.limit),
            limit: self.limit,
        }
    }

    /// `None` when already at the first page.
    pub fn previous_page(&self) -> Option<Self> {
        (self.skip >= self.limit).then(|| Self {
            skip: self.skip - self.limit,
            limit: self.limit,
        })
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

/// Page-number pagination, sent as `page` and `limit`. Pages start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageParams {
    page: u32,
    limit: u32,
}

impl PageParams {
    pub fn new(page: u32, limit: u32) -> Result<Self> {
        if page < 1 {
            return Err(Error::InvalidPagination(format!(
                "page must be >= 1, got {}",
                page
            )));
        }
        if limit == 0 {
            return Err(Error::InvalidPagination(format!(
                "limit must be > 0, got {}",
                limit
            )));
        }
        Ok(Self { page, limit })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn next_page(&self) -> Self {
        Self {
            page: self.page.saturating_add(1),
            limit: self.limit,
        }
    }

    pub fn previous_page(&self) -> Option<Self> {
        (self.page > 1).then(|| Self {
            page: self.page - 1,
            limit: self.limit,
        })
    }

    /// The equivalent offset parameters.
    pub fn to_skip_limit(&self) -> PaginationParams {
        PaginationParams {
            skip: (self.page - 1).saturating_mul(self.limit),
            limit: self.limit,
        }
    }
}

impl Default for PageParams {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

/// Parameters that can be appended to a request's query string.
pub trait Paginate {
    fn query_pairs(&self) -> [(&'static str, String); 2];
}

impl Paginate for PaginationParams {
    fn query_pairs(&self) -> [(&'static str, String); 2] {
        [("skip", self.skip.to_string()), ("limit", self.limit.to_string())]
    }
}

impl Paginate for PageParams {
    fn query_pairs(&self) -> [(&'static str, String); 2] {
        [("page", self.page.to_string()), ("limit", self.limit.to_string())]
    }
}

impl HttpRequest {
    /// Appends the pagination parameters to the query string.
    pub fn paginate<P: Paginate>(&mut self, params: &P) -> &mut Self {
        for (key, value) in params.query_pairs() {
            self.query(key, &value);
        }
        self
    }
}

/// Whether a page this full suggests that more items follow.
pub fn has_more<T>(items: &[T], params: &PaginationParams) -> bool {
    items.len() >= params.limit as usize
}

/// One page of items with the parameters that fetched it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub pagination: PaginationParams,
    pub has_more: bool,
}

impl<T> PaginatedResponse<T> {
    /// Builds a page, deriving `has_more` from the item count.
    pub fn new(items: Vec<T>, pagination: PaginationParams) -> Self {
        let has_more = has_more(&items, &pagination);
        Self {
            items,
            pagination,
            has_more,
        }
    }

    /// Items fetched so far, including earlier pages.
    pub fn total_fetched(&self) -> u64 {
        u64::from(self.pagination.skip) + self.items.len() as u64
    }
}
