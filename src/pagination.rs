use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 100;

/// Normalized page window derived from client-supplied `page`/`limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageParams {
    pub page: i64,
    pub limit: i64,
    pub skip: i64,
}

impl PageParams {
    /// `page >= 1`, `1 <= limit <= 100`; absent values take the defaults.
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        let page = page.unwrap_or(1).max(1);
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let skip = (page - 1).saturating_mul(limit);
        Self { page, limit, skip }
    }

    /// Lenient variant for query strings: unparseable values count as absent.
    pub fn from_query(page: Option<&str>, limit: Option<&str>) -> Self {
        Self::new(parse_lenient(page), parse_lenient(limit))
    }
}

impl Default for PageParams {
    fn default() -> Self {
        Self::new(None, None)
    }
}

fn parse_lenient(raw: Option<&str>) -> Option<i64> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<i64>().ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub total: u64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: u64,
}

impl PaginationMeta {
    pub fn new(total: u64, params: PageParams) -> Self {
        Self {
            total,
            page: params.page,
            limit: params.limit,
            total_pages: page_count(total, params.limit),
        }
    }
}

/// `{ data, pagination }` envelope returned by list endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, total: u64, params: PageParams) -> Self {
        Self {
            data,
            pagination: PaginationMeta::new(total, params),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            data: self.data.into_iter().map(f).collect(),
            pagination: self.pagination,
        }
    }
}

pub fn page_count(total: u64, limit: i64) -> u64 {
    let limit = limit.max(1) as u64;
    total.div_ceil(limit)
}
