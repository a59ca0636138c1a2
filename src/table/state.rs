use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::debug;

use super::query::{ColumnFilter, SortSpec};
use crate::pagination::PaginationMeta;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// What the view should fetch next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub page: u32,
    pub limit: u32,
    pub sort: Option<SortSpec>,
    pub filters: Vec<ColumnFilter>,
}

impl FetchRequest {
    /// Query-string pairs accepted by `GET /api/users`.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("page".to_string(), self.page.to_string()),
            ("limit".to_string(), self.limit.to_string()),
        ];
        if let Some(sort) = &self.sort {
            pairs.push(("sort".into(), sort.id.clone()));
            pairs.push(("desc".into(), sort.desc.to_string()));
        }
        for f in &self.filters {
            pairs.push((f.id.clone(), f.value.clone()));
        }
        pairs
    }
}

#[derive(Debug)]
struct PendingFilters {
    values: BTreeMap<String, String>,
    due: Instant,
}

/// View-side table state synced against a paginated endpoint.
///
/// Pagination and sort changes yield a [`FetchRequest`] right away. Filter
/// edits reset the page to 1 and are held until the debounce window passes
/// without another edit; [`TableController::poll`] commits them.
#[derive(Debug)]
pub struct TableController {
    page: u32,
    page_size: u32,
    sort: Option<SortSpec>,
    filters: BTreeMap<String, String>,
    pending: Option<PendingFilters>,
    debounce: Duration,
    page_count: Option<u64>,
    total_rows: Option<u64>,
}

impl Default for TableController {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl TableController {
    pub fn new(page_size: u32) -> Self {
        Self {
            page: 1,
            page_size: page_size.max(1),
            sort: None,
            filters: BTreeMap::new(),
            pending: None,
            debounce: DEFAULT_DEBOUNCE,
            page_count: None,
            total_rows: None,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn sort(&self) -> Option<&SortSpec> {
        self.sort.as_ref()
    }

    pub fn page_count(&self) -> Option<u64> {
        self.page_count
    }

    pub fn total_rows(&self) -> Option<u64> {
        self.total_rows
    }

    /// Committed filter value for a column.
    pub fn filter(&self, id: &str) -> Option<&str> {
        self.filters.get(id).map(String::as_str)
    }

    pub fn set_page(&mut self, page: u32) -> FetchRequest {
        self.page = page.max(1);
        self.request()
    }

    pub fn set_pagination(&mut self, page: u32, page_size: u32) -> FetchRequest {
        self.page = page.max(1);
        self.page_size = page_size.max(1);
        self.request()
    }

    pub fn set_sort(&mut self, sort: Option<SortSpec>) -> FetchRequest {
        self.sort = sort;
        self.request()
    }

    /// Stages a filter edit; `None` or an empty value clears the column.
    pub fn set_filter(&mut self, id: &str, value: Option<&str>, now: Instant) {
        let mut values = match self.pending.take() {
            Some(p) => p.values,
            None => self.filters.clone(),
        };
        match value.filter(|v| !v.is_empty()) {
            Some(v) => {
                values.insert(id.to_string(), v.to_string());
            }
            None => {
                values.remove(id);
            }
        }
        self.page = 1;
        self.pending = Some(PendingFilters {
            values,
            due: now + self.debounce,
        });
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.due)
    }

    /// Commits staged filters once their quiet period has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<FetchRequest> {
        if now < self.pending.as_ref()?.due {
            return None;
        }
        let pending = self.pending.take()?;
        self.filters = pending.values;
        debug!(filters = self.filters.len(), "filters committed");
        Some(self.request())
    }

    /// Absorbs the server envelope; the server's normalized page wins.
    pub fn reconcile(&mut self, meta: &PaginationMeta) {
        self.page = u32::try_from(meta.page).unwrap_or(u32::MAX).max(1);
        self.page_size = u32::try_from(meta.limit).unwrap_or(u32::MAX).max(1);
        self.page_count = Some(meta.total_pages);
        self.total_rows = Some(meta.total);
    }

    pub fn request(&self) -> FetchRequest {
        FetchRequest {
            page: self.page,
            limit: self.page_size,
            sort: self.sort.clone(),
            filters: self
                .filters
                .iter()
                .map(|(id, value)| ColumnFilter {
                    id: id.clone(),
                    value: value.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn sort_and_pagination_fetch_immediately() {
        let mut table = TableController::new(10);
        let req = table.set_pagination(3, 25);
        assert_eq!((req.page, req.limit), (3, 25));

        let req = table.set_sort(Some(SortSpec { id: "firstName".into(), desc: true }));
        assert_eq!(req.page, 3);
        assert_eq!(req.sort.as_ref().map(|s| s.desc), Some(true));
    }

    #[test]
    fn filter_edits_debounce_on_trailing_edge() {
        let t0 = Instant::now();
        let mut table = TableController::new(10);
        table.set_page(4);

        table.set_filter("email", Some("al"), t0);
        assert_eq!(table.page(), 1);
        assert_eq!(table.poll(t0 + ms(200)), None);

        // second edit inside the window reschedules
        table.set_filter("email", Some("alice"), t0 + ms(200));
        assert_eq!(table.poll(t0 + ms(400)), None);
        assert_eq!(table.next_deadline(), Some(t0 + ms(500)));

        let req = table.poll(t0 + ms(500)).expect("commit after quiet period");
        assert_eq!(
            req.filters,
            vec![ColumnFilter { id: "email".into(), value: "alice".into() }]
        );
        assert_eq!(req.page, 1);
        assert_eq!(table.poll(t0 + ms(900)), None);
    }

    #[test]
    fn clearing_a_filter_removes_the_column() {
        let t0 = Instant::now();
        let mut table = TableController::new(10).with_debounce(ms(50));
        table.set_filter("role", Some("student"), t0);
        table.poll(t0 + ms(50));
        assert_eq!(table.filter("role"), Some("student"));

        table.set_filter("role", Some(""), t0 + ms(60));
        let req = table.poll(t0 + ms(110)).unwrap();
        assert!(req.filters.is_empty());
        assert_eq!(table.filter("role"), None);
    }

    #[test]
    fn reconcile_takes_server_values() {
        let mut table = TableController::new(10);
        table.set_page(9);
        table.reconcile(&PaginationMeta { total: 12, page: 2, limit: 10, total_pages: 2 });
        assert_eq!(table.page(), 2);
        assert_eq!(table.page_count(), Some(2));
        assert_eq!(table.total_rows(), Some(12));
    }

    #[test]
    fn query_pairs_match_list_endpoint() {
        let req = FetchRequest {
            page: 2,
            limit: 10,
            sort: Some(SortSpec { id: "email".into(), desc: false }),
            filters: vec![ColumnFilter { id: "role".into(), value: "admin".into() }],
        };
        let pairs = req.query_pairs();
        assert!(pairs.contains(&("sort".into(), "email".into())));
        assert!(pairs.contains(&("desc".into(), "false".into())));
        assert!(pairs.contains(&("role".into(), "admin".into())));
    }
}
