//! Data-table plumbing: in-memory filter/sort/slice and the view-side
//! controller that keeps table state in sync with a paginated endpoint.

pub mod query;
pub mod state;

pub use query::{apply, ColumnFilter, SortSpec, TablePage, TableQuery};
pub use state::{FetchRequest, TableController};
