use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pagination::{page_count, PageParams};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnFilter {
    pub id: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub id: String,
    pub desc: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TableQuery {
    pub filters: Vec<ColumnFilter>,
    pub sort: Option<SortSpec>,
    pub page: PageParams,
}

#[derive(Debug)]
pub struct TablePage<T> {
    pub rows: Vec<T>,
    /// Rows that passed the filters, before slicing.
    pub total_rows: u64,
    pub page_count: u64,
}

/// Filters, sorts, then slices `rows`. Cells are compared by the string form
/// of the row's serialized field.
pub fn apply<T: Serialize>(rows: Vec<T>, query: &TableQuery) -> serde_json::Result<TablePage<T>> {
    let mut keyed = Vec::with_capacity(rows.len());
    for row in rows {
        let value = serde_json::to_value(&row)?;
        keyed.push((value, row));
    }

    let needles: Vec<(&str, String)> = query
        .filters
        .iter()
        .map(|f| (f.id.as_str(), f.value.to_lowercase()))
        .collect();
    keyed.retain(|(value, _)| {
        needles
            .iter()
            .all(|(id, needle)| cell(value, id).to_lowercase().contains(needle.as_str()))
    });

    if let Some(sort) = &query.sort {
        keyed.sort_by(|(a, _), (b, _)| {
            let ord = compare_cells(a, b, &sort.id);
            if sort.desc {
                ord.reverse()
            } else {
                ord
            }
        });
    }

    let total_rows = keyed.len() as u64;
    let skip = usize::try_from(query.page.skip).unwrap_or(usize::MAX);
    let limit = usize::try_from(query.page.limit).unwrap_or(0);
    let rows = keyed
        .into_iter()
        .skip(skip)
        .take(limit)
        .map(|(_, row)| row)
        .collect();

    Ok(TablePage {
        rows,
        total_rows,
        page_count: page_count(total_rows, query.page.limit),
    })
}

/// String form of a field; missing and null fields read as empty.
pub fn cell(row: &Value, id: &str) -> String {
    match row.get(id) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

pub fn compare_cells(a: &Value, b: &Value, id: &str) -> Ordering {
    cell(a, id).cmp(&cell(b, id))
}
