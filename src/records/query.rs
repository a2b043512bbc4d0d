//! Filtering, sorting and pagination of record lists.
//!
//! Filters are JSON objects. Every member must match (AND logic):
//!
//! - `q` matches records with any string value, at any depth, containing the
//!   query case-insensitively
//! - `field_lte`, `field_gte`, `field_lt`, `field_gt` compare `field`
//! - an array value matches records whose `field` is one of the values, or,
//!   when `field` is itself an array, contains all of them
//! - a string value matches array fields containing it and boolean fields
//!   equal to `"true"`/`"false"`
//! - any other value matches by equality

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::record::Record;

/// Page size used when a page is requested without one.
pub const DEFAULT_PER_PAGE: usize = 10;

// =============================================================================
// Query Types
// =============================================================================

/// A 1-based page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: usize,
    pub per_page: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

/// Parameters of a list request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default)]
    pub pagination: Option<Pagination>,
    #[serde(default)]
    pub sort: Option<Sort>,
    #[serde(default)]
    pub filter: Map<String, Value>,
    /// Include file bodies in listings of raw files.
    #[serde(default)]
    pub load_data: bool,
}

impl ListQuery {
    /// A query matching records whose `field` equals `value`.
    pub fn matching(field: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut query = Self::default();
        query.filter.insert(field.into(), value.into());
        query
    }
}

/// One page of a list result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListOutput {
    pub records: Vec<Record>,
    /// Number of records matching the filter across all pages.
    pub total: usize,
}

// =============================================================================
// Filtering
// =============================================================================

/// Keep the records matching every member of `filter`.
pub fn default_filter_records(records: Vec<Record>, filter: &Map<String, Value>) -> Vec<Record> {
    records
        .into_iter()
        .filter(|record| filter.iter().all(|(key, value)| matches(record, key, value)))
        .collect()
}

fn matches(record: &Record, key: &str, expected: &Value) -> bool {
    if key == "q" {
        let needle = match expected {
            Value::String(s) => s.to_lowercase(),
            other => other.to_string().to_lowercase(),
        };
        return record.as_map().values().any(|v| contains_text(v, &needle));
    }

    let comparisons: [(&str, fn(Ordering) -> bool); 4] = [
        ("_lte", |o| o != Ordering::Greater),
        ("_gte", |o| o != Ordering::Less),
        ("_lt", |o| o == Ordering::Less),
        ("_gt", |o| o == Ordering::Greater),
    ];
    for (suffix, accept) in comparisons {
        if let Some(field) = key.strip_suffix(suffix) {
            return record
                .get(field)
                .and_then(|actual| compare_values(actual, expected))
                .is_some_and(accept);
        }
    }

    let actual = record.get(key);
    match (expected, actual) {
        (Value::Array(wanted), Some(Value::Array(items))) => {
            wanted.iter().all(|w| items.contains(w))
        }
        (Value::Array(wanted), actual) => {
            actual.is_some_and(|actual| wanted.contains(actual))
        }
        (Value::String(s), Some(Value::Array(items))) => items.iter().any(|i| i.as_str() == Some(s.as_str())),
        (Value::String(s), Some(Value::Bool(b))) => *b == (s == "true"),
        (expected, Some(actual)) => actual == expected,
        (expected, None) => expected.is_null(),
    }
}

fn contains_text(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s.to_lowercase().contains(needle),
        Value::Array(items) => items.iter().any(|v| contains_text(v, needle)),
        Value::Object(map) => map.values().any(|v| contains_text(v, needle)),
        _ => false,
    }
}

/// Order two JSON scalars. Numbers compare numerically, also against
/// numeric strings; strings compare lexically. Other pairs are unordered.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::Number(x), Value::String(y)) => x.as_f64()?.partial_cmp(&y.parse::<f64>().ok()?),
        (Value::String(x), Value::Number(y)) => x.parse::<f64>().ok()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

// =============================================================================
// Sorting and Pagination
// =============================================================================

/// Stable sort by one field. Records without the field go last when
/// ascending and first when descending.
pub fn sort_records(records: &mut [Record], sort: &Sort) {
    records.sort_by(|a, b| {
        let ordering = match (a.get(&sort.field), b.get(&sort.field)) {
            (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
            (None | Some(Value::Null), _) => Ordering::Greater,
            (_, None | Some(Value::Null)) => Ordering::Less,
            (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
        };
        match sort.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

/// The records of one page. Page zero or a zero page size returns everything.
pub fn paginate_records(records: Vec<Record>, pagination: &Pagination) -> Vec<Record> {
    if pagination.page == 0 || pagination.per_page == 0 {
        return records;
    }
    let start = (pagination.page - 1).saturating_mul(pagination.per_page);
    records
        .into_iter()
        .skip(start)
        .take(pagination.per_page)
        .collect()
}

/// Sort, filter and paginate `records` as `query` asks, using `filter` to
/// apply the query's filter object.
pub fn apply_query<F>(mut records: Vec<Record>, query: &ListQuery, filter: F) -> ListOutput
where
    F: FnOnce(Vec<Record>, &Map<String, Value>) -> Vec<Record>,
{
    if let Some(sort) = &query.sort {
        sort_records(&mut records, sort);
    }
    let filtered = if query.filter.is_empty() {
        records
    } else {
        filter(records, &query.filter)
    };
    let total = filtered.len();
    let records = match &query.pagination {
        Some(pagination) => paginate_records(filtered, pagination),
        None => filtered,
    };
    ListOutput { records, total }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn users() -> Vec<Record> {
        [
            json!({"id": "1", "name": "Ann", "age": 30, "admin": true, "tags": ["a", "b"]}),
            json!({"id": "2", "name": "Bob", "age": 25, "admin": false, "tags": ["b"]}),
            json!({"id": "3", "name": "Cy", "age": 41, "profile": {"bio": "Likes annotations"}}),
        ]
        .into_iter()
        .filter_map(Record::from_value)
        .collect()
    }

    fn ids(records: &[Record]) -> Vec<String> {
        records.iter().filter_map(Record::id).collect()
    }

    fn filter(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_full_text_is_case_insensitive_and_nested() {
        let found = default_filter_records(users(), &filter(json!({"q": "ANN"})));
        assert_eq!(ids(&found), vec!["1", "3"]);
    }

    #[test]
    fn test_range_suffixes() {
        assert_eq!(
            ids(&default_filter_records(users(), &filter(json!({"age_gte": 30})))),
            vec!["1", "3"]
        );
        assert_eq!(
            ids(&default_filter_records(users(), &filter(json!({"age_lt": "30"})))),
            vec!["2"]
        );
        assert_eq!(
            ids(&default_filter_records(
                users(),
                &filter(json!({"age_gt": 24, "age_lte": 30}))
            )),
            vec!["1", "2"]
        );
    }

    #[test]
    fn test_array_filters() {
        assert_eq!(
            ids(&default_filter_records(users(), &filter(json!({"id": ["1", "3"]})))),
            vec!["1", "3"]
        );
        assert_eq!(
            ids(&default_filter_records(users(), &filter(json!({"tags": ["a", "b"]})))),
            vec!["1"]
        );
        assert_eq!(
            ids(&default_filter_records(users(), &filter(json!({"tags": "b"})))),
            vec!["1", "2"]
        );
    }

    #[test]
    fn test_boolean_from_string() {
        assert_eq!(
            ids(&default_filter_records(users(), &filter(json!({"admin": "false"})))),
            vec!["2"]
        );
    }

    #[test]
    fn test_sort_missing_fields_last() {
        let mut records = users();
        sort_records(
            &mut records,
            &Sort {
                field: "admin".to_string(),
                order: SortOrder::Asc,
            },
        );
        assert_eq!(ids(&records), vec!["2", "1", "3"]);

        sort_records(
            &mut records,
            &Sort {
                field: "age".to_string(),
                order: SortOrder::Desc,
            },
        );
        assert_eq!(ids(&records), vec!["3", "1", "2"]);
    }

    #[test]
    fn test_query_reports_total_before_paging() {
        let query = ListQuery {
            pagination: Some(Pagination { page: 2, per_page: 1 }),
            sort: Some(Sort {
                field: "name".to_string(),
                order: SortOrder::Desc,
            }),
            filter: filter(json!({"age_gte": 26})),
            load_data: false,
        };
        let output = apply_query(users(), &query, default_filter_records);
        assert_eq!(output.total, 2);
        assert_eq!(ids(&output.records), vec!["1"]);
    }

    #[test]
    fn test_page_past_the_end_is_empty() {
        let page = paginate_records(users(), &Pagination { page: 5, per_page: DEFAULT_PER_PAGE });
        assert!(page.is_empty());
    }
}
