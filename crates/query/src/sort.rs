//! Sort lists and in-memory comparator synthesis.
//!
//! A [`SortList`] is an ordered sequence of `(key, direction)` instructions
//! shared by the SQL `ORDER BY` generator, the in-memory comparator, and
//! the keyset pagination engine. On the wire it is a comma-separated token
//! list: `"name ASC,id ASC"`.
//!
//! [`SortDefinitions`] maps sort keys to value extractors. The same map
//! drives comparator synthesis here and page-boundary filter synthesis in
//! [`crate::keyset`], which is what keeps SQL ordering, in-memory ordering
//! and keyset filters consistent with each other.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};
use crate::filter::FilterValue;

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    /// Wire token (`ASC`/`DESC`).
    pub fn token(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    fn from_token(token: &str) -> Option<SortDirection> {
        match token {
            "ASC" => Some(SortDirection::Asc),
            "DESC" => Some(SortDirection::Desc),
            _ => None,
        }
    }
}

/// One sort instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortItem {
    pub key: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortItem {
    pub fn new(key: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            key: key.into(),
            direction,
        }
    }

    pub fn asc(key: impl Into<String>) -> Self {
        Self::new(key, SortDirection::Asc)
    }

    pub fn desc(key: impl Into<String>) -> Self {
        Self::new(key, SortDirection::Desc)
    }
}

impl fmt::Display for SortItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.key, self.direction.token())
    }
}

/// Ordered list of sort instructions.
///
/// The pagination engine assumes the list totally orders the result set;
/// callers append a unique tiebreaker via [`assert_sort`].
pub type SortList = Vec<SortItem>;

/// Encode a sort list as comma-separated `"key ORDER"` tokens.
pub fn encode_sort_list(sort: &SortList) -> String {
    sort.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse the comma-token wire encoding. Empty input yields an empty list.
pub fn parse_sort_list(text: &str) -> QueryResult<SortList> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }

    text.split(',')
        .map(|token| {
            let token = token.trim();
            let (key, direction) = match token.split_once(' ') {
                Some((key, dir)) => {
                    let direction = SortDirection::from_token(dir.trim()).ok_or_else(|| {
                        QueryError::InvalidSort(format!("unknown sort direction: {dir}"))
                    })?;
                    (key, direction)
                }
                // A bare key defaults to ascending
                None => (token, SortDirection::Asc),
            };
            if key.is_empty() {
                return Err(QueryError::InvalidSort("empty sort key".to_string()));
            }
            Ok(SortItem::new(key, direction))
        })
        .collect()
}

/// Serde adapter for the comma-token encoding on DTO fields.
pub mod sort_codec {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{SortList, encode_sort_list, parse_sort_list};

    pub fn serialize<S: Serializer>(sort: &SortList, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode_sort_list(sort))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SortList, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_sort_list(&text).map_err(D::Error::custom)
    }
}

/// Append `tiebreaker` to the sort list when missing, inheriting the first
/// item's direction, so the list totally orders any result set with a
/// unique value for that key.
pub fn assert_sort(mut sort: SortList, tiebreaker: &str) -> SortList {
    if sort.iter().any(|item| item.key == tiebreaker) {
        return sort;
    }
    let direction = sort.first().map(|item| item.direction).unwrap_or_default();
    sort.push(SortItem::new(tiebreaker, direction));
    sort
}

/// Extracts the sortable value for one key from an entity.
pub type ValueGetter<T> = Arc<dyn Fn(&T) -> FilterValue + Send + Sync>;

/// Map from sort key to value extractor, passed explicitly to the
/// comparator and keyset engines.
pub struct SortDefinitions<T> {
    getters: HashMap<String, ValueGetter<T>>,
}

impl<T> Default for SortDefinitions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SortDefinitions<T> {
    fn clone(&self) -> Self {
        Self {
            getters: self.getters.clone(),
        }
    }
}

impl<T> SortDefinitions<T> {
    pub fn new() -> Self {
        Self {
            getters: HashMap::new(),
        }
    }

    /// Register an extractor for a sort key.
    pub fn key(
        mut self,
        name: impl Into<String>,
        getter: impl Fn(&T) -> FilterValue + Send + Sync + 'static,
    ) -> Self {
        self.getters.insert(name.into(), Arc::new(getter));
        self
    }

    /// Look up the extractor for a key, failing with the key name.
    pub fn get(&self, key: &str) -> QueryResult<&ValueGetter<T>> {
        self.getters.get(key).ok_or_else(|| QueryError::UnknownSortKey {
            key: key.to_string(),
        })
    }
}

/// Composed comparator over a sort list.
pub type Sorter<T> = Box<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Compile a sort list into a stable lexicographic comparator: the first
/// non-equal key wins, ties fall through to the next key, descending keys
/// reverse their comparison.
pub fn compile_sorter<T: 'static>(sort: &SortList, definitions: &SortDefinitions<T>) -> QueryResult<Sorter<T>> {
    let stack: Vec<(ValueGetter<T>, SortDirection)> = sort
        .iter()
        .map(|item| Ok((definitions.get(&item.key)?.clone(), item.direction)))
        .collect::<QueryResult<_>>()?;

    Ok(Box::new(move |a, b| {
        for (getter, direction) in &stack {
            let ordering = getter(a).compare(&getter(b));
            let ordering = match direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }))
}
