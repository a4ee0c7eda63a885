#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Keyset pagination round-trip tests.
//!
//! Paginates a full in-memory dataset with the compiled comparator and the
//! synthesized page filters together, and checks the pages reassemble the
//! exact ordered dataset: no row skipped, none repeated.

use appello_query::{
    Filter, FilterDefinitions, FilterValue, LimitedFilteredRequest, SortDefinitions, SortItem,
    SortList, compile_filter, compile_sorter, merge_filters, next_request,
};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
struct Member {
    id: String,
    age: i64,
    name: String,
}

fn dataset() -> Vec<Member> {
    // Ages repeat on purpose so the id tiebreaker does real work
    let names = [
        "noor", "ada", "grace", "mila", "finn", "lena", "otto", "ada", "bram", "sofie", "jef",
        "lena", "otto", "noor", "finn",
    ];
    (0..30)
        .map(|i| Member {
            id: format!("m{:02}", (i * 7) % 30),
            age: 10 + (i % 5),
            name: names[(i % names.len() as i64) as usize].to_string(),
        })
        .collect()
}

fn sort_definitions() -> SortDefinitions<Member> {
    SortDefinitions::new()
        .key("id", |m: &Member| FilterValue::String(m.id.clone()))
        .key("age", |m: &Member| FilterValue::Integer(m.age))
        .key("name", |m: &Member| FilterValue::String(m.name.clone()))
}

fn filter_definitions() -> FilterDefinitions {
    FilterDefinitions::new()
        .field("id", "id")
        .field("age", "age")
        .field("name", "name")
}

/// Minimal backend: filter, sort, truncate.
fn fetch_page(rows: &[Member], request: &LimitedFilteredRequest) -> Vec<Member> {
    let filter = merge_filters([request.filter.clone(), request.page_filter.clone()]);
    let runner = filter.map(|f| compile_filter(&f, &filter_definitions()).unwrap());
    let sorter = compile_sorter(&request.sort, &sort_definitions()).unwrap();

    let mut page: Vec<Member> = rows
        .iter()
        .filter(|m| {
            runner
                .as_ref()
                .is_none_or(|r| r(&serde_json::to_value(m).unwrap()))
        })
        .cloned()
        .collect();
    page.sort_by(|a, b| sorter(a, b));
    page.truncate(request.limit as usize);
    page
}

fn paginate(sort: SortList, limit: u32, filter: Option<Filter>) -> Vec<String> {
    let rows = dataset();
    let mut request = LimitedFilteredRequest::new(filter, sort, limit, None);
    let mut collected = Vec::new();

    loop {
        let page = fetch_page(&rows, &request);
        let done = page.is_empty();
        collected.extend(page.iter().map(|m| m.id.clone()));
        match next_request(&page, &sort_definitions(), &request).unwrap() {
            Some(next) if !done => request = next,
            _ => break,
        }
    }

    collected
}

fn expected_order(sort: &SortList, filter: Option<&Filter>) -> Vec<String> {
    let sorter = compile_sorter(sort, &sort_definitions()).unwrap();
    let runner = filter.map(|f| compile_filter(f, &filter_definitions()).unwrap());
    let mut rows: Vec<Member> = dataset()
        .into_iter()
        .filter(|m| {
            runner
                .as_ref()
                .is_none_or(|r| r(&serde_json::to_value(m).unwrap()))
        })
        .collect();
    rows.sort_by(|a, b| sorter(a, b));
    rows.into_iter().map(|m| m.id).collect()
}

#[test]
fn pagination_covers_dataset_exactly_once_ascending() {
    let sort = vec![SortItem::asc("age"), SortItem::asc("id")];
    assert_eq!(paginate(sort.clone(), 4, None), expected_order(&sort, None));
}

#[test]
fn pagination_covers_dataset_exactly_once_descending() {
    let sort = vec![SortItem::desc("age"), SortItem::desc("id")];
    assert_eq!(paginate(sort.clone(), 7, None), expected_order(&sort, None));
}

#[test]
fn pagination_with_tied_string_key() {
    // Names repeat heavily: every tie must fall through to id
    let sort = vec![SortItem::asc("name"), SortItem::asc("id")];
    assert_eq!(paginate(sort.clone(), 3, None), expected_order(&sort, None));
}

#[test]
fn pagination_respects_base_filter() {
    let sort = vec![SortItem::asc("age"), SortItem::asc("id")];
    let filter = Filter::gt("age", 11);
    assert_eq!(
        paginate(sort.clone(), 5, Some(filter.clone())),
        expected_order(&sort, Some(&filter))
    );
}

#[test]
fn page_size_one_still_advances() {
    let sort = vec![SortItem::asc("age"), SortItem::asc("id")];
    assert_eq!(paginate(sort.clone(), 1, None), expected_order(&sort, None));
}
