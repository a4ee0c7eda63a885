//! List and count query assembly for filtered requests.
//!
//! [`ListQueryBuilder`] is configured once per entity type with the base
//! table, filter and sort definitions, an optional required filter (access
//! scoping), and the search-to-filter translation, which is backend-defined
//! per entity. It then turns each incoming request into a complete SELECT
//! or COUNT statement: required filter AND request filter AND search AND
//! keyset page filter, ordered and limited.

use std::sync::Arc;

use appello_query::filter::Filter;
use appello_query::request::{CountFilteredRequest, LimitedFilteredRequest};
use sea_query::{Alias, Asterisk, Expr, ExprTrait, Query, SelectStatement};

use crate::compiler::{SqlFilterDefinitions, compile_filter};
use crate::error::SqlResult;
use crate::sorter::{SqlSortDefinitions, apply_sorter};

/// Translates a free-text search string into a filter for one entity type.
pub type SearchFilterBuilder = Arc<dyn Fn(&str) -> Option<Filter> + Send + Sync>;

/// Builds SELECT/COUNT statements for filtered list requests.
pub struct ListQueryBuilder {
    base_table: String,
    filters: SqlFilterDefinitions,
    sorters: SqlSortDefinitions,
    required_filter: Option<Filter>,
    search_filter: Option<SearchFilterBuilder>,
}

impl ListQueryBuilder {
    pub fn new(
        base_table: impl Into<String>,
        filters: SqlFilterDefinitions,
        sorters: SqlSortDefinitions,
    ) -> Self {
        Self {
            base_table: base_table.into(),
            filters,
            sorters,
            required_filter: None,
            search_filter: None,
        }
    }

    /// Filter unconditionally ANDed into every query (e.g. access scoping).
    pub fn with_required_filter(mut self, filter: Filter) -> Self {
        self.required_filter = Some(filter);
        self
    }

    /// How a `search` string becomes a filter for this entity type.
    pub fn with_search_filter(
        mut self,
        builder: impl Fn(&str) -> Option<Filter> + Send + Sync + 'static,
    ) -> Self {
        self.search_filter = Some(Arc::new(builder));
        self
    }

    /// Build the row query for one page.
    pub fn build_select(&self, request: &LimitedFilteredRequest) -> SqlResult<SelectStatement> {
        let mut query = Query::select();
        query
            .column((Alias::new(&self.base_table), Asterisk))
            .from(Alias::new(&self.base_table));

        self.apply_filters(&mut query, request.filter.as_ref(), request.search.as_deref())?;

        if let Some(page_filter) = &request.page_filter {
            query.cond_where(compile_filter(page_filter, &self.filters)?);
        }

        apply_sorter(&mut query, &request.sort, &self.sorters)?;
        query.limit(u64::from(request.limit));

        Ok(query.take())
    }

    /// Build the matching COUNT(*) query, without paging.
    pub fn build_count(&self, request: &CountFilteredRequest) -> SqlResult<SelectStatement> {
        let mut query = Query::select();
        query
            .expr(Expr::col(Asterisk).count())
            .from(Alias::new(&self.base_table));

        self.apply_filters(&mut query, request.filter.as_ref(), request.search.as_deref())?;

        Ok(query.take())
    }

    fn apply_filters(
        &self,
        query: &mut SelectStatement,
        filter: Option<&Filter>,
        search: Option<&str>,
    ) -> SqlResult<()> {
        if let Some(required) = &self.required_filter {
            query.cond_where(compile_filter(required, &self.filters)?);
        }

        if let Some(filter) = filter {
            query.cond_where(compile_filter(filter, &self.filters)?);
        }

        if let Some(search) = search
            && let Some(builder) = &self.search_filter
            && let Some(search_filter) = builder(search)
        {
            query.cond_where(compile_filter(&search_filter, &self.filters)?);
        }

        Ok(())
    }
}
