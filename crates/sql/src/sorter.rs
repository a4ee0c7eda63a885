//! Sort list to `ORDER BY` compilation.
//!
//! Structurally mirrors the in-memory comparator: the same sort list, the
//! same key-by-key stacking, emitted as SeaQuery `ORDER BY` clauses instead
//! of a closure.

use std::collections::HashMap;

use appello_query::sort::{SortDirection, SortList};
use sea_query::{Alias, Expr, Order, SelectStatement, SimpleExpr};

use crate::error::{SqlError, SqlResult};

/// Map from sort key to column expression, passed explicitly to
/// [`compile_sorter`].
#[derive(Clone, Default)]
pub struct SqlSortDefinitions {
    exprs: HashMap<String, SimpleExpr>,
}

impl SqlSortDefinitions {
    pub fn new() -> Self {
        Self {
            exprs: HashMap::new(),
        }
    }

    /// Register a plain column for a sort key.
    pub fn column(
        mut self,
        name: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        self.exprs.insert(
            name.into(),
            Expr::col((Alias::new(table.into()), Alias::new(column.into()))).into(),
        );
        self
    }

    /// Register an arbitrary expression for a sort key.
    pub fn expr(mut self, name: impl Into<String>, expr: SimpleExpr) -> Self {
        self.exprs.insert(name.into(), expr);
        self
    }

    fn get(&self, key: &str) -> SqlResult<&SimpleExpr> {
        self.exprs.get(key).ok_or_else(|| SqlError::UnknownSortKey {
            key: key.to_string(),
        })
    }
}

/// Compile a sort list into `ORDER BY` pairs.
pub fn compile_sorter(
    sort: &SortList,
    definitions: &SqlSortDefinitions,
) -> SqlResult<Vec<(SimpleExpr, Order)>> {
    sort.iter()
        .map(|item| {
            let expr = definitions.get(&item.key)?.clone();
            let order = match item.direction {
                SortDirection::Asc => Order::Asc,
                SortDirection::Desc => Order::Desc,
            };
            Ok((expr, order))
        })
        .collect()
}

/// Compile and apply a sort list onto a SELECT statement.
pub fn apply_sorter(
    query: &mut SelectStatement,
    sort: &SortList,
    definitions: &SqlSortDefinitions,
) -> SqlResult<()> {
    for (expr, order) in compile_sorter(sort, definitions)? {
        query.order_by_expr(expr, order);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use appello_query::sort::SortItem;
    use sea_query::{Asterisk, PostgresQueryBuilder, Query};

    use super::*;

    fn definitions() -> SqlSortDefinitions {
        SqlSortDefinitions::new()
            .column("name", "members", "name")
            .column("id", "members", "id")
    }

    #[test]
    fn order_by_stacks_keys_in_order() {
        let mut query = Query::select();
        query.column(Asterisk).from(Alias::new("members"));
        apply_sorter(
            &mut query,
            &vec![SortItem::desc("name"), SortItem::asc("id")],
            &definitions(),
        )
        .unwrap();

        let sql = query.to_string(PostgresQueryBuilder);
        assert!(
            sql.contains(r#"ORDER BY "members"."name" DESC, "members"."id" ASC"#),
            "{sql}"
        );
    }

    #[test]
    fn empty_sort_list_emits_no_order_by() {
        let mut query = Query::select();
        query.column(Asterisk).from(Alias::new("members"));
        apply_sorter(&mut query, &Vec::new(), &definitions()).unwrap();

        let sql = query.to_string(PostgresQueryBuilder);
        assert!(!sql.contains("ORDER BY"), "{sql}");
    }

    #[test]
    fn unknown_sort_key_fails_with_name() {
        let err = compile_sorter(&vec![SortItem::asc("height")], &definitions()).unwrap_err();
        assert_eq!(
            err,
            SqlError::UnknownSortKey {
                key: "height".to_string()
            }
        );
    }
}
