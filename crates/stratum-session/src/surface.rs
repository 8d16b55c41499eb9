//! The shared query surface.
//!
//! Everything callers do with a database — inside or outside a transaction —
//! goes through [`QuerySurface`]. Implementors provide the two dispatch
//! hooks; every operation is a default method that renders a statement and
//! dispatches it.

use std::future::Future;

use asupersync::{Cx, Outcome};
use stratum_core::error::{Error, QueryError, QueryErrorKind};
use stratum_core::{Row, Value};
use stratum_query::{Filters, statement};

/// The operation set shared by `Executor` and `TransactionContext`.
pub trait QuerySurface: Sync {
    /// Dispatch a rendered statement and collect its rows. When
    /// `prepare_array` is set, array-valued binds are inlined into the SQL
    /// text first (the driver cannot bind array parameters).
    fn dispatch_rows(
        &self,
        cx: &Cx,
        sql: String,
        binds: Vec<(String, Value)>,
        prepare_array: bool,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Dispatch a rendered statement and return the affected-row count.
    fn dispatch_affected(
        &self,
        cx: &Cx,
        sql: String,
        binds: Vec<(String, Value)>,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// `SELECT <columns> FROM "table" [WHERE ...] [ORDER BY ...]
    /// [LIMIT ...] [OFFSET ...]` — returns all matching rows, no implicit
    /// limit.
    fn select(
        &self,
        cx: &Cx,
        table: &str,
        filters: &Filters,
        columns: &[&str],
        limit: Option<u64>,
        offset: Option<u64>,
        order: Option<&str>,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let stmt = statement::select(table, filters, columns, limit, offset, order);
        self.dispatch_rows(cx, stmt.sql, stmt.binds, true)
    }

    /// First matching row, if any (`select` with LIMIT 1).
    fn find_by(
        &self,
        cx: &Cx,
        table: &str,
        filters: &Filters,
        columns: &[&str],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        let rows = self.select(cx, table, filters, columns, Some(1), None, None);
        async move {
            match rows.await {
                Outcome::Ok(rows) => Outcome::Ok(rows.into_iter().next()),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    /// Whether any row matches the filters.
    fn exists(
        &self,
        cx: &Cx,
        table: &str,
        filters: &Filters,
    ) -> impl Future<Output = Outcome<bool, Error>> + Send {
        let row = self.find_by(cx, table, filters, &["1"]);
        async move {
            match row.await {
                Outcome::Ok(row) => Outcome::Ok(row.is_some()),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    /// Count of matching rows.
    fn count(
        &self,
        cx: &Cx,
        table: &str,
        filters: &Filters,
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        let row = self.find_by(cx, table, filters, &["count(*) AS c"]);
        async move {
            match row.await {
                Outcome::Ok(row) => match row.as_ref().and_then(|r| r.get_named("c")) {
                    Some(value) => match value.as_i64() {
                        Some(n) => Outcome::Ok(n),
                        None => Outcome::Err(Error::Query(QueryError::new(
                            QueryErrorKind::Database,
                            "count(*) returned a non-integer value",
                        ))),
                    },
                    None => Outcome::Err(Error::Query(QueryError::new(
                        QueryErrorKind::Database,
                        "count(*) returned no row",
                    ))),
                },
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    /// `INSERT INTO "table" (cols) VALUES (binds) [ON CONFLICT ...]
    /// [RETURNING *]`. Returns the returned row when `returning` is set.
    ///
    /// Arrays in the value map are not inlined here; they reach the driver
    /// and fail there, matching the original surface.
    fn insert(
        &self,
        cx: &Cx,
        table: &str,
        values: &[(String, Value)],
        returning: bool,
        on_conflict: Option<&str>,
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        let stmt = statement::insert(table, values, returning, on_conflict);
        let rows = self.dispatch_rows(cx, stmt.sql, stmt.binds, false);
        async move {
            match rows.await {
                Outcome::Ok(rows) => Outcome::Ok(rows.into_iter().next()),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    /// `UPDATE "table" SET col = :bind, ... [WHERE ...]` — returns the
    /// affected-row count. Array-valued WHERE values bypass parameter
    /// binding and are inlined via literal escaping.
    fn update(
        &self,
        cx: &Cx,
        table: &str,
        set: &[(String, Value)],
        filters: &Filters,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let stmt = statement::update(table, set, filters);
        self.dispatch_affected(cx, stmt.sql, stmt.binds)
    }

    /// `DELETE FROM "table" [WHERE ...]` — returns the deleted rows (empty
    /// unless the statement carries RETURNING).
    fn delete(
        &self,
        cx: &Cx,
        table: &str,
        filters: &Filters,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let stmt = statement::delete(table, filters);
        self.dispatch_rows(cx, stmt.sql, stmt.binds, true)
    }

    /// The shared low-level entry point: run `sql` with a named bind map.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        binds: Vec<(String, Value)>,
        prepare_array: bool,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        self.dispatch_rows(cx, sql.to_string(), binds, prepare_array)
    }

    /// Run a literal statement with no parameter binding (DDL path).
    fn query(&self, cx: &Cx, sql: &str) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        self.dispatch_rows(cx, sql.to_string(), Vec::new(), false)
    }
}
