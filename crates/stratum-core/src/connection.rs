//! The driver contract.
//!
//! A [`Connection`] executes already-rendered SQL with positional `$n`
//! parameters. Named-placeholder rendering, the array-to-IN rewrite, and
//! statement logging all happen above this trait in `stratum-session`;
//! drivers only speak the wire protocol.

// Allow `impl Future` return types in trait methods - intentional for async trait compat
#![allow(clippy::manual_async_fn)]

use crate::error::Error;
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};
use std::future::Future;

/// A database connection usable from concurrent contexts.
///
/// Implementations are expected to provide interior mutability (the driver
/// wraps its protocol state in a mutex) so the pool can hand shared
/// references to callers. Cancellation must be observed via the `Cx`: an
/// operation invoked with a cancelled context returns `Outcome::Cancelled`
/// without touching the wire.
pub trait Connection: Send + Sync + 'static {
    /// Run a statement and return all result rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Run a statement and return the affected-row count.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Cheap liveness probe, used by the pool before reusing an idle
    /// connection is worth the round trip. Defaults to `SELECT 1`.
    fn ping(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        async move {
            match self.execute(cx, "SELECT 1", &[]).await {
                Outcome::Ok(_) => Outcome::Ok(()),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }
}
