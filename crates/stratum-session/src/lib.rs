//! Query execution for the Stratum runtime.
//!
//! [`Executor`] owns the connection pool and checks a connection out per
//! statement; [`TransactionContext`] is the same query surface pinned to one
//! connection for the lifetime of a transaction scope. Both implement
//! [`QuerySurface`], so code that targets the trait runs identically inside
//! and outside a transaction — the migration runner and the record layer
//! rely on that.
//!
//! # Transactions
//!
//! At most one transaction scope may be open per executor at a time;
//! [`Executor::begin_transaction`] fails fast with
//! `TransactionAlreadyActive` rather than letting scopes interleave.
//! Finishing a finished scope fails with `TransactionNotActive`. The scoped
//! helper [`Executor::transaction`] commits on success and rolls back and
//! re-propagates on every failure path, including cancellation.
//!
//! # Logging
//!
//! Every executed statement is timed. When DEBUG is enabled for the
//! `stratum::sql` target, the statement is rendered with its parameters
//! inlined through the literal-escaping choke point and logged with the
//! elapsed milliseconds. Disabled, the path costs one branch.

pub mod executor;
pub mod surface;

pub use executor::{Executor, TransactionContext};
pub use surface::QuerySurface;
