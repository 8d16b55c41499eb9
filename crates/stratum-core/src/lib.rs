//! Core types and traits for the Stratum data-access runtime.
//!
//! `stratum-core` is the contract layer the rest of the workspace builds on.
//!
//! # Role In The Architecture
//!
//! - **Data model**: [`Value`] and [`Row`] represent query inputs and outputs
//!   and are shared across the query, session, cache, and driver crates.
//! - **Contract layer**: [`Connection`] is the trait implemented by database
//!   drivers and consumed by the pool and the executor.
//! - **Escaping choke point**: [`escape_literal`] is the one function through
//!   which every value inlined into SQL text passes — array rewrites in the
//!   executor and parameter inlining in the debug log both go through it.
//! - **Structured concurrency**: re-exports `Cx` and `Outcome` from
//!   asupersync so every async database operation is cancel-correct.
//!
//! Most applications should use the `stratum` facade; reach for
//! `stratum-core` directly when writing drivers or cache backends.

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Budget, Cx, Outcome, RegionId, TaskId};

pub mod connection;
pub mod error;
pub mod identifiers;
pub mod row;
pub mod value;

pub use connection::Connection;
pub use error::{
    ConnectionError, ConnectionErrorKind, Error, ProtocolError, QueryError, QueryErrorKind, Result,
};
pub use identifiers::quote_ident;
pub use row::{ColumnInfo, Row};
pub use value::{Value, escape_literal, quote_literal};
