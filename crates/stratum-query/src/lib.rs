//! Query building for the Stratum runtime.
//!
//! Three layers, each pure (no I/O, no side effects):
//!
//! - [`predicate`] — the algebra of WHERE-clause conditions. Every variant
//!   renders itself into a SQL fragment given a column name.
//! - [`filter`] — insertion-ordered column→value/predicate maps. Key order
//!   is preserved into the rendered WHERE clause and into cache-key
//!   derivation; callers rely on that.
//! - [`statement`] — full SELECT/INSERT/UPDATE/DELETE rendering with named
//!   `:param` placeholders, the array-to-IN inlining rewrite, and the
//!   named-to-positional conversion the driver needs.
//!
//! The filter-map surface (`column → scalar | null | list | Predicate`) is
//! the one stable contract between the record layer and calling code;
//! changing any rendering rule here is a breaking change.

pub mod filter;
pub mod predicate;
pub mod statement;

pub use filter::{FilterEntry, Filters, RenderedWhere};
pub use predicate::Predicate;
pub use statement::{Statement, inline_arrays, replace_placeholder, to_positional};
