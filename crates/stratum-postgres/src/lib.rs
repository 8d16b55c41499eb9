//! PostgreSQL driver for the Stratum data-access runtime.
//!
//! Implements `stratum-core`'s [`Connection`](stratum_core::Connection)
//! contract over asupersync's TCP primitives:
//!
//! - Async connect + authentication (trust, cleartext password, MD5)
//! - Extended query protocol for parameterized statements (text format)
//! - Row decoding via type OIDs
//! - SQLSTATE-carrying errors (the migration runner keys off `42P01`)
//!
//! The executor hands this driver positional `$n` SQL; named placeholders
//! and the array-inlining rewrite live a layer up in `stratum-session`.

pub mod config;
pub mod connection;
pub mod protocol;
pub mod types;

pub use config::PgConfig;
pub use connection::{PgConnection, SharedPgConnection};
