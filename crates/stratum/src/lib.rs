//! Stratum — a PostgreSQL data-access runtime.
//!
//! Stratum turns declarative record operations into SQL against a pooled
//! PostgreSQL backend, coordinates a read-through distributed cache, and
//! tracks schema evolution through ordered, transactional migrations.
//!
//! # The stack
//!
//! - [`Predicate`] / [`Filters`] — the algebra that renders structured
//!   filter values into WHERE clauses (`stratum-query`).
//! - [`Executor`] / [`TransactionContext`] — the pooled, transactional
//!   query surface with timing logs (`stratum-session`).
//! - [`Record`] / [`Entity`] — active records with dirty tracking and
//!   cache-aware finders.
//! - [`CacheStore`] — TTL'd cache with read-through and advisory locks
//!   (`stratum-cache`).
//! - [`Migrator`] — versioned, transactional schema migrations
//!   (`stratum-migrate`).
//!
//! # Example
//!
//! ```ignore
//! use stratum::prelude::*;
//!
//! entity! {
//!     pub struct Guild {
//!         table: "guilds",
//!         primary_key: "id",
//!         columns: [id, name, score],
//!     }
//! }
//!
//! let db = stratum::postgres_executor(PgConfig::new("db.internal", "app", "appdb"));
//! let cache = CacheStore::new(RespBackend::connect(&cx, "cache.internal:6379", timeout).await?);
//! let ctx = DataContext::new(db, cache);
//!
//! // Cached point lookup, 60s TTL.
//! let mut guild =
//!     Record::<Guild>::find(&cx, &ctx, 7, Some(Duration::from_secs(60))).await?;
//! guild.set("score", 11)?;
//! guild.save(&cx, &ctx).await?;
//! ```

pub mod context;
pub mod entity;
pub mod record;

pub use context::{DataContext, postgres_executor};
pub use entity::Entity;
pub use record::Record;

// Re-export the stack so applications depend on one crate.
pub use stratum_cache::{CacheBackend, CacheStore, MemoryBackend, RespBackend};
pub use stratum_core::{
    Connection, Cx, Error, Outcome, Row, Value, escape_literal, quote_ident, quote_literal,
};
pub use stratum_migrate::{DumpConfig, HISTORY_TABLE, MigrationStep, MigrationUnit, Migrator};
pub use stratum_pool::{Pool, PooledConnection};
pub use stratum_postgres::{PgConfig, SharedPgConnection};
pub use stratum_query::{FilterEntry, Filters, Predicate, filters};
pub use stratum_session::{Executor, QuerySurface, TransactionContext};

/// The common imports.
pub mod prelude {
    pub use crate::entity;
    pub use crate::filters;
    pub use crate::{
        CacheStore, Connection, Cx, DataContext, Entity, Error, Executor, Filters, MemoryBackend,
        Outcome, PgConfig, Predicate, QuerySurface, Record, RespBackend, Row, TransactionContext,
        Value,
    };
}
