//! The injected runtime handles.
//!
//! A [`DataContext`] bundles the executor and the cache store; record
//! finders take it by reference. Both handles are constructed once at
//! process start and passed down explicitly — there is no process-wide
//! singleton.

use stratum_cache::{CacheBackend, CacheStore};
use stratum_core::Connection;
use stratum_pool::Pool;
use stratum_postgres::{PgConfig, SharedPgConnection};
use stratum_session::Executor;

/// The executor + cache pair the record layer runs against.
#[derive(Debug)]
pub struct DataContext<C: Connection, B: CacheBackend> {
    /// The query executor.
    pub db: Executor<C>,
    /// The cache store.
    pub cache: CacheStore<B>,
}

impl<C: Connection, B: CacheBackend> DataContext<C, B> {
    /// Bundle an executor and a cache store.
    pub fn new(db: Executor<C>, cache: CacheStore<B>) -> Self {
        Self { db, cache }
    }
}

/// Build a pooled executor over PostgreSQL connections for `config`.
///
/// Connections are created lazily as the pool demands them.
pub fn postgres_executor(config: PgConfig) -> Executor<SharedPgConnection> {
    let pool = Pool::new(config.pool_size);
    Executor::new(pool, move || {
        let config = config.clone();
        async move { SharedPgConnection::connect_detached(config).await }
    })
}
