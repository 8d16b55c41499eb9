//! The pooled executor and the transaction context.

use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use asupersync::sync::Mutex;
use asupersync::{Cx, Outcome};
use regex::Regex;
use stratum_core::error::{ConnectionError, ConnectionErrorKind};
use stratum_core::{Connection, Error, Row, Value, escape_literal};
use stratum_pool::{InvalidationHandle, Pool, PooledConnection};
use stratum_query::{inline_arrays, replace_placeholder, to_positional};

use crate::surface::QuerySurface;

type ConnFactory<C> =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Outcome<C, Error>> + Send>> + Send + Sync>;

/// The process-wide query executor.
///
/// Owns the pool and a factory for new connections; each statement checks a
/// connection out for exactly its own duration. Cloning shares the pool and
/// the transaction-scope flag.
pub struct Executor<C: Connection> {
    pool: Pool<C>,
    factory: ConnFactory<C>,
    tx_active: Arc<AtomicBool>,
}

impl<C: Connection> Clone for Executor<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            factory: Arc::clone(&self.factory),
            tx_active: Arc::clone(&self.tx_active),
        }
    }
}

impl<C: Connection> std::fmt::Debug for Executor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("pool", &self.pool)
            .field("tx_active", &self.tx_active.load(Ordering::Relaxed))
            .finish()
    }
}

impl<C: Connection> Executor<C> {
    /// Create an executor over `pool`, creating connections with `factory`
    /// as demand requires.
    pub fn new<F, Fut>(pool: Pool<C>, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome<C, Error>> + Send + 'static,
    {
        Self {
            pool,
            factory: Arc::new(move || {
                Box::pin(factory()) as Pin<Box<dyn Future<Output = Outcome<C, Error>> + Send>>
            }),
            tx_active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &Pool<C> {
        &self.pool
    }

    /// Whether a transaction scope is currently open on this executor.
    pub fn transaction_active(&self) -> bool {
        self.tx_active.load(Ordering::Acquire)
    }

    async fn checkout(&self, cx: &Cx) -> Outcome<PooledConnection<C>, Error> {
        self.pool.acquire(cx, || (self.factory)()).await
    }

    /// Open a transaction scope.
    ///
    /// Fails fast with [`Error::TransactionAlreadyActive`] when a scope is
    /// already open — concurrent callers must not silently interleave. The
    /// returned context pins one pooled connection until it is committed,
    /// rolled back, or dropped (drop discards the connection).
    pub async fn begin_transaction(&self, cx: &Cx) -> Outcome<TransactionContext<C>, Error> {
        if self.tx_active.swap(true, Ordering::AcqRel) {
            return Outcome::Err(Error::TransactionAlreadyActive);
        }

        let conn = match self.checkout(cx).await {
            Outcome::Ok(conn) => conn,
            other => {
                self.tx_active.store(false, Ordering::Release);
                return match other {
                    Outcome::Ok(_) => unreachable!(),
                    Outcome::Err(e) => Outcome::Err(e),
                    Outcome::Cancelled(r) => Outcome::Cancelled(r),
                    Outcome::Panicked(p) => Outcome::Panicked(p),
                };
            }
        };

        match run_affected(&*conn, cx, "BEGIN".to_string(), Vec::new()).await {
            Outcome::Ok(_) => {}
            other => {
                conn.invalidate();
                self.tx_active.store(false, Ordering::Release);
                return match other {
                    Outcome::Ok(_) => unreachable!(),
                    Outcome::Err(e) => Outcome::Err(e),
                    Outcome::Cancelled(r) => Outcome::Cancelled(r),
                    Outcome::Panicked(p) => Outcome::Panicked(p),
                };
            }
        }

        let invalidate = conn.invalidation_handle();
        Outcome::Ok(TransactionContext {
            conn: Arc::new(Mutex::new(conn)),
            invalidate,
            scope: Arc::clone(&self.tx_active),
            finished: AtomicBool::new(false),
        })
    }

    /// Run `body` inside a transaction scope.
    ///
    /// Commits on normal return; rolls back and re-propagates on any
    /// failure from `body`, including cancellation — "rollback once,
    /// propagate" is the only retry policy.
    pub async fn transaction<T, F>(&self, cx: &Cx, body: F) -> Outcome<T, Error>
    where
        F: AsyncFnOnce(&TransactionContext<C>) -> Outcome<T, Error>,
    {
        let tx = match self.begin_transaction(cx).await {
            Outcome::Ok(tx) => tx,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        match body(&tx).await {
            Outcome::Ok(value) => match tx.commit(cx).await {
                Outcome::Ok(()) => Outcome::Ok(value),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            },
            Outcome::Err(e) => {
                let _ = tx.rollback(cx).await;
                Outcome::Err(e)
            }
            Outcome::Cancelled(r) => {
                let _ = tx.rollback(cx).await;
                Outcome::Cancelled(r)
            }
            Outcome::Panicked(p) => {
                let _ = tx.rollback(cx).await;
                Outcome::Panicked(p)
            }
        }
    }
}

impl<C: Connection> QuerySurface for Executor<C> {
    fn dispatch_rows(
        &self,
        cx: &Cx,
        sql: String,
        binds: Vec<(String, Value)>,
        prepare_array: bool,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        async move {
            let conn = match self.checkout(cx).await {
                Outcome::Ok(conn) => conn,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            run_rows(&*conn, cx, sql, binds, prepare_array).await
        }
    }

    fn dispatch_affected(
        &self,
        cx: &Cx,
        sql: String,
        binds: Vec<(String, Value)>,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        async move {
            let conn = match self.checkout(cx).await {
                Outcome::Ok(conn) => conn,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            run_affected(&*conn, cx, sql, binds).await
        }
    }
}

/// A transaction scope: the full query surface pinned to one connection.
///
/// Obtained from [`Executor::begin_transaction`] or inside
/// [`Executor::transaction`]. Once committed or rolled back the context
/// cannot be reused; further finishes fail with `TransactionNotActive`.
pub struct TransactionContext<C: Connection> {
    conn: Arc<Mutex<PooledConnection<C>>>,
    invalidate: InvalidationHandle,
    scope: Arc<AtomicBool>,
    finished: AtomicBool,
}

impl<C: Connection> TransactionContext<C> {
    /// Commit the transaction and release the connection back to the pool.
    pub async fn commit(&self, cx: &Cx) -> Outcome<(), Error> {
        self.finish(cx, "COMMIT").await
    }

    /// Roll the transaction back and release the connection.
    pub async fn rollback(&self, cx: &Cx) -> Outcome<(), Error> {
        self.finish(cx, "ROLLBACK").await
    }

    async fn finish(&self, cx: &Cx, sql: &'static str) -> Outcome<(), Error> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return Outcome::Err(Error::TransactionNotActive);
        }

        let result = {
            let Ok(guard) = self.conn.lock(cx).await else {
                self.invalidate.invalidate();
                self.scope.store(false, Ordering::Release);
                return Outcome::Err(lock_error());
            };
            run_affected(&**guard, cx, sql.to_string(), Vec::new()).await
        };

        self.scope.store(false, Ordering::Release);
        match result {
            Outcome::Ok(_) => Outcome::Ok(()),
            other => {
                // The server-side transaction state is unknown; never hand
                // this connection to another caller.
                self.invalidate.invalidate();
                match other {
                    Outcome::Ok(_) => unreachable!(),
                    Outcome::Err(e) => Outcome::Err(e),
                    Outcome::Cancelled(r) => Outcome::Cancelled(r),
                    Outcome::Panicked(p) => Outcome::Panicked(p),
                }
            }
        }
    }
}

impl<C: Connection> QuerySurface for TransactionContext<C> {
    fn dispatch_rows(
        &self,
        cx: &Cx,
        sql: String,
        binds: Vec<(String, Value)>,
        prepare_array: bool,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        async move {
            if self.finished.load(Ordering::Acquire) {
                return Outcome::Err(Error::TransactionNotActive);
            }
            let Ok(guard) = self.conn.lock(cx).await else {
                return Outcome::Err(lock_error());
            };
            run_rows(&**guard, cx, sql, binds, prepare_array).await
        }
    }

    fn dispatch_affected(
        &self,
        cx: &Cx,
        sql: String,
        binds: Vec<(String, Value)>,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        async move {
            if self.finished.load(Ordering::Acquire) {
                return Outcome::Err(Error::TransactionNotActive);
            }
            let Ok(guard) = self.conn.lock(cx).await else {
                return Outcome::Err(lock_error());
            };
            run_affected(&**guard, cx, sql, binds).await
        }
    }
}

impl<C: Connection> Drop for TransactionContext<C> {
    fn drop(&mut self) {
        if !self.finished.load(Ordering::Acquire) {
            // No async work in Drop: discard the pinned connection so the
            // server rolls back on socket close, and reopen the scope.
            self.invalidate.invalidate();
            self.scope.store(false, Ordering::Release);
            tracing::warn!(
                "transaction scope dropped without commit/rollback; connection discarded"
            );
        }
    }
}

impl<C: Connection> std::fmt::Debug for TransactionContext<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("finished", &self.finished.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// ==================== Statement execution ====================

async fn run_rows<C: Connection>(
    conn: &C,
    cx: &Cx,
    sql: String,
    binds: Vec<(String, Value)>,
    prepare_array: bool,
) -> Outcome<Vec<Row>, Error> {
    if let Some(reason) = cx.cancel_reason() {
        return Outcome::Cancelled(reason);
    }
    let start = Instant::now();

    let (sql, binds) = if prepare_array {
        inline_arrays(sql, binds)
    } else {
        (sql, binds)
    };
    let (positional, params) = match to_positional(&sql, &binds) {
        Ok(v) => v,
        Err(e) => return Outcome::Err(e),
    };

    let result = conn.query(cx, &positional, &params).await;
    if matches!(result, Outcome::Ok(_)) {
        log_statement(start, &sql, &binds);
    }
    result
}

async fn run_affected<C: Connection>(
    conn: &C,
    cx: &Cx,
    sql: String,
    binds: Vec<(String, Value)>,
) -> Outcome<u64, Error> {
    if let Some(reason) = cx.cancel_reason() {
        return Outcome::Cancelled(reason);
    }
    let start = Instant::now();

    let (positional, params) = match to_positional(&sql, &binds) {
        Ok(v) => v,
        Err(e) => return Outcome::Err(e),
    };

    let result = conn.execute(cx, &positional, &params).await;
    if matches!(result, Outcome::Ok(_)) {
        log_statement(start, &sql, &binds);
    }
    result
}

/// Debug-log a completed statement with parameters inlined and whitespace
/// collapsed. Must never alter query semantics; the inlining goes through
/// the same `escape_literal` used for real rewrites.
fn log_statement(start: Instant, sql: &str, binds: &[(String, Value)]) {
    if !tracing::enabled!(target: "stratum::sql", tracing::Level::DEBUG) {
        return;
    }

    static COLLAPSE: OnceLock<Regex> = OnceLock::new();
    let collapse = COLLAPSE.get_or_init(|| Regex::new(r"\s\s+").expect("whitespace regex"));

    let mut rendered = sql.to_string();
    for (name, value) in binds {
        rendered = replace_placeholder(&rendered, name, &escape_literal(value));
    }
    let rendered = collapse.replace_all(&rendered, " ");
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    tracing::debug!(target: "stratum::sql", "SQL ({elapsed_ms:.2}ms) {rendered}");
}

fn lock_error() -> Error {
    Error::Connection(ConnectionError::new(
        ConnectionErrorKind::Disconnected,
        "failed to acquire connection lock",
    ))
}
