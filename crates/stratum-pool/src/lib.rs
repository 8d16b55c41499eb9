//! Connection pooling for the Stratum runtime.
//!
//! The pool is the unit of concurrency-safe sharing: callers check a
//! connection out per logical operation and the guard returns it on drop.
//! Connections are created lazily through a factory supplied at acquire
//! time, so the pool itself stays driver-agnostic.
//!
//! # Example
//!
//! ```ignore
//! let pool = Pool::new(8);
//! let conn = pool.acquire(&cx, || connect(config.clone())).await?;
//! conn.query(&cx, "SELECT 1", &[]).await?;
//! // drop returns the connection to the idle set
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use asupersync::{Cx, Outcome};
use stratum_core::{Connection, Error};

struct PoolState<C> {
    idle: Vec<C>,
    total: usize,
}

struct PoolInner<C> {
    state: Mutex<PoolState<C>>,
    max_size: usize,
}

/// A fixed-capacity connection pool.
///
/// Cloning is cheap; all clones share the same idle set and capacity.
pub struct Pool<C: Connection> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connection> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connection> Pool<C> {
    /// Create a pool holding at most `max_size` connections.
    pub fn new(max_size: usize) -> Self {
        assert!(max_size > 0, "pool capacity must be at least 1");
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    total: 0,
                }),
                max_size,
            }),
        }
    }

    /// Check a connection out, creating one through `factory` when the idle
    /// set is empty and capacity allows.
    ///
    /// When the pool is saturated the call yields cooperatively until a
    /// guard is returned, observing cancellation between attempts.
    pub async fn acquire<F, Fut>(&self, cx: &Cx, factory: F) -> Outcome<PooledConnection<C>, Error>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Outcome<C, Error>>,
    {
        loop {
            if let Some(reason) = cx.cancel_reason() {
                return Outcome::Cancelled(reason);
            }

            let create = {
                let mut state = self.inner.state.lock().expect("pool state lock");
                if let Some(conn) = state.idle.pop() {
                    return Outcome::Ok(PooledConnection::new(conn, Arc::clone(&self.inner)));
                }
                if state.total < self.inner.max_size {
                    state.total += 1;
                    true
                } else {
                    false
                }
            };

            if create {
                match factory().await {
                    Outcome::Ok(conn) => {
                        tracing::debug!(total = self.size(), "pool connection created");
                        return Outcome::Ok(PooledConnection::new(conn, Arc::clone(&self.inner)));
                    }
                    other => {
                        let mut state = self.inner.state.lock().expect("pool state lock");
                        state.total -= 1;
                        return match other {
                            Outcome::Ok(_) => unreachable!(),
                            Outcome::Err(e) => Outcome::Err(e),
                            Outcome::Cancelled(r) => Outcome::Cancelled(r),
                            Outcome::Panicked(p) => Outcome::Panicked(p),
                        };
                    }
                }
            }

            // Saturated: let whoever holds a guard make progress.
            yield_now().await;
        }
    }

    /// Connections currently created (idle + checked out).
    pub fn size(&self) -> usize {
        self.inner.state.lock().expect("pool state lock").total
    }

    /// Connections currently idle.
    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().expect("pool state lock").idle.len()
    }

    /// Configured capacity.
    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }
}

impl<C: Connection> std::fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("size", &self.size())
            .field("idle", &self.idle_count())
            .field("max_size", &self.inner.max_size)
            .finish()
    }
}

/// A checked-out connection. Returns to the idle set on drop unless
/// invalidated.
pub struct PooledConnection<C: Connection> {
    conn: Option<C>,
    pool: Arc<PoolInner<C>>,
    broken: Arc<AtomicBool>,
}

impl<C: Connection> PooledConnection<C> {
    fn new(conn: C, pool: Arc<PoolInner<C>>) -> Self {
        Self {
            conn: Some(conn),
            pool,
            broken: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Mark this connection as unusable; it will be discarded instead of
    /// returned to the idle set. Used when a transaction scope ends without
    /// a clean COMMIT/ROLLBACK.
    pub fn invalidate(&self) {
        self.broken.store(true, Ordering::Release);
    }

    /// A handle that can invalidate this connection after the guard has
    /// been moved elsewhere (e.g. from a transaction scope's drop path).
    pub fn invalidation_handle(&self) -> InvalidationHandle {
        InvalidationHandle(Arc::clone(&self.broken))
    }
}

/// Detached invalidation switch for a [`PooledConnection`].
#[derive(Clone)]
pub struct InvalidationHandle(Arc<AtomicBool>);

impl InvalidationHandle {
    /// Flag the connection so it is discarded rather than reused.
    pub fn invalidate(&self) {
        self.0.store(true, Ordering::Release);
    }
}

impl<C: Connection> std::ops::Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<C: Connection> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let mut state = self.pool.state.lock().expect("pool state lock");
        if self.broken.load(Ordering::Acquire) {
            state.total -= 1;
            tracing::debug!(total = state.total, "pool connection discarded");
        } else {
            state.idle.push(conn);
        }
    }
}

/// Yield to the scheduler once, so saturated acquires do not spin hot.
fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use std::sync::atomic::AtomicUsize;
    use stratum_core::{Row, Value};

    struct FakeConn {
        _serial: usize,
    }

    impl Connection for FakeConn {
        fn query(
            &self,
            _cx: &Cx,
            _sql: &str,
            _params: &[Value],
        ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
            async move { Outcome::Ok(Vec::new()) }
        }

        fn execute(
            &self,
            _cx: &Cx,
            _sql: &str,
            _params: &[Value],
        ) -> impl Future<Output = Outcome<u64, Error>> + Send {
            async move { Outcome::Ok(0) }
        }
    }

    fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => panic!("unexpected error: {e}"),
            Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
            Outcome::Panicked(p) => panic!("panicked: {p:?}"),
        }
    }

    #[test]
    fn acquire_reuses_idle_connections() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        let created = AtomicUsize::new(0);

        rt.block_on(async {
            let pool: Pool<FakeConn> = Pool::new(2);
            let factory = || {
                let serial = created.fetch_add(1, Ordering::SeqCst);
                async move { Outcome::Ok(FakeConn { _serial: serial }) }
            };

            let first = unwrap_outcome(pool.acquire(&cx, factory).await);
            drop(first);
            let _second = unwrap_outcome(pool.acquire(&cx, factory).await);

            assert_eq!(created.load(Ordering::SeqCst), 1);
            assert_eq!(pool.size(), 1);
        });
    }

    #[test]
    fn invalidated_connections_are_discarded() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();

        rt.block_on(async {
            let pool: Pool<FakeConn> = Pool::new(2);
            let factory = || async move { Outcome::Ok(FakeConn { _serial: 0 }) };

            let conn = unwrap_outcome(pool.acquire(&cx, factory).await);
            conn.invalidate();
            drop(conn);

            assert_eq!(pool.size(), 0);
            assert_eq!(pool.idle_count(), 0);
        });
    }

    #[test]
    fn invalidation_handle_outlives_borrow() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();

        rt.block_on(async {
            let pool: Pool<FakeConn> = Pool::new(1);
            let factory = || async move { Outcome::Ok(FakeConn { _serial: 0 }) };

            let conn = unwrap_outcome(pool.acquire(&cx, factory).await);
            let handle = conn.invalidation_handle();
            handle.invalidate();
            drop(conn);

            assert_eq!(pool.size(), 0);
        });
    }

    #[test]
    fn factory_failure_releases_capacity() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();

        rt.block_on(async {
            let pool: Pool<FakeConn> = Pool::new(1);
            let failing = || async move {
                Outcome::Err(Error::Connection(stratum_core::ConnectionError::new(
                    stratum_core::ConnectionErrorKind::Connect,
                    "nope",
                )))
            };
            let result = pool.acquire(&cx, failing).await;
            assert!(matches!(result, Outcome::Err(_)));
            assert_eq!(pool.size(), 0);

            // Capacity is usable again after the failure.
            let ok = || async move { Outcome::Ok(FakeConn { _serial: 0 }) };
            let _conn = unwrap_outcome(pool.acquire(&cx, ok).await);
            assert_eq!(pool.size(), 1);
        });
    }
}
