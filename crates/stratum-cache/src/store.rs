//! The cache store: TTL'd operations, read-through, advisory locking.

use std::future::Future;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use asupersync::{Cx, Outcome};
use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use stratum_core::Error;

/// The storage contract behind [`CacheStore`].
///
/// Values are opaque strings; the store layers JSON encoding on top. All
/// operations may fail with backend errors — the store decides which
/// operations swallow them.
pub trait CacheBackend: Send + Sync + 'static {
    /// Fetch a key's value.
    fn get(&self, cx: &Cx, key: &str)
    -> impl Future<Output = Outcome<Option<String>, Error>> + Send;

    /// Store a value with a TTL, overwriting.
    fn set(
        &self,
        cx: &Cx,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Store a value only when the key is absent. Returns whether it stored.
    fn add(
        &self,
        cx: &Cx,
        key: &str,
        value: &str,
    ) -> impl Future<Output = Outcome<bool, Error>> + Send;

    /// Remove a key. Returns how many entries were removed.
    fn delete(&self, cx: &Cx, key: &str) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Atomically increment an integer value, creating it at 1.
    fn increment(&self, cx: &Cx, key: &str) -> impl Future<Output = Outcome<i64, Error>> + Send;

    /// Reset a key's TTL. Returns whether the key existed.
    fn expire(
        &self,
        cx: &Cx,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = Outcome<bool, Error>> + Send;
}

/// TTL'd key/value store with a read-through helper and an advisory lock.
#[derive(Debug)]
pub struct CacheStore<B: CacheBackend> {
    backend: B,
}

impl<B: CacheBackend> CacheStore<B> {
    /// Wrap a backend.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Raw fetch of a key's stored string.
    pub async fn get(&self, cx: &Cx, key: &str) -> Outcome<Option<String>, Error> {
        self.backend.get(cx, key).await
    }

    /// JSON-encode `value` and store it under `key` for `ttl`.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        cx: &Cx,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Outcome<(), Error> {
        let encoded = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                return Outcome::Err(Error::InvalidFilter(format!(
                    "cache value not serializable: {e}"
                )));
            }
        };
        self.backend.set(cx, key, &encoded, ttl).await
    }

    /// Store `value` only when `key` is absent, then apply the TTL.
    pub async fn add(&self, cx: &Cx, key: &str, value: &str, ttl: Duration) -> Outcome<bool, Error> {
        match self.backend.add(cx, key, value).await {
            Outcome::Ok(stored) => {
                if stored {
                    let _ = self.backend.expire(cx, key, ttl).await;
                }
                Outcome::Ok(stored)
            }
            other => other,
        }
    }

    /// Remove a key. Returns how many entries were removed.
    pub async fn delete(&self, cx: &Cx, key: &str) -> Outcome<u64, Error> {
        self.backend.delete(cx, key).await
    }

    /// Increment a counter, optionally refreshing its TTL.
    pub async fn increment(
        &self,
        cx: &Cx,
        key: &str,
        ttl: Option<Duration>,
    ) -> Outcome<i64, Error> {
        match self.backend.increment(cx, key).await {
            Outcome::Ok(n) => {
                if let Some(ttl) = ttl {
                    let _ = self.backend.expire(cx, key, ttl).await;
                }
                Outcome::Ok(n)
            }
            other => other,
        }
    }

    /// Read-through lookup.
    ///
    /// The key is sanitized first (non-printables stripped, whitespace
    /// collapsed to `_`). On hit the cached JSON is decoded and returned,
    /// optionally renewing the TTL. On miss the producer runs and its
    /// result is persisted unless it is `None` and `save_null` is unset.
    ///
    /// Backend failures — on read or write — are treated as misses: the
    /// cache must never take the read path down with it.
    pub async fn cache<T, F>(
        &self,
        cx: &Cx,
        key: &str,
        producer: Option<F>,
        ttl: Duration,
        renew: bool,
        save_null: bool,
    ) -> Outcome<Option<T>, Error>
    where
        T: Serialize + DeserializeOwned,
        F: AsyncFnOnce() -> Outcome<Option<T>, Error>,
    {
        let key = sanitize_key(key);
        let start = Instant::now();

        if let Outcome::Ok(Some(stored)) = self.backend.get(cx, &key).await {
            if let Ok(decoded) = serde_json::from_str::<Option<T>>(&stored) {
                if renew {
                    let _ = self.backend.expire(cx, &key, ttl).await;
                }
                if tracing::enabled!(target: "stratum::cache", tracing::Level::DEBUG) {
                    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
                    tracing::debug!(target: "stratum::cache", "CACHE ({elapsed_ms:.2}ms) {key}");
                }
                return Outcome::Ok(decoded);
            }
            // Undecodable entries fall through to the producer.
        }

        let Some(producer) = producer else {
            return Outcome::Ok(None);
        };

        let result = match producer().await {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        if result.is_some() || save_null {
            let _ = self.set(cx, &key, &result, ttl).await;
        }

        Outcome::Ok(result)
    }

    /// Advisory cross-process mutual exclusion.
    ///
    /// Acquires a unique token under `key` via set-if-absent and runs `body`
    /// only when this caller's token won the race; the key's TTL is
    /// refreshed while held. Release always happens whether `body` succeeds
    /// or fails, unless `unlock_after` is false (the lock then expires
    /// naturally). Returns whether `body` ran.
    ///
    /// This is lease-based, not a strict mutex: design `body` to tolerate
    /// rare double entry under token-expiry races.
    pub async fn lock<F>(
        &self,
        cx: &Cx,
        key: &str,
        body: F,
        ttl: Duration,
        unlock_after: bool,
    ) -> Outcome<bool, Error>
    where
        F: AsyncFnOnce() -> Outcome<(), Error>,
    {
        let token = lock_token();
        match self.backend.add(cx, key, &token).await {
            Outcome::Ok(_) => {}
            // Backend down: do not run the body without the lock.
            Outcome::Err(_) => return Outcome::Ok(false),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        let held = match self.backend.get(cx, key).await {
            Outcome::Ok(stored) => stored.as_deref() == Some(token.as_str()),
            Outcome::Err(_) => false,
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        if !held {
            return Outcome::Ok(false);
        }

        let _ = self.backend.expire(cx, key, ttl).await;
        let result = body().await;

        if unlock_after {
            let _ = self.backend.delete(cx, key).await;
        }

        match result {
            Outcome::Ok(()) => Outcome::Ok(true),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }
}

/// Strip non-printable characters and collapse whitespace runs to `_`.
pub fn sanitize_key(key: &str) -> String {
    static STRIP: OnceLock<Regex> = OnceLock::new();
    static COLLAPSE: OnceLock<Regex> = OnceLock::new();
    let strip = STRIP.get_or_init(|| Regex::new(r"[^\x20-\x7e]").expect("strip regex"));
    let collapse = COLLAPSE.get_or_init(|| Regex::new(r"\s+").expect("collapse regex"));

    let stripped = strip.replace_all(key, "");
    collapse.replace_all(&stripped, "_").into_owned()
}

fn lock_token() -> String {
    format!("{:x}-{:016x}", std::process::id(), rand::random::<u64>())
}
