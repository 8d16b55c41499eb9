//! In-process cache backend for tests and local development.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use asupersync::{Cx, Outcome};
use stratum_core::Error;

use crate::store::CacheBackend;

struct Entry {
    value: String,
    expires_at: Instant,
}

/// HashMap-backed cache with lazy expiration.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryBackend {
    /// An empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .expect("cache lock")
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    /// Whether there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().expect("cache lock");
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend").field("len", &self.len()).finish()
    }
}

impl CacheBackend for MemoryBackend {
    fn get(
        &self,
        _cx: &Cx,
        key: &str,
    ) -> impl Future<Output = Outcome<Option<String>, Error>> + Send {
        let value = self.live_value(key);
        async move { Outcome::Ok(value) }
    }

    fn set(
        &self,
        _cx: &Cx,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.entries.lock().expect("cache lock").insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        async move { Outcome::Ok(()) }
    }

    fn add(
        &self,
        _cx: &Cx,
        key: &str,
        value: &str,
    ) -> impl Future<Output = Outcome<bool, Error>> + Send {
        let stored = {
            let mut entries = self.entries.lock().expect("cache lock");
            let live = entries
                .get(key)
                .is_some_and(|e| e.expires_at > Instant::now());
            if live {
                false
            } else {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: value.to_string(),
                        // A bare SETNX has no TTL; the store applies one right
                        // after. A day is effectively "no expiry" for tests.
                        expires_at: Instant::now() + Duration::from_secs(86_400),
                    },
                );
                true
            }
        };
        async move { Outcome::Ok(stored) }
    }

    fn delete(&self, _cx: &Cx, key: &str) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let removed = self
            .entries
            .lock()
            .expect("cache lock")
            .remove(key)
            .is_some();
        async move { Outcome::Ok(u64::from(removed)) }
    }

    fn increment(&self, _cx: &Cx, key: &str) -> impl Future<Output = Outcome<i64, Error>> + Send {
        let next = {
            let mut entries = self.entries.lock().expect("cache lock");
            let current = entries
                .get(key)
                .filter(|e| e.expires_at > Instant::now())
                .and_then(|e| e.value.parse::<i64>().ok())
                .unwrap_or(0);
            let next = current + 1;
            entries.insert(
                key.to_string(),
                Entry {
                    value: next.to_string(),
                    expires_at: Instant::now() + Duration::from_secs(86_400),
                },
            );
            next
        };
        async move { Outcome::Ok(next) }
    }

    fn expire(
        &self,
        _cx: &Cx,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = Outcome<bool, Error>> + Send {
        let existed = {
            let mut entries = self.entries.lock().expect("cache lock");
            match entries.get_mut(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    entry.expires_at = Instant::now() + ttl;
                    true
                }
                _ => false,
            }
        };
        async move { Outcome::Ok(existed) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;

    fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => panic!("unexpected error: {e}"),
            Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
            Outcome::Panicked(p) => panic!("panicked: {p:?}"),
        }
    }

    #[test]
    fn set_get_delete() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        let backend = MemoryBackend::new();

        rt.block_on(async {
            unwrap_outcome(backend.set(&cx, "k", "v", Duration::from_secs(60)).await);
            assert_eq!(
                unwrap_outcome(backend.get(&cx, "k").await).as_deref(),
                Some("v")
            );
            assert_eq!(unwrap_outcome(backend.delete(&cx, "k").await), 1);
            assert_eq!(unwrap_outcome(backend.get(&cx, "k").await), None);
            assert_eq!(unwrap_outcome(backend.delete(&cx, "k").await), 0);
        });
    }

    #[test]
    fn expired_entries_read_as_absent() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        let backend = MemoryBackend::new();

        rt.block_on(async {
            unwrap_outcome(backend.set(&cx, "k", "v", Duration::ZERO).await);
            assert_eq!(unwrap_outcome(backend.get(&cx, "k").await), None);
            // And set-if-absent may claim the slot again.
            assert!(unwrap_outcome(backend.add(&cx, "k", "w").await));
        });
    }

    #[test]
    fn add_respects_existing_entries() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        let backend = MemoryBackend::new();

        rt.block_on(async {
            assert!(unwrap_outcome(backend.add(&cx, "k", "first").await));
            assert!(!unwrap_outcome(backend.add(&cx, "k", "second").await));
            assert_eq!(
                unwrap_outcome(backend.get(&cx, "k").await).as_deref(),
                Some("first")
            );
        });
    }

    #[test]
    fn increment_counts_from_zero() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        let backend = MemoryBackend::new();

        rt.block_on(async {
            assert_eq!(unwrap_outcome(backend.increment(&cx, "n").await), 1);
            assert_eq!(unwrap_outcome(backend.increment(&cx, "n").await), 2);
        });
    }
}
