//! The active-record layer.
//!
//! A [`Record`] maps one row of an entity's table: a fixed-at-load column
//! map plus the set of columns mutated since load. Finders derive a
//! deterministic cache key from the entity name and the filter map and can
//! route point lookups through the cache's read-through helper; list
//! selects are never cached.
//!
//! Deletion does not invalidate cache entries — callers may have cached the
//! record under arbitrary `find_by` keys, so invalidation is theirs to do
//! (see [`Record::clear_find_cache`] for the primary-key one).

use std::marker::PhantomData;
use std::time::Duration;

use asupersync::{Cx, Outcome};
use stratum_cache::CacheBackend;
use stratum_core::error::ProtocolError;
use stratum_core::{Connection, Error, Row, Value, quote_ident};
use stratum_query::{FilterEntry, Filters};
use stratum_session::QuerySurface;

use crate::context::DataContext;
use crate::entity::Entity;

/// One row of `E`'s table with dirty tracking.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<E: Entity> {
    data: Vec<(String, Value)>,
    changed: Vec<String>,
    _entity: PhantomData<E>,
}

impl<E: Entity> Record<E> {
    /// A new, unpersisted record from initial values.
    ///
    /// Every key must be a declared column; the value map becomes the
    /// record's fixed column set.
    pub fn new(values: Vec<(String, Value)>) -> Result<Self, Error> {
        for (column, _) in &values {
            if !E::has_column(column) {
                return Err(Error::UnknownColumn {
                    entity: E::NAME.to_string(),
                    column: column.clone(),
                });
            }
        }
        Ok(Self {
            data: values,
            changed: Vec::new(),
            _entity: PhantomData,
        })
    }

    /// A persisted record from a result row.
    pub fn from_row(row: &Row) -> Self {
        Self {
            data: row.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            changed: Vec::new(),
            _entity: PhantomData,
        }
    }

    fn from_json(json: &serde_json::Value) -> Option<Self> {
        Row::from_json(json).map(|row| Self::from_row(&row))
    }

    fn value_of(&self, field: &str) -> Option<&Value> {
        self.data.iter().find(|(k, _)| k == field).map(|(_, v)| v)
    }

    /// Read a field. Fails on columns outside the loaded set.
    pub fn get(&self, field: &str) -> Result<&Value, Error> {
        self.value_of(field).ok_or_else(|| Error::UnknownColumn {
            entity: E::NAME.to_string(),
            column: field.to_string(),
        })
    }

    /// Write a field. No-op when the value is unchanged; fails on columns
    /// outside the loaded set — the schema is fixed at load time.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<(), Error> {
        let value = value.into();
        let Some(slot) = self.data.iter_mut().find(|(k, _)| k == field) else {
            return Err(Error::UnknownColumn {
                entity: E::NAME.to_string(),
                column: field.to_string(),
            });
        };
        if slot.1 == value {
            return Ok(());
        }
        slot.1 = value;
        if !self.changed.iter().any(|c| c == field) {
            self.changed.push(field.to_string());
        }
        Ok(())
    }

    /// The primary-key value, if loaded.
    pub fn id(&self) -> Option<&Value> {
        self.value_of(E::PRIMARY_KEY)
    }

    /// Whether this record has not been persisted yet: its primary-key
    /// column is empty or absent.
    pub fn is_new(&self) -> bool {
        match self.value_of(E::PRIMARY_KEY) {
            None | Some(Value::Null) => true,
            Some(Value::Text(s)) => s.is_empty(),
            Some(_) => false,
        }
    }

    /// Whether a save would write: new, or any field dirty.
    pub fn is_changed(&self) -> bool {
        self.is_new() || !self.changed.is_empty()
    }

    /// Fields in load order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.data.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Columns dirtied since load, in mutation order.
    pub fn changed_fields(&self) -> &[String] {
        &self.changed
    }

    /// Persist pending changes.
    ///
    /// No-op when nothing changed. New records INSERT with RETURNING and
    /// replace their data with the returned row (picking up defaults and
    /// sequence values); existing records UPDATE only the dirty fields,
    /// scoped to the primary key. The dirty set clears on success.
    pub async fn save<C: Connection, B: CacheBackend>(
        &mut self,
        cx: &Cx,
        ctx: &DataContext<C, B>,
    ) -> Outcome<(), Error> {
        if !self.is_changed() {
            return Outcome::Ok(());
        }

        if self.is_new() {
            // Leave an empty primary key to the database's default.
            let values: Vec<(String, Value)> = self
                .data
                .iter()
                .filter(|(k, v)| !(k == E::PRIMARY_KEY && v.is_null()))
                .cloned()
                .collect();
            match ctx.db.insert(cx, E::TABLE, &values, true, None).await {
                Outcome::Ok(Some(row)) => {
                    self.data = row.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
                    self.changed.clear();
                    Outcome::Ok(())
                }
                Outcome::Ok(None) => Outcome::Err(Error::Protocol(ProtocolError::new(
                    "INSERT .. RETURNING produced no row",
                ))),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        } else {
            let set: Vec<(String, Value)> = self
                .changed
                .iter()
                .filter_map(|field| {
                    self.value_of(field).map(|v| (field.clone(), v.clone()))
                })
                .collect();
            let pk = self.id().cloned().unwrap_or(Value::Null);
            let filters = Filters::new().value(E::PRIMARY_KEY, pk);
            match ctx.db.update(cx, E::TABLE, &set, &filters).await {
                Outcome::Ok(_) => {
                    self.changed.clear();
                    Outcome::Ok(())
                }
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    /// Delete this record by primary key. Cache entries keyed on it are the
    /// caller's to invalidate.
    pub async fn delete<C: Connection, B: CacheBackend>(
        &self,
        cx: &Cx,
        ctx: &DataContext<C, B>,
    ) -> Outcome<Vec<Row>, Error> {
        let pk = self.id().cloned().unwrap_or(Value::Null);
        let filters = Filters::new().value(E::PRIMARY_KEY, pk);
        ctx.db.delete(cx, E::TABLE, &filters).await
    }

    // ==================== Finders ====================

    /// Find by primary key.
    pub async fn find<C: Connection, B: CacheBackend>(
        cx: &Cx,
        ctx: &DataContext<C, B>,
        pk: impl Into<Value>,
        ttl: Option<Duration>,
    ) -> Outcome<Self, Error> {
        let filters = Filters::new().value(E::PRIMARY_KEY, pk);
        Self::find_by(cx, ctx, &filters, ttl, &[]).await
    }

    /// Find the first row matching `filters`, optionally through the cache.
    ///
    /// Fails with [`Error::NotFound`] when no row matches, cache hit or
    /// miss.
    pub async fn find_by<C: Connection, B: CacheBackend>(
        cx: &Cx,
        ctx: &DataContext<C, B>,
        filters: &Filters,
        ttl: Option<Duration>,
        columns: &[&str],
    ) -> Outcome<Self, Error> {
        let key = Self::cache_key(filters);

        let fetched: Option<serde_json::Value> = match ttl {
            Some(ttl) => {
                let producer = async || {
                    match ctx.db.find_by(cx, E::TABLE, filters, columns).await {
                        Outcome::Ok(row) => Outcome::Ok(row.map(|r| r.to_json())),
                        Outcome::Err(e) => Outcome::Err(e),
                        Outcome::Cancelled(r) => Outcome::Cancelled(r),
                        Outcome::Panicked(p) => Outcome::Panicked(p),
                    }
                };
                match ctx
                    .cache
                    .cache(cx, &key, Some(producer), ttl, false, false)
                    .await
                {
                    Outcome::Ok(v) => v,
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                }
            }
            None => match ctx.db.find_by(cx, E::TABLE, filters, columns).await {
                Outcome::Ok(row) => row.map(|r| r.to_json()),
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            },
        };

        match fetched.as_ref().and_then(Self::from_json) {
            Some(record) => Outcome::Ok(record),
            None => Outcome::Err(Error::NotFound(key)),
        }
    }

    /// Find with a hand-written WHERE clause, same caching discipline.
    ///
    /// Fails fast when the clause is empty. The cache key is derived from
    /// the bind map plus a content hash of the clause itself.
    pub async fn find_by_where<C: Connection, B: CacheBackend>(
        cx: &Cx,
        ctx: &DataContext<C, B>,
        where_sql: &str,
        binds: Vec<(String, Value)>,
        ttl: Option<Duration>,
    ) -> Outcome<Self, Error> {
        if where_sql.trim().is_empty() {
            return Outcome::Err(Error::InvalidFilter(
                "where clause can not be blank".to_string(),
            ));
        }

        let key = Self::cache_key_for_binds(&binds);
        let sql = format!(
            "SELECT * FROM {} WHERE {} LIMIT 1",
            quote_ident(E::TABLE),
            where_sql
        );

        let fetched: Option<serde_json::Value> = match ttl {
            Some(ttl) => {
                let cache_key = format!("{key}:{:x}", md5::compute(where_sql));
                let sql = &sql;
                let binds = &binds;
                let producer = async move || {
                    match ctx.db.execute(cx, sql, binds.clone(), true).await {
                        Outcome::Ok(rows) => {
                            Outcome::Ok(rows.into_iter().next().map(|r| r.to_json()))
                        }
                        Outcome::Err(e) => Outcome::Err(e),
                        Outcome::Cancelled(r) => Outcome::Cancelled(r),
                        Outcome::Panicked(p) => Outcome::Panicked(p),
                    }
                };
                match ctx
                    .cache
                    .cache(cx, &cache_key, Some(producer), ttl, false, false)
                    .await
                {
                    Outcome::Ok(v) => v,
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                }
            }
            None => match ctx.db.execute(cx, &sql, binds.clone(), true).await {
                Outcome::Ok(rows) => rows.into_iter().next().map(|r| r.to_json()),
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            },
        };

        match fetched.as_ref().and_then(Self::from_json) {
            Some(record) => Outcome::Ok(record),
            None => Outcome::Err(Error::NotFound(key)),
        }
    }

    /// All rows matching `filters`. Never cached — caching is reserved for
    /// point lookups.
    pub async fn select<C: Connection, B: CacheBackend>(
        cx: &Cx,
        ctx: &DataContext<C, B>,
        filters: &Filters,
        columns: &[&str],
        limit: Option<u64>,
        offset: Option<u64>,
        order: Option<&str>,
    ) -> Outcome<Vec<Self>, Error> {
        match ctx
            .db
            .select(cx, E::TABLE, filters, columns, limit, offset, order)
            .await
        {
            Outcome::Ok(rows) => Outcome::Ok(rows.iter().map(Self::from_row).collect()),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Insert a row and return the created record, when one came back.
    pub async fn insert<C: Connection, B: CacheBackend>(
        cx: &Cx,
        ctx: &DataContext<C, B>,
        values: Vec<(String, Value)>,
        on_conflict: Option<&str>,
    ) -> Outcome<Option<Self>, Error> {
        match ctx.db.insert(cx, E::TABLE, &values, true, on_conflict).await {
            Outcome::Ok(row) => Outcome::Ok(row.map(|r| Self::from_row(&r))),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Whether any row matches `filters`.
    pub async fn exists<C: Connection, B: CacheBackend>(
        cx: &Cx,
        ctx: &DataContext<C, B>,
        filters: &Filters,
    ) -> Outcome<bool, Error> {
        ctx.db.exists(cx, E::TABLE, filters).await
    }

    // ==================== Cache keys ====================

    /// Deterministic cache key for a filter map:
    /// `Name:col1:v1:col2:v2...`, entry order preserved.
    ///
    /// Scalars and lists contribute their raw stringification; predicate
    /// entries contribute a content hash of their rendered SQL, so
    /// structurally equal predicates collide correctly.
    pub fn cache_key(filters: &Filters) -> String {
        let mut parts = vec![E::NAME.to_string()];
        for (column, entry) in filters.iter() {
            let rendered = match entry {
                FilterEntry::Scalar(value) => value.to_string(),
                FilterEntry::Where(predicate) => {
                    format!("{:x}", md5::compute(predicate.render(column)))
                }
            };
            parts.push(format!("{column}:{rendered}"));
        }
        parts.join(":")
    }

    fn cache_key_for_binds(binds: &[(String, Value)]) -> String {
        let mut parts = vec![E::NAME.to_string()];
        for (name, value) in binds {
            parts.push(format!("{name}:{value}"));
        }
        parts.join(":")
    }

    /// Drop the cache entry for a primary-key `find`. Exposed because
    /// `delete` does not invalidate on its own.
    pub async fn clear_find_cache<C: Connection, B: CacheBackend>(
        cx: &Cx,
        ctx: &DataContext<C, B>,
        pk: impl Into<Value>,
    ) -> Outcome<u64, Error> {
        let filters = Filters::new().value(E::PRIMARY_KEY, pk);
        let key = stratum_cache::sanitize_key(&Self::cache_key(&filters));
        ctx.cache.delete(cx, &key).await
    }
}
