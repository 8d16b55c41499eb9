//! Versioned, transactional schema migrations.
//!
//! Migrations are compiled units registered with the [`Migrator`]: a
//! version, a logical name, and forward/reverse steps that run against a
//! [`TransactionContext`]. Applied versions persist in the
//! `schema_migrations` history table — a version is `pending` while it has a
//! unit but no history row and `applied` once the row exists.
//!
//! - [`Migrator::check`] probes the history table and bootstraps it when
//!   the probe fails with SQLSTATE `42P01` (relation does not exist).
//! - [`Migrator::migrate`] applies pending units in ascending version
//!   order, one transaction per unit (forward step + history insert). A
//!   failure aborts the batch; prior units stay applied.
//! - [`Migrator::rollback`] reverts the highest applied version that still
//!   has a unit, one unit per iteration.
//! - [`Migrator::create`] scaffolds a new migration source file named
//!   `<unix_timestamp>_<snake_name>.rs`.
//!
//! After a successful migrate/rollback batch the runner snapshots the
//! schema through [`dump::dump_schema`].

use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use asupersync::{Cx, Outcome};
use stratum_core::{Connection, Error, Value};
use stratum_query::Filters;
use stratum_session::{Executor, QuerySurface, TransactionContext};

pub mod dump;

pub use dump::{DumpConfig, dump_schema};

/// The history table: one row per applied version.
pub const HISTORY_TABLE: &str = "schema_migrations";

/// A forward or reverse migration step, bound to the unit's transaction.
pub type MigrationStep<C> = for<'a> fn(
    &'a Cx,
    &'a TransactionContext<C>,
) -> Pin<Box<dyn Future<Output = Outcome<(), Error>> + Send + 'a>>;

/// One reversible schema change.
pub struct MigrationUnit<C: Connection> {
    /// Ordering key, conventionally the unix timestamp of creation.
    pub version: i64,
    /// Logical snake_case name.
    pub name: &'static str,
    /// Forward action.
    pub up: MigrationStep<C>,
    /// Reverse action.
    pub down: MigrationStep<C>,
}

impl<C: Connection> std::fmt::Debug for MigrationUnit<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationUnit")
            .field("version", &self.version)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Discovers, orders, applies, and reverts migration units.
pub struct Migrator<C: Connection> {
    db: Executor<C>,
    directory: PathBuf,
    units: Vec<MigrationUnit<C>>,
    dump: Option<DumpConfig>,
}

impl<C: Connection> Migrator<C> {
    /// A migrator over `db`, scaffolding new files into `directory`.
    pub fn new(db: Executor<C>, directory: impl Into<PathBuf>) -> Self {
        Self {
            db,
            directory: directory.into(),
            units: Vec::new(),
            dump: None,
        }
    }

    /// Register a migration unit.
    pub fn register(&mut self, unit: MigrationUnit<C>) {
        self.units.push(unit);
    }

    /// Register many units.
    pub fn with_units(mut self, units: Vec<MigrationUnit<C>>) -> Self {
        self.units.extend(units);
        self
    }

    /// Enable schema dumps after successful batches.
    pub fn with_dump(mut self, config: DumpConfig) -> Self {
        self.dump = Some(config);
        self
    }

    /// Ensure the history table exists.
    ///
    /// Probes with a count; "relation does not exist" bootstraps the table
    /// (the history table is its own first migration), any other failure
    /// propagates.
    pub async fn check(&self, cx: &Cx) -> Outcome<(), Error> {
        match self.db.count(cx, HISTORY_TABLE, &Filters::new()).await {
            Outcome::Ok(_) => Outcome::Ok(()),
            Outcome::Err(e) if e.is_undefined_table() => {
                match self
                    .db
                    .query(
                        cx,
                        &format!("CREATE TABLE {HISTORY_TABLE} (version bigint PRIMARY KEY)"),
                    )
                    .await
                {
                    Outcome::Ok(_) => Outcome::Ok(()),
                    Outcome::Err(e) => Outcome::Err(e),
                    Outcome::Cancelled(r) => Outcome::Cancelled(r),
                    Outcome::Panicked(p) => Outcome::Panicked(p),
                }
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Apply every pending unit in ascending version order.
    ///
    /// Each unit runs in its own transaction together with its history
    /// insert. A failing unit rolls back entirely and aborts the batch;
    /// units already committed stay applied.
    pub async fn migrate(&self, cx: &Cx) -> Outcome<(), Error> {
        let applied = match self.applied_versions(cx).await {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let mut pending: Vec<&MigrationUnit<C>> = self
            .units
            .iter()
            .filter(|u| !applied.contains(&u.version))
            .collect();
        pending.sort_by_key(|u| (u.version, u.name));

        for unit in pending {
            self.banner(unit, "migrating");
            let started = Instant::now();

            let out = self
                .db
                .transaction(cx, async |tx| {
                    match (unit.up)(cx, tx).await {
                        Outcome::Ok(()) => {}
                        Outcome::Err(e) => return Outcome::Err(e),
                        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                        Outcome::Panicked(p) => return Outcome::Panicked(p),
                    }
                    let row = [("version".to_string(), Value::Int(unit.version))];
                    match tx.insert(cx, HISTORY_TABLE, &row, false, None).await {
                        Outcome::Ok(_) => Outcome::Ok(()),
                        Outcome::Err(e) => Outcome::Err(e),
                        Outcome::Cancelled(r) => Outcome::Cancelled(r),
                        Outcome::Panicked(p) => Outcome::Panicked(p),
                    }
                })
                .await;

            match out {
                Outcome::Ok(()) => {
                    self.banner_done(unit, "migrated", started);
                }
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        self.run_dump();
        Outcome::Ok(())
    }

    /// Revert up to `count` applied units, highest version first.
    ///
    /// Stops early when no applied version still has a registered unit.
    pub async fn rollback(&self, cx: &Cx, count: usize) -> Outcome<(), Error> {
        for _ in 0..count {
            let applied = match self.applied_versions(cx).await {
                Outcome::Ok(v) => v,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };

            let Some(unit) = self
                .units
                .iter()
                .filter(|u| applied.contains(&u.version))
                .max_by_key(|u| (u.version, u.name))
            else {
                break;
            };

            self.banner(unit, "reverting");
            let started = Instant::now();

            let out = self
                .db
                .transaction(cx, async |tx| {
                    match (unit.down)(cx, tx).await {
                        Outcome::Ok(()) => {}
                        Outcome::Err(e) => return Outcome::Err(e),
                        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                        Outcome::Panicked(p) => return Outcome::Panicked(p),
                    }
                    let filters = Filters::new().value("version", unit.version);
                    match tx.delete(cx, HISTORY_TABLE, &filters).await {
                        Outcome::Ok(_) => Outcome::Ok(()),
                        Outcome::Err(e) => Outcome::Err(e),
                        Outcome::Cancelled(r) => Outcome::Cancelled(r),
                        Outcome::Panicked(p) => Outcome::Panicked(p),
                    }
                })
                .await;

            match out {
                Outcome::Ok(()) => {
                    self.banner_done(unit, "reverted", started);
                }
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        self.run_dump();
        Outcome::Ok(())
    }

    /// Scaffold a new migration file `<unix_timestamp>_<snake_name>.rs`.
    ///
    /// Refuses (logs, does not error) when a file with the same logical
    /// name already exists. Returns the created path, or `None` when
    /// refused.
    pub fn create(&self, name: &str) -> std::io::Result<Option<PathBuf>> {
        if name.is_empty() {
            tracing::warn!(target: "stratum::migrate", "empty migration name, skipped");
            return Ok(None);
        }
        let snake = snake_case(name);

        if let Ok(entries) = std::fs::read_dir(&self.directory) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("rs") {
                    continue;
                }
                if let Some(existing) = logical_name(&path) {
                    if existing == snake {
                        tracing::warn!(
                            target: "stratum::migrate",
                            "migration \"{snake}\" already exists: {}",
                            path.display()
                        );
                        return Ok(None);
                    }
                }
            }
        }

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        std::fs::create_dir_all(&self.directory)?;
        let path = self.directory.join(format!("{timestamp}_{snake}.rs"));
        std::fs::write(&path, scaffold(timestamp, &snake))?;
        tracing::info!(target: "stratum::migrate", "created: {}", path.display());
        Ok(Some(path))
    }

    /// Registered units, ordered by version.
    pub fn units(&self) -> Vec<&MigrationUnit<C>> {
        let mut units: Vec<&MigrationUnit<C>> = self.units.iter().collect();
        units.sort_by_key(|u| (u.version, u.name));
        units
    }

    async fn applied_versions(&self, cx: &Cx) -> Outcome<BTreeSet<i64>, Error> {
        let rows = self
            .db
            .select(cx, HISTORY_TABLE, &Filters::new(), &["version"], None, None, None)
            .await;
        match rows {
            Outcome::Ok(rows) => Outcome::Ok(
                rows.iter()
                    .filter_map(|row| row.get_named("version").and_then(Value::as_i64))
                    .collect(),
            ),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    fn banner(&self, unit: &MigrationUnit<C>, action: &str) {
        let text = format!("== {} {}: {action} ==", unit.version, pascal_case(unit.name));
        tracing::info!(target: "stratum::migrate", "{:=<80}", text);
    }

    fn banner_done(&self, unit: &MigrationUnit<C>, action: &str, started: Instant) {
        let text = format!(
            "== {} {}: {action} ({:.4}s) ==",
            unit.version,
            pascal_case(unit.name),
            started.elapsed().as_secs_f64()
        );
        tracing::info!(target: "stratum::migrate", "{:=<80}", text);
    }

    fn run_dump(&self) {
        if let Some(config) = &self.dump {
            dump::dump_schema(config);
        }
    }
}

impl<C: Connection> std::fmt::Debug for Migrator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("directory", &self.directory)
            .field("units", &self.units.len())
            .finish_non_exhaustive()
    }
}

/// `CreateUser` -> `create_user`.
fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// `create_user` -> `CreateUser`.
fn pascal_case(name: &str) -> String {
    name.split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Logical name of a migration file: the stem after the version prefix.
fn logical_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let (version, name) = stem.split_once('_')?;
    if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(name.to_string())
}

fn scaffold(version: u64, name: &str) -> String {
    format!(
        r#"use std::future::Future;
use std::pin::Pin;

use asupersync::{{Cx, Outcome}};
use stratum_core::{{Connection, Error}};
use stratum_session::{{QuerySurface, TransactionContext}};

pub const VERSION: i64 = {version};
pub const NAME: &str = "{name}";

pub fn up<'a, C: Connection>(
    cx: &'a Cx,
    tx: &'a TransactionContext<C>,
) -> Pin<Box<dyn Future<Output = Outcome<(), Error>> + Send + 'a>> {{
    Box::pin(async move {{
        let _ = (cx, tx);
        Outcome::Ok(())
    }})
}}

pub fn down<'a, C: Connection>(
    cx: &'a Cx,
    tx: &'a TransactionContext<C>,
) -> Pin<Box<dyn Future<Output = Outcome<(), Error>> + Send + 'a>> {{
    Box::pin(async move {{
        let _ = (cx, tx);
        Outcome::Ok(())
    }})
}}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use std::collections::BTreeSet;
    use std::sync::{Arc, Mutex};
    use stratum_core::error::{QueryError, QueryErrorKind};
    use stratum_core::Row;
    use stratum_pool::Pool;

    /// Scripted connection simulating the history table.
    #[derive(Default)]
    struct FakeDb {
        calls: Mutex<Vec<String>>,
        history: Mutex<BTreeSet<i64>>,
        table_exists: Mutex<bool>,
        fail_probe: Mutex<bool>,
    }

    #[derive(Clone)]
    struct FakeConn {
        db: Arc<FakeDb>,
    }

    fn undefined_table() -> Error {
        let mut q = QueryError::new(QueryErrorKind::Syntax, "relation does not exist");
        q.sqlstate = Some("42P01".to_string());
        Error::Query(q)
    }

    impl Connection for FakeConn {
        fn query(
            &self,
            _cx: &Cx,
            sql: &str,
            params: &[Value],
        ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
            let db = Arc::clone(&self.db);
            let sql = sql.to_string();
            let params = params.to_vec();
            async move {
                db.calls.lock().unwrap().push(sql.clone());

                if sql.starts_with("SELECT count(*)") {
                    if *db.fail_probe.lock().unwrap() {
                        return Outcome::Err(Error::Query(QueryError::new(
                            QueryErrorKind::Database,
                            "connection reset",
                        )));
                    }
                    if !*db.table_exists.lock().unwrap() {
                        return Outcome::Err(undefined_table());
                    }
                    let count = db.history.lock().unwrap().len() as i64;
                    return Outcome::Ok(vec![Row::from_pairs(vec![(
                        "c".to_string(),
                        Value::Int(count),
                    )])]);
                }
                if sql.starts_with("SELECT version") {
                    let rows = db
                        .history
                        .lock()
                        .unwrap()
                        .iter()
                        .map(|v| Row::from_pairs(vec![("version".to_string(), Value::Int(*v))]))
                        .collect();
                    return Outcome::Ok(rows);
                }
                if sql.starts_with("CREATE TABLE schema_migrations") {
                    *db.table_exists.lock().unwrap() = true;
                    return Outcome::Ok(Vec::new());
                }
                if sql.starts_with("INSERT INTO \"schema_migrations\"") {
                    if let Some(version) = params.first().and_then(Value::as_i64) {
                        db.history.lock().unwrap().insert(version);
                    }
                    return Outcome::Ok(Vec::new());
                }
                if sql.starts_with("DELETE FROM \"schema_migrations\"") {
                    if let Some(version) = params.first().and_then(Value::as_i64) {
                        db.history.lock().unwrap().remove(&version);
                    }
                    return Outcome::Ok(Vec::new());
                }
                // Migration DDL: recorded, succeeds.
                Outcome::Ok(Vec::new())
            }
        }

        fn execute(
            &self,
            _cx: &Cx,
            sql: &str,
            _params: &[Value],
        ) -> impl Future<Output = Outcome<u64, Error>> + Send {
            let db = Arc::clone(&self.db);
            let sql = sql.to_string();
            async move {
                db.calls.lock().unwrap().push(sql);
                Outcome::Ok(0)
            }
        }
    }

    fn fake_executor(db: &Arc<FakeDb>) -> Executor<FakeConn> {
        let factory_db = Arc::clone(db);
        Executor::new(Pool::new(2), move || {
            let db = Arc::clone(&factory_db);
            async move { Outcome::Ok(FakeConn { db }) }
        })
    }

    macro_rules! ddl_step {
        ($sql:expr) => {{
            fn run<'a>(
                cx: &'a Cx,
                tx: &'a TransactionContext<FakeConn>,
            ) -> Pin<Box<dyn Future<Output = Outcome<(), Error>> + Send + 'a>> {
                Box::pin(async move { tx.query(cx, $sql).await.map(|_| ()) })
            }
            run as MigrationStep<FakeConn>
        }};
    }

    fn step_create(version: i64) -> MigrationStep<FakeConn> {
        match version {
            1 => ddl_step!("CREATE TABLE m1 (id int)"),
            2 => ddl_step!("CREATE TABLE m2 (id int)"),
            _ => ddl_step!("CREATE TABLE m3 (id int)"),
        }
    }

    fn step_drop(version: i64) -> MigrationStep<FakeConn> {
        match version {
            1 => ddl_step!("DROP TABLE m1"),
            2 => ddl_step!("DROP TABLE m2"),
            _ => ddl_step!("DROP TABLE m3"),
        }
    }

    fn unit(version: i64, name: &'static str) -> MigrationUnit<FakeConn> {
        MigrationUnit {
            version,
            name,
            up: step_create(version),
            down: step_drop(version),
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
    fn check_bootstraps_missing_history_table() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        let db = Arc::new(FakeDb::default());
        let migrator = Migrator::new(fake_executor(&db), "db/migrate");

        rt.block_on(async {
            unwrap_outcome(migrator.check(&cx).await);
            assert!(*db.table_exists.lock().unwrap());
            // A second probe finds the table and changes nothing.
            unwrap_outcome(migrator.check(&cx).await);
        });

        let creates = db
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|sql| sql.starts_with("CREATE TABLE schema_migrations"))
            .count();
        assert_eq!(creates, 1);
    }

    #[test]
    fn check_propagates_other_probe_failures() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        let db = Arc::new(FakeDb::default());
        *db.fail_probe.lock().unwrap() = true;
        let migrator = Migrator::new(fake_executor(&db), "db/migrate");

        rt.block_on(async {
            let out = migrator.check(&cx).await;
            assert!(matches!(out, Outcome::Err(Error::Query(_))));
            assert!(!*db.table_exists.lock().unwrap());
        });
    }

    #[test]
    fn migrate_applies_pending_versions_ascending() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        let db = Arc::new(FakeDb::default());
        *db.table_exists.lock().unwrap() = true;
        db.history.lock().unwrap().insert(1);

        let migrator = Migrator::new(fake_executor(&db), "db/migrate").with_units(vec![
            unit(3, "add_scores"),
            unit(1, "create_users"),
            unit(2, "create_guilds"),
        ]);

        rt.block_on(async {
            unwrap_outcome(migrator.migrate(&cx).await);
        });

        let history: Vec<i64> = db.history.lock().unwrap().iter().copied().collect();
        assert_eq!(history, vec![1, 2, 3]);

        let calls = db.calls.lock().unwrap();
        let ddl: Vec<&str> = calls
            .iter()
            .map(String::as_str)
            .filter(|sql| sql.starts_with("CREATE TABLE m"))
            .collect();
        assert_eq!(ddl, vec!["CREATE TABLE m2 (id int)", "CREATE TABLE m3 (id int)"]);

        // Each unit ran inside its own transaction.
        let begins = calls.iter().filter(|sql| *sql == "BEGIN").count();
        let commits = calls.iter().filter(|sql| *sql == "COMMIT").count();
        assert_eq!(begins, 2);
        assert_eq!(commits, 2);
    }

    #[test]
    fn rollback_reverts_descending_one_unit_per_iteration() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        let db = Arc::new(FakeDb::default());
        *db.table_exists.lock().unwrap() = true;
        db.history.lock().unwrap().extend([1, 2, 3]);

        let migrator = Migrator::new(fake_executor(&db), "db/migrate").with_units(vec![
            unit(1, "create_users"),
            unit(2, "create_guilds"),
            unit(3, "add_scores"),
        ]);

        rt.block_on(async {
            unwrap_outcome(migrator.rollback(&cx, 2).await);
        });

        let history: Vec<i64> = db.history.lock().unwrap().iter().copied().collect();
        assert_eq!(history, vec![1]);

        let calls = db.calls.lock().unwrap();
        let ddl: Vec<&str> = calls
            .iter()
            .map(String::as_str)
            .filter(|sql| sql.starts_with("DROP TABLE m"))
            .collect();
        assert_eq!(ddl, vec!["DROP TABLE m3", "DROP TABLE m2"]);
    }

    #[test]
    fn rollback_stops_when_nothing_left() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        let db = Arc::new(FakeDb::default());
        *db.table_exists.lock().unwrap() = true;
        db.history.lock().unwrap().insert(1);

        let migrator = Migrator::new(fake_executor(&db), "db/migrate")
            .with_units(vec![unit(1, "create_users")]);

        rt.block_on(async {
            // Asking for more rollbacks than exist reverts what is there and
            // stops.
            unwrap_outcome(migrator.rollback(&cx, 5).await);
        });

        assert!(db.history.lock().unwrap().is_empty());
        let calls = db.calls.lock().unwrap();
        let drops = calls.iter().filter(|sql| sql.starts_with("DROP TABLE")).count();
        assert_eq!(drops, 1);
    }

    #[test]
    fn failing_unit_aborts_batch_and_keeps_prior_units() {
        let rt = RuntimeBuilder::current_thread().build().expect("runtime");
        let cx = Cx::for_testing();
        let db = Arc::new(FakeDb::default());
        *db.table_exists.lock().unwrap() = true;

        fn failing_step<'a>(
            _cx: &'a Cx,
            _tx: &'a TransactionContext<FakeConn>,
        ) -> Pin<Box<dyn Future<Output = Outcome<(), Error>> + Send + 'a>> {
            Box::pin(async move {
                Outcome::Err(Error::Query(QueryError::new(
                    QueryErrorKind::Syntax,
                    "bad ddl",
                )))
            })
        }
        let migrator = Migrator::new(fake_executor(&db), "db/migrate").with_units(vec![
            unit(1, "create_users"),
            MigrationUnit {
                version: 2,
                name: "broken",
                up: failing_step,
                down: failing_step,
            },
            unit(3, "add_scores"),
        ]);

        rt.block_on(async {
            let out = migrator.migrate(&cx).await;
            assert!(matches!(out, Outcome::Err(Error::Query(_))));
        });

        // Unit 1 committed; units 2 and 3 did not apply.
        let history: Vec<i64> = db.history.lock().unwrap().iter().copied().collect();
        assert_eq!(history, vec![1]);

        let calls = db.calls.lock().unwrap();
        assert!(calls.iter().any(|sql| sql == "ROLLBACK"));
        assert!(!calls.iter().any(|sql| sql.starts_with("CREATE TABLE m3")));
    }

    #[test]
    fn case_helpers() {
        assert_eq!(snake_case("CreateUser"), "create_user");
        assert_eq!(snake_case("AddHTTPRoute"), "add_h_t_t_p_route");
        assert_eq!(pascal_case("create_user"), "CreateUser");
    }

    #[test]
    fn create_scaffolds_and_refuses_duplicates() {
        let dir = std::env::temp_dir().join(format!(
            "stratum_migrate_test_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);

        let db = Arc::new(FakeDb::default());
        let migrator = Migrator::new(fake_executor(&db), dir.clone());

        let created = migrator.create("CreateUser").expect("scaffold");
        let path = created.expect("path for new migration");
        assert!(path.exists());
        let contents = std::fs::read_to_string(&path).expect("read scaffold");
        assert!(contents.contains("pub fn up"));
        assert!(contents.contains("pub fn down"));
        assert!(contents.contains("\"create_user\""));

        // Same logical name again: refused without error.
        let again = migrator.create("CreateUser").expect("scaffold");
        assert!(again.is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
