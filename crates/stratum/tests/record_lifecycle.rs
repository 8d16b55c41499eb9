//! Record lifecycle against a scripted connection: round-trips, dirty
//! tracking, cache discipline.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};

use stratum::prelude::*;
use stratum::{Pool, Record};

entity! {
    struct Guild {
        table: "guilds",
        primary_key: "id",
        columns: [id, name, score],
    }
}

#[derive(Default)]
struct Script {
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    rows: Mutex<VecDeque<Vec<Row>>>,
}

impl Script {
    fn push_row(&self, pairs: Vec<(&str, Value)>) {
        self.rows.lock().unwrap().push_back(vec![Row::from_pairs(
            pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        )]);
    }

    fn push_empty(&self) {
        self.rows.lock().unwrap().push_back(Vec::new());
    }

    fn statements(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(sql, _)| sql.clone()).collect()
    }
}

#[derive(Clone)]
struct ScriptedConn {
    script: Arc<Script>,
}

impl Connection for ScriptedConn {
    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let script = Arc::clone(&self.script);
        let sql = sql.to_string();
        let params = params.to_vec();
        async move {
            script.calls.lock().unwrap().push((sql, params));
            let rows = script.rows.lock().unwrap().pop_front().unwrap_or_default();
            Outcome::Ok(rows)
        }
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let script = Arc::clone(&self.script);
        let sql = sql.to_string();
        let params = params.to_vec();
        async move {
            script.calls.lock().unwrap().push((sql, params));
            Outcome::Ok(1)
        }
    }
}

fn scripted_context() -> (DataContext<ScriptedConn, MemoryBackend>, Arc<Script>) {
    let script = Arc::new(Script::default());
    let factory_script = Arc::clone(&script);
    let db = Executor::new(Pool::new(4), move || {
        let script = Arc::clone(&factory_script);
        async move { Outcome::Ok(ScriptedConn { script }) }
    });
    let ctx = DataContext::new(db, CacheStore::new(MemoryBackend::new()));
    (ctx, script)
}

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

const TTL: Duration = Duration::from_secs(60);

#[test]
fn insert_then_find_roundtrip() {
    let rt = RuntimeBuilder::current_thread().build().expect("runtime");
    let cx = Cx::for_testing();
    let (ctx, script) = scripted_context();

    // The INSERT returns the stored row (id from the sequence), the SELECT
    // returns the same row again.
    script.push_row(vec![
        ("id", Value::Int(1)),
        ("name", Value::Text("north".into())),
        ("score", Value::Int(10)),
    ]);
    script.push_row(vec![
        ("id", Value::Int(1)),
        ("name", Value::Text("north".into())),
        ("score", Value::Int(10)),
    ]);

    rt.block_on(async {
        let created = unwrap_outcome(
            Record::<Guild>::insert(
                &cx,
                &ctx,
                vec![
                    ("name".to_string(), Value::Text("north".into())),
                    ("score".to_string(), Value::Int(10)),
                ],
                None,
            )
            .await,
        )
        .expect("inserted record");
        assert_eq!(created.id(), Some(&Value::Int(1)));

        let found = unwrap_outcome(Record::<Guild>::find(&cx, &ctx, 1, None).await);
        assert_eq!(found.get("name").unwrap(), &Value::Text("north".into()));
        assert_eq!(found.get("score").unwrap(), &Value::Int(10));
    });

    let statements = script.statements();
    assert_eq!(
        statements[0],
        "INSERT INTO \"guilds\" (\"name\",\"score\") VALUES ($1,$2) RETURNING *"
    );
    assert_eq!(statements[1], "SELECT * FROM \"guilds\" WHERE id = $1 LIMIT 1");
}

#[test]
fn save_writes_once_then_not_at_all() {
    let rt = RuntimeBuilder::current_thread().build().expect("runtime");
    let cx = Cx::for_testing();
    let (ctx, script) = scripted_context();

    rt.block_on(async {
        let mut record = Record::<Guild>::from_row(&Row::from_pairs(vec![
            ("id".to_string(), Value::Int(7)),
            ("name".to_string(), Value::Text("north".into())),
            ("score".to_string(), Value::Int(10)),
        ]));

        record.set("score", 11).unwrap();
        unwrap_outcome(record.save(&cx, &ctx).await);
        assert!(!record.is_changed());

        // Clean record: no statement issued.
        unwrap_outcome(record.save(&cx, &ctx).await);
    });

    let calls = script.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].0,
        "UPDATE \"guilds\" SET \"score\" = $1 WHERE id = $2"
    );
    assert_eq!(calls[0].1, vec![Value::Int(11), Value::Int(7)]);
}

#[test]
fn saving_new_record_adopts_returned_row() {
    let rt = RuntimeBuilder::current_thread().build().expect("runtime");
    let cx = Cx::for_testing();
    let (ctx, script) = scripted_context();

    script.push_row(vec![
        ("id", Value::Int(42)),
        ("name", Value::Text("west".into())),
        ("score", Value::Int(0)),
    ]);

    rt.block_on(async {
        let mut record = Record::<Guild>::new(vec![
            ("id".to_string(), Value::Null),
            ("name".to_string(), Value::Text("west".into())),
        ])
        .unwrap();
        assert!(record.is_new());

        unwrap_outcome(record.save(&cx, &ctx).await);

        // Sequence id and column defaults came back from RETURNING.
        assert!(!record.is_new());
        assert_eq!(record.id(), Some(&Value::Int(42)));
        assert_eq!(record.get("score").unwrap(), &Value::Int(0));

        // Nothing left to write.
        unwrap_outcome(record.save(&cx, &ctx).await);
    });

    let statements = script.statements();
    assert_eq!(statements.len(), 1);
    // The empty primary key stayed out of the column list.
    assert_eq!(
        statements[0],
        "INSERT INTO \"guilds\" (\"name\") VALUES ($1) RETURNING *"
    );
}

#[test]
fn cached_find_by_calls_database_once() {
    let rt = RuntimeBuilder::current_thread().build().expect("runtime");
    let cx = Cx::for_testing();
    let (ctx, script) = scripted_context();

    script.push_row(vec![
        ("id", Value::Int(1)),
        ("name", Value::Text("north".into())),
        ("score", Value::Int(10)),
    ]);

    rt.block_on(async {
        let filters = Filters::new().value("id", 1);
        let first = unwrap_outcome(
            Record::<Guild>::find_by(&cx, &ctx, &filters, Some(TTL), &[]).await,
        );
        let second = unwrap_outcome(
            Record::<Guild>::find_by(&cx, &ctx, &filters, Some(TTL), &[]).await,
        );
        assert_eq!(first.id(), second.id());
    });

    // One SELECT; the second lookup was served from the cache.
    assert_eq!(script.statements().len(), 1);
}

#[test]
fn clear_find_cache_forces_requery() {
    let rt = RuntimeBuilder::current_thread().build().expect("runtime");
    let cx = Cx::for_testing();
    let (ctx, script) = scripted_context();

    script.push_row(vec![("id", Value::Int(1)), ("name", Value::Text("a".into()))]);
    script.push_row(vec![("id", Value::Int(1)), ("name", Value::Text("a".into()))]);

    rt.block_on(async {
        unwrap_outcome(Record::<Guild>::find(&cx, &ctx, 1, Some(TTL)).await);
        unwrap_outcome(Record::<Guild>::clear_find_cache(&cx, &ctx, 1).await);
        unwrap_outcome(Record::<Guild>::find(&cx, &ctx, 1, Some(TTL)).await);
    });

    assert_eq!(script.statements().len(), 2);
}

#[test]
fn missing_row_is_not_found_with_cache_key() {
    let rt = RuntimeBuilder::current_thread().build().expect("runtime");
    let cx = Cx::for_testing();
    let (ctx, script) = scripted_context();
    script.push_empty();

    rt.block_on(async {
        let out = Record::<Guild>::find(&cx, &ctx, 9, None).await;
        let Outcome::Err(Error::NotFound(key)) = out else {
            panic!("expected NotFound");
        };
        assert_eq!(key, "Guild:id:9");
    });
}

#[test]
fn find_by_where_rejects_blank_clause() {
    let rt = RuntimeBuilder::current_thread().build().expect("runtime");
    let cx = Cx::for_testing();
    let (ctx, script) = scripted_context();

    rt.block_on(async {
        let out = Record::<Guild>::find_by_where(&cx, &ctx, "  ", Vec::new(), None).await;
        assert!(matches!(out, Outcome::Err(Error::InvalidFilter(_))));
    });

    // Failed before any I/O.
    assert!(script.statements().is_empty());
}

#[test]
fn find_by_where_preserves_placeholders() {
    let rt = RuntimeBuilder::current_thread().build().expect("runtime");
    let cx = Cx::for_testing();
    let (ctx, script) = scripted_context();

    script.push_row(vec![("id", Value::Int(3)), ("name", Value::Text("x".into()))]);

    rt.block_on(async {
        let record = unwrap_outcome(
            Record::<Guild>::find_by_where(
                &cx,
                &ctx,
                "strpos(lower(name), :q) > 0",
                vec![("q".to_string(), Value::Text("x".into()))],
                None,
            )
            .await,
        );
        assert_eq!(record.id(), Some(&Value::Int(3)));
    });

    let calls = script.calls.lock().unwrap();
    assert_eq!(
        calls[0].0,
        "SELECT * FROM \"guilds\" WHERE strpos(lower(name), $1) > 0 LIMIT 1"
    );
    assert_eq!(calls[0].1, vec![Value::Text("x".into())]);
}

#[test]
fn delete_targets_primary_key() {
    let rt = RuntimeBuilder::current_thread().build().expect("runtime");
    let cx = Cx::for_testing();
    let (ctx, script) = scripted_context();

    rt.block_on(async {
        let record = Record::<Guild>::from_row(&Row::from_pairs(vec![
            ("id".to_string(), Value::Int(7)),
            ("name".to_string(), Value::Text("north".into())),
        ]));
        unwrap_outcome(record.delete(&cx, &ctx).await);
    });

    let calls = script.calls.lock().unwrap();
    assert_eq!(calls[0].0, "DELETE FROM \"guilds\" WHERE id = $1");
    assert_eq!(calls[0].1, vec![Value::Int(7)]);
}

#[test]
fn select_is_never_cached() {
    let rt = RuntimeBuilder::current_thread().build().expect("runtime");
    let cx = Cx::for_testing();
    let (ctx, script) = scripted_context();

    script.push_row(vec![("id", Value::Int(1)), ("name", Value::Text("a".into()))]);
    script.push_row(vec![("id", Value::Int(1)), ("name", Value::Text("a".into()))]);

    rt.block_on(async {
        let filters = Filters::new().value("score", 10);
        let rows = unwrap_outcome(
            Record::<Guild>::select(&cx, &ctx, &filters, &[], None, None, Some("id ASC")).await,
        );
        assert_eq!(rows.len(), 1);
        unwrap_outcome(
            Record::<Guild>::select(&cx, &ctx, &filters, &[], None, None, Some("id ASC")).await,
        );
    });

    let statements = script.statements();
    assert_eq!(statements.len(), 2);
    assert_eq!(
        statements[0],
        "SELECT * FROM \"guilds\" WHERE score = $1 ORDER BY id ASC"
    );
}
