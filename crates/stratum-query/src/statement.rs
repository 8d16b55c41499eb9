//! Full statement rendering.
//!
//! Statements are rendered with named `:param` placeholders so the SQL text
//! is stable and loggable; the dispatch layer converts to positional `$n`
//! parameters right before handing the driver the statement.
//!
//! Array-valued binds are special: the driver cannot bind array-typed
//! parameters, so [`inline_arrays`] removes them from the bind map and
//! splices the literal-escaped, comma-joined list into the SQL text. This is
//! an executor-level rewrite with exactly one escaping path
//! (`stratum_core::escape_literal`), not a generic feature.

use crate::filter::Filters;
use stratum_core::error::{Error, QueryError, QueryErrorKind};
use stratum_core::{Value, escape_literal, quote_ident};

/// A rendered statement: SQL with named placeholders plus its bind map.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text with `:name` placeholders.
    pub sql: String,
    /// Named binds in placeholder-introduction order.
    pub binds: Vec<(String, Value)>,
}

/// Render a SELECT.
///
/// `SELECT <columns> FROM "table" [WHERE ...] [ORDER BY ...] [LIMIT ...]
/// [OFFSET ...]` — no implicit limit.
pub fn select(
    table: &str,
    filters: &Filters,
    columns: &[&str],
    limit: Option<u64>,
    offset: Option<u64>,
    order: Option<&str>,
) -> Statement {
    let where_clause = filters.render_where();

    let mut sql = format!(
        "SELECT {} FROM {}",
        if columns.is_empty() {
            "*".to_string()
        } else {
            columns.join(", ")
        },
        quote_ident(table)
    );
    if !where_clause.sql.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_clause.sql);
    }
    if let Some(order) = order {
        sql.push_str(" ORDER BY ");
        sql.push_str(order);
    }
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    if let Some(offset) = offset {
        sql.push_str(&format!(" OFFSET {offset}"));
    }

    Statement {
        sql,
        binds: where_clause.binds,
    }
}

/// Render an INSERT.
///
/// `INSERT INTO "table" ("col", ...) VALUES (:col, ...) [ON CONFLICT ...]
/// [RETURNING *]`. The `on_conflict` clause text is spliced verbatim after
/// the keyword, mirroring the original surface.
pub fn insert(
    table: &str,
    values: &[(String, Value)],
    returning: bool,
    on_conflict: Option<&str>,
) -> Statement {
    let columns: Vec<String> = values.iter().map(|(name, _)| quote_ident(name)).collect();
    let placeholders: Vec<String> = values.iter().map(|(name, _)| format!(":{name}")).collect();

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        columns.join(","),
        placeholders.join(",")
    );
    if let Some(clause) = on_conflict {
        sql.push_str(" ON CONFLICT ");
        sql.push_str(clause);
    }
    if returning {
        sql.push_str(" RETURNING *");
    }

    Statement {
        sql,
        binds: values.to_vec(),
    }
}

/// Render an UPDATE.
///
/// SET values bind under `update_<col>` names so a column can appear in both
/// the SET list and the WHERE clause without colliding. Array-valued WHERE
/// binds are inlined here (the documented driver limitation); array-valued
/// SET binds are inlined the same way for consistency.
pub fn update(table: &str, set: &[(String, Value)], filters: &Filters) -> Statement {
    let set_clauses: Vec<String> = set
        .iter()
        .map(|(name, _)| format!("{} = :update_{name}", quote_ident(name)))
        .collect();
    let mut binds: Vec<(String, Value)> = set
        .iter()
        .map(|(name, value)| (format!("update_{name}"), value.clone()))
        .collect();

    let where_clause = filters.render_where();
    let mut sql = format!(
        "UPDATE {} SET {}",
        quote_ident(table),
        set_clauses.join(", ")
    );
    if !where_clause.sql.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_clause.sql);
    }
    binds.extend(where_clause.binds);

    let (sql, binds) = inline_arrays(sql, binds);
    Statement { sql, binds }
}

/// Render a DELETE.
pub fn delete(table: &str, filters: &Filters) -> Statement {
    let where_clause = filters.render_where();
    let mut sql = format!("DELETE FROM {}", quote_ident(table));
    if !where_clause.sql.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_clause.sql);
    }
    Statement {
        sql,
        binds: where_clause.binds,
    }
}

/// Replace every `:name` placeholder occurrence with `replacement`.
///
/// Occurrences are matched on identifier boundaries (`:id` does not match
/// inside `:id_next`), `::` casts are skipped, and placeholders inside
/// single-quoted literals are left alone.
pub fn replace_placeholder(sql: &str, name: &str, replacement: &str) -> String {
    let mut out: Vec<u8> = Vec::with_capacity(sql.len());
    let bytes = sql.as_bytes();
    let mut i = 0;
    let mut in_string = false;

    while i < bytes.len() {
        let c = bytes[i];
        if in_string {
            out.push(c);
            if c == b'\'' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match c {
            b'\'' => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            b':' => {
                // Skip `::` casts entirely.
                if i + 1 < bytes.len() && bytes[i + 1] == b':' {
                    out.extend_from_slice(b"::");
                    i += 2;
                    continue;
                }
                let rest = &sql[i + 1..];
                if rest.starts_with(name) {
                    let boundary = rest[name.len()..]
                        .chars()
                        .next()
                        .is_none_or(|c| !c.is_ascii_alphanumeric() && c != '_');
                    if boundary {
                        out.extend_from_slice(replacement.as_bytes());
                        i += 1 + name.len();
                        continue;
                    }
                }
                out.push(b':');
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    // Splices are valid UTF-8 and the scan is byte-preserving.
    String::from_utf8(out).expect("rewritten SQL stays utf-8")
}

/// Inline every array-valued bind into the SQL text as an escaped literal
/// list and drop it from the bind map.
pub fn inline_arrays(sql: String, binds: Vec<(String, Value)>) -> (String, Vec<(String, Value)>) {
    let mut sql = sql;
    let mut kept = Vec::with_capacity(binds.len());
    for (name, value) in binds {
        if let Value::Array(_) = value {
            sql = replace_placeholder(&sql, &name, &escape_literal(&value));
        } else {
            kept.push((name, value));
        }
    }
    (sql, kept)
}

/// Convert named `:param` placeholders to positional `$n` parameters.
///
/// Each distinct name is assigned one ordinal at its first appearance;
/// repeated references reuse it. Fails before any I/O when the SQL
/// references a name the bind map does not carry.
pub fn to_positional(sql: &str, binds: &[(String, Value)]) -> Result<(String, Vec<Value>), Error> {
    let mut out: Vec<u8> = Vec::with_capacity(sql.len());
    let mut params: Vec<Value> = Vec::with_capacity(binds.len());
    let mut assigned: Vec<&str> = Vec::with_capacity(binds.len());

    let bytes = sql.as_bytes();
    let mut i = 0;
    let mut in_string = false;

    while i < bytes.len() {
        let c = bytes[i];
        if in_string {
            out.push(c);
            if c == b'\'' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match c {
            b'\'' => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            b':' => {
                if i + 1 < bytes.len() && bytes[i + 1] == b':' {
                    out.extend_from_slice(b"::");
                    i += 2;
                    continue;
                }
                let rest = &sql[i + 1..];
                let end = rest
                    .char_indices()
                    .find(|(_, c)| !c.is_ascii_alphanumeric() && *c != '_')
                    .map_or(rest.len(), |(idx, _)| idx);
                if end == 0 {
                    out.push(b':');
                    i += 1;
                    continue;
                }
                let name = &rest[..end];
                let ordinal = match assigned.iter().position(|n| *n == name) {
                    Some(pos) => pos + 1,
                    None => {
                        let Some((bound_name, value)) = binds.iter().find(|(n, _)| n == name)
                        else {
                            return Err(Error::Query(QueryError::new(
                                QueryErrorKind::Syntax,
                                format!("no bind value for placeholder :{name}"),
                            )));
                        };
                        assigned.push(bound_name);
                        params.push(value.clone());
                        assigned.len()
                    }
                };
                out.extend_from_slice(format!("${ordinal}").as_bytes());
                i += 1 + end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    Ok((
        String::from_utf8(out).expect("rewritten SQL stays utf-8"),
        params,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::Predicate;

    #[test]
    fn select_star_with_equality() {
        let stmt = select("events", &Filters::new().value("id", 1), &[], None, None, None);
        assert_eq!(stmt.sql, "SELECT * FROM \"events\" WHERE id = :id");
        assert_eq!(stmt.binds, vec![("id".to_string(), Value::Int(1))]);
    }

    #[test]
    fn select_star_default_columns() {
        let stmt = select("events", &Filters::new(), &["*"], None, None, None);
        assert_eq!(stmt.sql, "SELECT * FROM \"events\"");
    }

    #[test]
    fn select_operator_inlines() {
        let stmt = select(
            "events",
            &Filters::new().pred("id", Predicate::compare("<", 1)),
            &[],
            None,
            None,
            None,
        );
        assert_eq!(stmt.sql, "SELECT * FROM \"events\" WHERE id < 1");
        assert!(stmt.binds.is_empty());
    }

    #[test]
    fn select_raw_verbatim() {
        let stmt = select(
            "events",
            &Filters::new().pred(
                "query",
                Predicate::raw_bound("strpos(lower(c), :query) > 0", "abc"),
            ),
            &[],
            None,
            None,
            None,
        );
        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"events\" WHERE strpos(lower(c), :query) > 0"
        );
        assert_eq!(
            stmt.binds,
            vec![("query".to_string(), Value::Text("abc".into()))]
        );
    }

    #[test]
    fn select_not_null() {
        let stmt = select(
            "events",
            &Filters::new().pred("query", Predicate::NotNull),
            &[],
            None,
            None,
            None,
        );
        assert_eq!(stmt.sql, "SELECT * FROM \"events\" WHERE query IS NOT NULL");
    }

    #[test]
    fn select_between() {
        let stmt = select(
            "events",
            &Filters::new().pred("query", Predicate::between(1, 5)),
            &[],
            None,
            None,
            None,
        );
        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"events\" WHERE query BETWEEN 1 AND 5"
        );
    }

    #[test]
    fn select_clause_ordering() {
        let stmt = select(
            "events",
            &Filters::new().value("kind", "login"),
            &["id", "kind"],
            Some(10),
            Some(20),
            Some("id DESC"),
        );
        assert_eq!(
            stmt.sql,
            "SELECT id, kind FROM \"events\" WHERE kind = :kind ORDER BY id DESC LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn insert_with_returning_and_conflict() {
        let values = vec![
            ("name".to_string(), Value::Text("north".into())),
            ("score".to_string(), Value::Int(10)),
        ];
        let stmt = insert("guilds", &values, true, Some("DO NOTHING"));
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"guilds\" (\"name\",\"score\") VALUES (:name,:score) ON CONFLICT DO NOTHING RETURNING *"
        );
        assert_eq!(stmt.binds.len(), 2);
    }

    #[test]
    fn update_prefixes_set_binds() {
        let set = vec![("score".to_string(), Value::Int(11))];
        let stmt = update("guilds", &set, &Filters::new().value("id", 3));
        assert_eq!(
            stmt.sql,
            "UPDATE \"guilds\" SET \"score\" = :update_score WHERE id = :id"
        );
        assert_eq!(
            stmt.binds,
            vec![
                ("update_score".to_string(), Value::Int(11)),
                ("id".to_string(), Value::Int(3)),
            ]
        );
    }

    #[test]
    fn update_inlines_array_where_values() {
        let set = vec![("score".to_string(), Value::Int(0))];
        let stmt = update(
            "guilds",
            &set,
            &Filters::new().value("id", vec![Value::Int(1), Value::Int(2)]),
        );
        assert_eq!(
            stmt.sql,
            "UPDATE \"guilds\" SET \"score\" = :update_score WHERE id IN (1,2)"
        );
        assert_eq!(stmt.binds, vec![("update_score".to_string(), Value::Int(0))]);
    }

    #[test]
    fn delete_renders_where() {
        let stmt = delete("guilds", &Filters::new().value("id", 3));
        assert_eq!(stmt.sql, "DELETE FROM \"guilds\" WHERE id = :id");
    }

    #[test]
    fn delete_without_filters_has_no_where() {
        let stmt = delete("guilds", &Filters::new());
        assert_eq!(stmt.sql, "DELETE FROM \"guilds\"");
    }

    #[test]
    fn placeholder_replacement_respects_boundaries() {
        let out = replace_placeholder("a = :id AND b = :id_next", "id", "1");
        assert_eq!(out, "a = 1 AND b = :id_next");
    }

    #[test]
    fn placeholder_replacement_skips_casts_and_strings() {
        let out = replace_placeholder("c::text = ':id' AND d = :id", "id", "7");
        assert_eq!(out, "c::text = ':id' AND d = 7");
    }

    #[test]
    fn inline_arrays_rewrites_and_drops_bind() {
        let binds = vec![
            ("id".to_string(), Value::Array(vec![Value::Int(1), Value::Int(2)])),
            ("name".to_string(), Value::Text("x".into())),
        ];
        let (sql, kept) = inline_arrays(
            "SELECT * FROM t WHERE id IN (:id) AND name = :name".to_string(),
            binds,
        );
        assert_eq!(sql, "SELECT * FROM t WHERE id IN (1,2) AND name = :name");
        assert_eq!(kept, vec![("name".to_string(), Value::Text("x".into()))]);
    }

    #[test]
    fn inline_arrays_empty_list_renders_null() {
        let binds = vec![("id".to_string(), Value::Array(vec![]))];
        let (sql, kept) = inline_arrays("WHERE id IN (:id)".to_string(), binds);
        assert_eq!(sql, "WHERE id IN (NULL)");
        assert!(kept.is_empty());
    }

    #[test]
    fn positional_conversion_orders_by_first_use() {
        let binds = vec![
            ("b".to_string(), Value::Int(2)),
            ("a".to_string(), Value::Int(1)),
        ];
        let (sql, params) = to_positional("x = :a AND y = :b AND z = :a", &binds).unwrap();
        assert_eq!(sql, "x = $1 AND y = $2 AND z = $1");
        assert_eq!(params, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn positional_conversion_rejects_unbound_names() {
        let err = to_positional("x = :missing", &[]).unwrap_err();
        assert!(matches!(err, Error::Query(_)));
    }

    #[test]
    fn positional_conversion_ignores_casts() {
        let binds = vec![("v".to_string(), Value::Int(1))];
        let (sql, params) = to_positional("v::bigint = :v", &binds).unwrap();
        assert_eq!(sql, "v::bigint = $1");
        assert_eq!(params.len(), 1);
    }
}
