//! The predicate algebra.
//!
//! A [`Predicate`] is a typed, renderable representation of one WHERE-clause
//! condition. Rendering is a pure function from `(predicate, column)` to a
//! SQL fragment; values that must be inlined go through the
//! [`escape_literal`] choke point so they escape identically everywhere.

use stratum_core::{Value, escape_literal};

/// One WHERE-clause condition, bound to a column at render time.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `col = :col`, with the value carried in the bind map.
    Equals(Value),
    /// `col IS NULL`.
    IsNull,
    /// `col IS NOT NULL`.
    NotNull,
    /// `col IN (:col)`. The executor replaces the placeholder with the
    /// literal-escaped, comma-joined list before dispatch — the driver does
    /// not support array-typed bind parameters.
    In(Vec<Value>),
    /// `col IN (<subquery>)`, the subquery SQL spliced verbatim.
    InSubquery(String),
    /// `col BETWEEN <lo> AND <hi>`, both bounds inlined as literals.
    Between(Value, Value),
    /// `col <op> <value>`, the value inlined as a literal.
    Compare(String, Value),
    /// A raw SQL fragment rendered verbatim. `display` is what gets bound
    /// under the column's placeholder (and what logging/stringification
    /// shows) — it is distinct from the SQL rendering on purpose.
    Raw {
        /// The fragment, may reference `:column` placeholders.
        sql: String,
        /// Value bound under the column's name, `Value::Null` when unused.
        display: Value,
    },
}

impl Predicate {
    /// Comparison against an inlined literal, e.g. `compare("<", 10)`.
    pub fn compare(op: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Compare(op.into(), value.into())
    }

    /// Membership in a literal list.
    pub fn in_list<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Predicate::In(values.into_iter().map(Into::into).collect())
    }

    /// A raw fragment with no bound value.
    pub fn raw(sql: impl Into<String>) -> Self {
        Predicate::Raw {
            sql: sql.into(),
            display: Value::Null,
        }
    }

    /// A raw fragment whose placeholder binds `display`.
    pub fn raw_bound(sql: impl Into<String>, display: impl Into<Value>) -> Self {
        Predicate::Raw {
            sql: sql.into(),
            display: display.into(),
        }
    }

    /// Range with both bounds inclusive.
    pub fn between(lo: impl Into<Value>, hi: impl Into<Value>) -> Self {
        Predicate::Between(lo.into(), hi.into())
    }

    /// Render this predicate into a SQL fragment for `column`.
    pub fn render(&self, column: &str) -> String {
        match self {
            Predicate::Equals(_) => format!("{column} = :{column}"),
            Predicate::IsNull => format!("{column} IS NULL"),
            Predicate::NotNull => format!("{column} IS NOT NULL"),
            Predicate::In(_) => format!("{column} IN (:{column})"),
            Predicate::InSubquery(sql) => format!("{column} IN ({sql})"),
            Predicate::Between(lo, hi) => format!(
                "{column} BETWEEN {} AND {}",
                escape_literal(lo),
                escape_literal(hi)
            ),
            Predicate::Compare(op, value) => {
                format!("{column} {op} {}", escape_literal(value))
            }
            Predicate::Raw { sql, .. } => sql.clone(),
        }
    }

    /// The value this predicate contributes to the bind map, if any.
    pub fn bind_value(&self) -> Option<Value> {
        match self {
            Predicate::Equals(v) => Some(v.clone()),
            Predicate::In(values) => Some(Value::Array(values.clone())),
            Predicate::Raw { display, .. } if !display.is_null() => Some(display.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equals_binds() {
        let p = Predicate::Equals(Value::Int(1));
        assert_eq!(p.render("id"), "id = :id");
        assert_eq!(p.bind_value(), Some(Value::Int(1)));
    }

    #[test]
    fn null_checks() {
        assert_eq!(Predicate::IsNull.render("q"), "q IS NULL");
        assert_eq!(Predicate::NotNull.render("q"), "q IS NOT NULL");
        assert_eq!(Predicate::NotNull.bind_value(), None);
    }

    #[test]
    fn compare_inlines_literal() {
        let p = Predicate::compare("<", 1);
        assert_eq!(p.render("id"), "id < 1");
        assert_eq!(p.bind_value(), None);

        let p = Predicate::compare(">=", "x'y");
        assert_eq!(p.render("name"), "name >= 'x''y'");
    }

    #[test]
    fn between_inlines_bounds() {
        let p = Predicate::between(1, 5);
        assert_eq!(p.render("q"), "q BETWEEN 1 AND 5");
    }

    #[test]
    fn in_list_renders_placeholder() {
        let p = Predicate::in_list([1i64, 2, 3]);
        assert_eq!(p.render("id"), "id IN (:id)");
        assert_eq!(
            p.bind_value(),
            Some(Value::Array(vec![
                Value::Int(1),
                Value::Int(2),
                Value::Int(3)
            ]))
        );
    }

    #[test]
    fn in_subquery_splices_sql() {
        let p = Predicate::InSubquery("SELECT id FROM banned".to_string());
        assert_eq!(p.render("user_id"), "user_id IN (SELECT id FROM banned)");
    }

    #[test]
    fn raw_renders_verbatim_and_binds_display() {
        let p = Predicate::raw_bound("strpos(lower(c), :query) > 0", "needle");
        assert_eq!(p.render("query"), "strpos(lower(c), :query) > 0");
        assert_eq!(p.bind_value(), Some(Value::Text("needle".into())));

        let bare = Predicate::raw("deleted_at IS NULL");
        assert_eq!(bare.bind_value(), None);
    }

    #[test]
    fn render_is_deterministic() {
        let p = Predicate::between(1, 5);
        assert_eq!(p.render("q"), p.render("q"));
    }
}
