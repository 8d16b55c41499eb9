//! Insertion-ordered filter maps.
//!
//! A [`Filters`] maps column names to scalars, lists, or predicates and is
//! the targeting argument of every select/update/delete/find. Entries render
//! in insertion order, AND-joined; the same order feeds cache-key derivation
//! in the record layer, so two maps with the same entries in a different
//! order produce a different WHERE clause string and a different cache key.
//! That is a contract, not an accident.

use crate::predicate::Predicate;
use stratum_core::Value;

/// One filter-map entry: either a plain value or an explicit predicate.
///
/// Scalars keep the original shorthand semantics: a NULL value means
/// `IS NULL`, a list means membership, anything else means equality.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterEntry {
    /// A plain value with shape-driven rendering.
    Scalar(Value),
    /// An explicit predicate from the algebra.
    Where(Predicate),
}

impl From<Value> for FilterEntry {
    fn from(v: Value) -> Self {
        FilterEntry::Scalar(v)
    }
}

impl From<Predicate> for FilterEntry {
    fn from(p: Predicate) -> Self {
        FilterEntry::Where(p)
    }
}

macro_rules! scalar_entry_from {
    ($($ty:ty),+) => {
        $(impl From<$ty> for FilterEntry {
            fn from(v: $ty) -> Self {
                FilterEntry::Scalar(Value::from(v))
            }
        })+
    };
}

scalar_entry_from!(bool, i32, i64, u32, f64, &str, String, Vec<Value>);

/// A rendered WHERE clause: the fragment plus its named bind map.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderedWhere {
    /// AND-joined condition fragments; empty when there were no filters.
    pub sql: String,
    /// Named binds contributed by the entries, in entry order.
    pub binds: Vec<(String, Value)>,
}

/// An insertion-ordered `column → value/predicate` map.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filters {
    entries: Vec<(String, FilterEntry)>,
}

impl Filters {
    /// An empty filter map (matches every row).
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain a scalar value filter (`col = v`, `col IS NULL` for null,
    /// membership for lists).
    pub fn value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries
            .push((column.into(), FilterEntry::Scalar(value.into())));
        self
    }

    /// Chain an explicit predicate filter.
    pub fn pred(mut self, column: impl Into<String>, predicate: Predicate) -> Self {
        self.entries
            .push((column.into(), FilterEntry::Where(predicate)));
        self
    }

    /// Append an entry in place.
    pub fn push(&mut self, column: impl Into<String>, entry: impl Into<FilterEntry>) {
        self.entries.push((column.into(), entry.into()));
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FilterEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Render the WHERE clause and its bind map.
    ///
    /// Produces an empty `sql` for an empty map; callers omit the WHERE
    /// keyword in that case.
    pub fn render_where(&self) -> RenderedWhere {
        let mut fragments = Vec::with_capacity(self.entries.len());
        let mut binds = Vec::new();

        for (column, entry) in &self.entries {
            match entry {
                FilterEntry::Scalar(Value::Null) => {
                    fragments.push(format!("{column} IS NULL"));
                }
                FilterEntry::Scalar(Value::Array(items)) => {
                    fragments.push(format!("{column} IN (:{column})"));
                    binds.push((column.clone(), Value::Array(items.clone())));
                }
                FilterEntry::Scalar(value) => {
                    fragments.push(format!("{column} = :{column}"));
                    binds.push((column.clone(), value.clone()));
                }
                FilterEntry::Where(predicate) => {
                    fragments.push(predicate.render(column));
                    if let Some(value) = predicate.bind_value() {
                        binds.push((column.clone(), value));
                    }
                }
            }
        }

        RenderedWhere {
            sql: fragments.join(" AND "),
            binds,
        }
    }
}

impl<K: Into<String>, E: Into<FilterEntry>> FromIterator<(K, E)> for Filters {
    fn from_iter<I: IntoIterator<Item = (K, E)>>(iter: I) -> Self {
        let mut filters = Filters::new();
        for (k, e) in iter {
            filters.push(k, e);
        }
        filters
    }
}

/// Build a [`Filters`] map in place:
///
/// ```ignore
/// let f = filters! { "id" => 1, "state" => Predicate::NotNull };
/// ```
#[macro_export]
macro_rules! filters {
    () => { $crate::Filters::new() };
    ($($col:expr => $val:expr),+ $(,)?) => {{
        let mut f = $crate::Filters::new();
        $( f.push($col, $val); )+
        f
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_renders_equality() {
        let w = Filters::new().value("id", 1).render_where();
        assert_eq!(w.sql, "id = :id");
        assert_eq!(w.binds, vec![("id".to_string(), Value::Int(1))]);
    }

    #[test]
    fn null_renders_is_null() {
        let w = Filters::new().value("deleted_at", Value::Null).render_where();
        assert_eq!(w.sql, "deleted_at IS NULL");
        assert!(w.binds.is_empty());
    }

    #[test]
    fn list_renders_membership() {
        let w = Filters::new()
            .value("id", vec![Value::Int(1), Value::Int(2)])
            .render_where();
        assert_eq!(w.sql, "id IN (:id)");
        assert_eq!(
            w.binds,
            vec![(
                "id".to_string(),
                Value::Array(vec![Value::Int(1), Value::Int(2)])
            )]
        );
    }

    #[test]
    fn entries_join_with_and_in_insertion_order() {
        let w = Filters::new()
            .value("guild_id", 7)
            .pred("rank", Predicate::compare(">", 3))
            .value("deleted_at", Value::Null)
            .render_where();
        assert_eq!(w.sql, "guild_id = :guild_id AND rank > 3 AND deleted_at IS NULL");
        assert_eq!(w.binds, vec![("guild_id".to_string(), Value::Int(7))]);
    }

    #[test]
    fn order_changes_rendering() {
        let a = Filters::new().value("a", 1).value("b", 2).render_where();
        let b = Filters::new().value("b", 2).value("a", 1).render_where();
        assert_ne!(a.sql, b.sql);
    }

    #[test]
    fn rendering_is_deterministic() {
        let f = Filters::new().value("a", 1).pred("b", Predicate::between(1, 5));
        assert_eq!(f.render_where(), f.render_where());
    }

    #[test]
    fn raw_predicate_keeps_placeholder_and_binds_display() {
        let f = Filters::new().pred(
            "query",
            Predicate::raw_bound("strpos(lower(c), :query) > 0", "abc"),
        );
        let w = f.render_where();
        assert_eq!(w.sql, "strpos(lower(c), :query) > 0");
        assert_eq!(w.binds, vec![("query".to_string(), Value::Text("abc".into()))]);
    }

    #[test]
    fn filters_macro() {
        let f = filters! { "id" => 1, "state" => Predicate::NotNull };
        let w = f.render_where();
        assert_eq!(w.sql, "id = :id AND state IS NOT NULL");
    }

    #[test]
    fn empty_map_renders_empty() {
        let w = Filters::new().render_where();
        assert!(w.sql.is_empty());
        assert!(w.binds.is_empty());
    }
}
