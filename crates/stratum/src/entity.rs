//! Static entity descriptors.
//!
//! An [`Entity`] declares a table's name, primary-key column, and column
//! set as compile-time constants. Records check field access against the
//! descriptor, so "unknown field access fails" holds without any runtime
//! schema discovery.

/// A statically declared table mapping.
pub trait Entity: Send + Sync + 'static {
    /// Table name.
    const TABLE: &'static str;
    /// Primary-key column.
    const PRIMARY_KEY: &'static str;
    /// Declared columns.
    const COLUMNS: &'static [&'static str];
    /// Type name used in cache keys. Bit-stability matters for cross-deploy
    /// cache reuse — renaming the entity invalidates its cached lookups.
    const NAME: &'static str;

    /// Whether the descriptor declares `column`.
    fn has_column(column: &str) -> bool {
        Self::COLUMNS.contains(&column)
    }
}

/// Declare an entity descriptor:
///
/// ```ignore
/// entity! {
///     pub struct Guild {
///         table: "guilds",
///         primary_key: "id",
///         columns: [id, name, score, created_at],
///     }
/// }
/// ```
#[macro_export]
macro_rules! entity {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            table: $table:literal,
            primary_key: $pk:literal,
            columns: [$($col:ident),+ $(,)?] $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name;

        impl $crate::Entity for $name {
            const TABLE: &'static str = $table;
            const PRIMARY_KEY: &'static str = $pk;
            const COLUMNS: &'static [&'static str] = &[$(stringify!($col)),+];
            const NAME: &'static str = stringify!($name);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    entity! {
        struct Widget {
            table: "widgets",
            primary_key: "id",
            columns: [id, label],
        }
    }

    #[test]
    fn descriptor_constants() {
        assert_eq!(Widget::TABLE, "widgets");
        assert_eq!(Widget::PRIMARY_KEY, "id");
        assert_eq!(Widget::COLUMNS, &["id", "label"]);
        assert_eq!(Widget::NAME, "Widget");
    }

    #[test]
    fn column_membership() {
        assert!(Widget::has_column("label"));
        assert!(!Widget::has_column("price"));
    }
}
