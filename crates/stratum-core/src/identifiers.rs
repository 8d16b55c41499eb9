//! SQL identifier quoting.

/// Quote an identifier for PostgreSQL, doubling any embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
