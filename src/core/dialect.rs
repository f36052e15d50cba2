//! SQL dialect definitions
//!
//! Statements are always rendered with generic `?` placeholders and rewritten
//! to the dialect's own parameter syntax right before execution.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported SQL dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Dialect {
    /// PostgreSQL
    #[default]
    Postgres,
    /// SQLite
    Sqlite,
}

impl Dialect {
    /// Convert dialect to string representation
    pub fn to_str(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite",
        }
    }

    /// Placeholder syntax expected by the driver
    pub fn placeholder_format(&self) -> PlaceholderFormat {
        match self {
            Dialect::Postgres => PlaceholderFormat::Dollar,
            Dialect::Sqlite => PlaceholderFormat::Question,
        }
    }

    /// Rewrite generic `?` placeholders into this dialect's syntax
    pub fn rebind(&self, sql: &str) -> String {
        self.placeholder_format().rebind(sql)
    }

    /// Catalog query answering whether a table exists; takes the table name
    /// as its single argument
    pub fn table_exists_sql(&self) -> &'static str {
        match self {
            Dialect::Postgres => {
                "SELECT EXISTS (SELECT FROM pg_tables WHERE schemaname = 'public' AND tablename = ?) AS found"
            }
            Dialect::Sqlite => {
                "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?) AS found"
            }
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            _ => Err(format!("Invalid dialect: '{}'", s)),
        }
    }
}

/// Parameter placeholder syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaceholderFormat {
    /// `?`
    #[default]
    Question,
    /// `$1`, `$2`, ... numbered positionally
    Dollar,
}

impl PlaceholderFormat {
    /// Rewrite `?` placeholders into this format.
    ///
    /// Question marks inside single-quoted literals or double-quoted
    /// identifiers are left alone, and `??` is an escaped literal `?` in
    /// every format.
    pub fn rebind(&self, sql: &str) -> String {
        let mut out = String::with_capacity(sql.len() + 16);
        let mut chars = sql.chars().peekable();
        let mut quote: Option<char> = None;
        let mut n = 0usize;

        while let Some(c) = chars.next() {
            match (quote, c) {
                (Some(q), _) if c == q => {
                    quote = None;
                    out.push(c);
                }
                (Some(_), _) => out.push(c),
                (None, '\'' | '"') => {
                    quote = Some(c);
                    out.push(c);
                }
                (None, '?') if chars.peek() == Some(&'?') => {
                    chars.next();
                    out.push('?');
                }
                (None, '?') if *self == PlaceholderFormat::Question => out.push('?'),
                (None, '?') => {
                    n += 1;
                    out.push('$');
                    out.push_str(&n.to_string());
                }
                (None, _) => out.push(c),
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_from_str() {
        assert_eq!("postgresql".parse::<Dialect>().ok(), Some(Dialect::Postgres));
        assert_eq!("sqlite3".parse::<Dialect>().ok(), Some(Dialect::Sqlite));
        assert_eq!("oracle".parse::<Dialect>().ok(), None);
    }

    #[test]
    fn test_rebind_dollar() {
        let sql = "UPDATE stops SET name = ?, code = ? WHERE id = ?";
        assert_eq!(
            Dialect::Postgres.rebind(sql),
            "UPDATE stops SET name = $1, code = $2 WHERE id = $3"
        );
        assert_eq!(Dialect::Sqlite.rebind(sql), sql);
    }

    #[test]
    fn test_rebind_unescapes_literal_question_mark_in_every_format() {
        let sql = "SELECT * FROM t WHERE tags ?? 'k' AND id = ?";
        assert_eq!(
            Dialect::Sqlite.rebind(sql),
            "SELECT * FROM t WHERE tags ? 'k' AND id = ?"
        );
        assert_eq!(
            Dialect::Postgres.rebind(sql),
            "SELECT * FROM t WHERE tags ? 'k' AND id = $1"
        );
    }

    #[test]
    fn test_rebind_skips_literals() {
        let sql = "SELECT '?' AS q, \"a?b\" FROM t WHERE x = ? AND y ?? 'k'";
        assert_eq!(
            PlaceholderFormat::Dollar.rebind(sql),
            "SELECT '?' AS q, \"a?b\" FROM t WHERE x = $1 AND y ? 'k'"
        );
    }
}
