// erpload/src/engine/sql.rs
//! Parameterized SQL statements.
//!
//! Values always travel as bind parameters. Identifiers (database names in
//! DDL, which Postgres cannot parameterize) go through `quote_ident`.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Text(String),
    Int(i64),
    Bool(bool),
    TextList(Vec<String>),
    Null,
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<Vec<String>> for SqlValue {
    fn from(v: Vec<String>) -> Self {
        SqlValue::TextList(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// One SQL statement with its positional (`$1`, `$2`, ...) parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub binds: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            binds: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.binds.push(value.into());
        self
    }

    pub fn create_database(name: &str, owner: Option<&str>) -> Self {
        let mut sql = format!("CREATE DATABASE {}", quote_ident(name));
        if let Some(owner) = owner.filter(|o| !o.is_empty()) {
            sql.push_str(&format!(" OWNER {}", quote_ident(owner)));
        }
        Self::new(sql)
    }

    pub fn drop_database(name: &str) -> Self {
        Self::new(format!("DROP DATABASE IF EXISTS {}", quote_ident(name)))
    }

    pub fn rename_database(old: &str, new: &str) -> Self {
        Self::new(format!(
            "ALTER DATABASE {} RENAME TO {}",
            quote_ident(old),
            quote_ident(new)
        ))
    }

    /// `COMMENT ON` takes a literal, not a parameter.
    pub fn comment_on_database(name: &str, comment: &str) -> Self {
        Self::new(format!(
            "COMMENT ON DATABASE {} IS {}",
            quote_ident(name),
            quote_literal(comment)
        ))
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)
    }
}

/// Quotes an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a string literal, doubling embedded single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
