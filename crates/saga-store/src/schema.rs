//! Table schema descriptors.
//!
//! A [`TableSchema`] is the single description of a runtime-declared table:
//! ordered columns with scalar types, primary-key columns, index columns and
//! foreign-key references. It renders its own DDL and is rebuilt from
//! `PRAGMA` introspection when an existing file is opened.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Scalar column types supported by the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Boolean,
}

impl ColumnType {
    /// The SQL type name used in `CREATE TABLE`.
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
            Self::Boolean => "BOOLEAN",
        }
    }

    /// Map a declared SQLite type back to a column type.
    ///
    /// Follows SQLite's affinity rules, except that `BOOL` is checked first
    /// so booleans survive a reopen.
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.to_ascii_uppercase();
        if upper.contains("BOOL") {
            Self::Boolean
        } else if upper.contains("INT") {
            Self::Integer
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            Self::Real
        } else {
            Self::Text
        }
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Text => "string",
            Self::Boolean => "boolean",
        }
    }
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

/// A reference from one column to a column of another table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

/// Schema of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_keys: Vec<String>,
    #[serde(default)]
    pub index_keys: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    /// Start an empty schema for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_keys: Vec::new(),
            index_keys: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Builder: append a column.
    pub fn column(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.columns.push(Column {
            name: name.into(),
            ty,
        });
        self
    }

    /// Builder: set the primary-key columns.
    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_keys = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: add an index on `column`.
    pub fn index(mut self, column: impl Into<String>) -> Self {
        self.index_keys.push(column.into());
        self
    }

    /// Builder: add a foreign-key reference.
    pub fn foreign_key(
        mut self,
        column: impl Into<String>,
        ref_table: impl Into<String>,
        ref_column: impl Into<String>,
    ) -> Self {
        self.foreign_keys.push(ForeignKey {
            column: column.into(),
            ref_table: ref_table.into(),
            ref_column: ref_column.into(),
        });
        self
    }

    /// Declared type of `column`, if it exists.
    pub fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.columns.iter().find(|c| c.name == column).map(|c| c.ty)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_type(column).is_some()
    }

    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_keys.iter().any(|k| k == column)
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> impl Iterator<Item = &String> {
        self.columns.iter().map(|c| &c.name)
    }

    /// Check that the schema can be materialized.
    pub fn validate(&self) -> StoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(StoreError::InvalidSchema("table name is empty".into()));
        }
        if self.columns.is_empty() {
            return Err(StoreError::InvalidSchema(format!(
                "table `{}` declares no columns",
                self.name
            )));
        }
        if self.primary_keys.is_empty() {
            return Err(StoreError::InvalidSchema(format!(
                "table `{}` declares no primary key",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.name.is_empty() {
                return Err(StoreError::InvalidSchema(format!(
                    "table `{}` has an unnamed column",
                    self.name
                )));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(StoreError::InvalidSchema(format!(
                    "column `{}` declared twice on `{}`",
                    column.name, self.name
                )));
            }
        }

        let referenced = self
            .primary_keys
            .iter()
            .chain(&self.index_keys)
            .chain(self.foreign_keys.iter().map(|fk| &fk.column));
        for column in referenced {
            if !self.has_column(column) {
                return Err(StoreError::UnknownColumn {
                    table: self.name.clone(),
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }

    /// DDL statements: the `CREATE TABLE` followed by one `CREATE INDEX` per
    /// index column.
    pub(crate) fn create_statements(&self) -> Vec<String> {
        let table = quote_ident(&self.name);

        let mut defs: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let not_null = if self.primary_keys.contains(&c.name) {
                    " NOT NULL"
                } else {
                    ""
                };
                format!("{} {}{not_null}", quote_ident(&c.name), c.ty.sql_type())
            })
            .collect();
        defs.push(format!("PRIMARY KEY ({})", quote_list(&self.primary_keys)));
        for fk in &self.foreign_keys {
            defs.push(format!(
                "FOREIGN KEY ({}) REFERENCES {} ({})",
                quote_ident(&fk.column),
                quote_ident(&fk.ref_table),
                quote_ident(&fk.ref_column)
            ));
        }

        let mut statements = vec![format!("CREATE TABLE {table} ({})", defs.join(", "))];
        for column in &self.index_keys {
            statements.push(format!(
                "CREATE INDEX {} ON {table} ({})",
                quote_ident(&format!("idx_{}_{}", self.name, column)),
                quote_ident(column)
            ));
        }
        statements
    }

    /// `ORDER BY` clause over the primary key (rowid when there is none).
    pub(crate) fn order_by(&self, descending: bool) -> String {
        let dir = if descending { "DESC" } else { "ASC" };
        if self.primary_keys.is_empty() {
            return format!("ORDER BY rowid {dir}");
        }
        let parts: Vec<String> = self
            .primary_keys
            .iter()
            .map(|k| format!("{} {dir}", quote_ident(k)))
            .collect();
        format!("ORDER BY {}", parts.join(", "))
    }
}

/// Quote an SQL identifier, doubling embedded quotes.
///
/// Actor names become column names, so identifiers may contain spaces or
/// punctuation.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn quote_list<'a>(names: impl IntoIterator<Item = &'a String>) -> String {
    names
        .into_iter()
        .map(|n| quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}
