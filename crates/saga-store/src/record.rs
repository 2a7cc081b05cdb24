//! Dynamic-schema record store.
//!
//! Tables are declared at runtime through a [`TableSchema`] and addressed by
//! name. Every table shares the same [`Row`] representation. Opening an
//! existing file rebuilds the schema registry from SQLite introspection so a
//! saved session can be reloaded without redeclaring its tables.

use std::sync::Arc;

use dashmap::DashMap;
use rusqlite::{Connection, params_from_iter};
use tracing::{debug, info, instrument, warn};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::schema::{ColumnType, ForeignKey, TableSchema, quote_ident, quote_list};
use crate::value::{Row, Value, describe_key};

/// Generic table lifecycle over one embedded SQLite file.
///
/// Cheap to clone; clones share the connection and the schema registry.
#[derive(Clone)]
pub struct RecordStore {
    db: Database,
    schemas: Arc<DashMap<String, Arc<TableSchema>>>,
}

impl RecordStore {
    /// Open (or create) the backing file at `path` and discover its tables.
    pub async fn open(path: impl AsRef<std::path::Path>) -> StoreResult<Self> {
        let db = Database::open_async(path).await?;
        Self::from_database(db).await
    }

    /// Fresh in-memory store with no tables.
    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self {
            db: Database::open_in_memory()?,
            schemas: Arc::new(DashMap::new()),
        })
    }

    /// Wrap an already opened database, discovering every user table in it.
    pub async fn from_database(db: Database) -> StoreResult<Self> {
        let discovered = db.execute(discover_schemas).await?;
        let schemas = DashMap::new();
        for schema in discovered {
            debug!(
                table = %schema.name,
                columns = schema.columns.len(),
                primary_keys = ?schema.primary_keys,
                "discovered table"
            );
            schemas.insert(schema.name.clone(), Arc::new(schema));
        }
        info!(tables = schemas.len(), "record store ready");
        Ok(Self {
            db,
            schemas: Arc::new(schemas),
        })
    }

    /// The underlying database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }

    // ── schema registry ──────────────────────────────────────────────

    /// Register and materialize a new table.
    #[instrument(skip(self, schema), fields(table = %schema.name))]
    pub async fn create_table(&self, schema: TableSchema) -> StoreResult<()> {
        schema.validate()?;
        if self.schemas.contains_key(&schema.name) {
            return Err(StoreError::TableAlreadyExists {
                table: schema.name.clone(),
            });
        }

        let statements = schema.create_statements();
        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                for sql in &statements {
                    tx.execute(sql, [])?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?;

        info!(columns = schema.columns.len(), "table created");
        self.schemas.insert(schema.name.clone(), Arc::new(schema));
        Ok(())
    }

    /// Schema of a registered table.
    pub fn schema(&self, table: &str) -> StoreResult<Arc<TableSchema>> {
        self.schemas
            .get(table)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| StoreError::UnknownTable {
                table: table.to_string(),
            })
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.schemas.contains_key(table)
    }

    /// Names of all registered tables, sorted.
    pub fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schemas.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Primary-key columns of `table`, in key order.
    pub fn primary_keys(&self, table: &str) -> StoreResult<Vec<String>> {
        Ok(self.schema(table)?.primary_keys.clone())
    }

    // ── writes ───────────────────────────────────────────────────────

    /// Insert one row.
    ///
    /// In strict mode every primary-key column must be present and unknown
    /// columns are rejected; otherwise unknown columns are dropped.
    #[instrument(skip(self, row))]
    pub async fn add_row(&self, table: &str, row: Row, strict: bool) -> StoreResult<()> {
        let schema = self.schema(table)?;
        let row = check_row(&schema, row, strict)?;
        if row.is_empty() {
            return Err(StoreError::InvalidArgument(format!(
                "no columns to insert into `{table}`"
            )));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&schema.name),
            quote_list(row.keys()),
            placeholders(row.len())
        );
        let key = describe_key(&row, &schema.primary_keys);
        let values: Vec<Value> = row.into_values().collect();
        let table = schema.name.clone();

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(&sql, params_from_iter(values.iter()))
                    .map_err(|e| duplicate_or(e, &table, &key))?;
                tx.commit()?;
                Ok(())
            })
            .await
    }

    /// Overwrite the supplied non-key columns of the matching row(s).
    ///
    /// Rows are matched on the primary-key columns present in `row`. When
    /// none are present (non-strict mode, or a table without a primary key)
    /// every supplied column becomes part of the match and nothing is
    /// written; the call then only checks that such a row exists.
    ///
    /// Returns the number of matched rows.
    #[instrument(skip(self, row))]
    pub async fn update_row(&self, table: &str, row: Row, strict: bool) -> StoreResult<usize> {
        let schema = self.schema(table)?;
        let row = check_row(&schema, row, strict)?;
        if row.is_empty() {
            return Err(StoreError::InvalidArgument(format!(
                "no columns to match in `{table}`"
            )));
        }

        let mut key_cols: Vec<String> = schema
            .primary_keys
            .iter()
            .filter(|k| row.contains_key(*k))
            .cloned()
            .collect();
        if key_cols.is_empty() {
            key_cols = row.keys().cloned().collect();
        }
        let set_cols: Vec<String> = row
            .keys()
            .filter(|c| !key_cols.contains(*c))
            .cloned()
            .collect();

        let table_ident = quote_ident(&schema.name);
        let where_sql = match_clause(&key_cols);
        let key = describe_key(&row, &key_cols);
        let key_values: Vec<Value> = key_cols.iter().map(|c| row[c].clone()).collect();
        let set_values: Vec<Value> = set_cols.iter().map(|c| row[c].clone()).collect();
        let table = schema.name.clone();

        let matched = if set_cols.is_empty() {
            let sql = format!("SELECT count(*) FROM {table_ident} WHERE {where_sql}");
            self.db
                .execute(move |conn| {
                    let n: i64 =
                        conn.query_row(&sql, params_from_iter(key_values.iter()), |r| r.get(0))?;
                    Ok(n as usize)
                })
                .await?
        } else {
            let assignments: Vec<String> = set_cols
                .iter()
                .map(|c| format!("{} = ?", quote_ident(c)))
                .collect();
            let sql = format!(
                "UPDATE {table_ident} SET {} WHERE {where_sql}",
                assignments.join(", ")
            );
            let dup_key = key.clone();
            let dup_table = table.clone();
            self.db
                .execute_mut(move |conn| {
                    let tx = conn.transaction()?;
                    let n = tx
                        .execute(&sql, params_from_iter(set_values.iter().chain(&key_values)))
                        .map_err(|e| duplicate_or(e, &dup_table, &dup_key))?;
                    tx.commit()?;
                    Ok(n)
                })
                .await?
        };

        if matched == 0 {
            return Err(StoreError::RowNotFound { table, key });
        }
        debug!(matched, "row updated");
        Ok(matched)
    }

    /// Delete every row matching each key tuple, in one transaction.
    ///
    /// Keys that match nothing are skipped with a warning. Returns the total
    /// number of rows removed.
    #[instrument(skip(self, key_rows), fields(keys = key_rows.len()))]
    pub async fn remove_rows(&self, table: &str, key_rows: Vec<Row>) -> StoreResult<usize> {
        let schema = self.schema(table)?;
        let mut deletes = Vec::with_capacity(key_rows.len());
        for key_row in key_rows {
            let key_row = check_columns(&schema, key_row, true)?;
            if key_row.is_empty() {
                return Err(StoreError::InvalidArgument(format!(
                    "empty key for `{table}`"
                )));
            }
            let sql = format!(
                "DELETE FROM {} WHERE {}",
                quote_ident(&schema.name),
                match_clause(key_row.keys())
            );
            let key = describe_key(&key_row, key_row.keys());
            deletes.push((sql, key, key_row.into_values().collect::<Vec<_>>()));
        }

        let table = schema.name.clone();
        let removed = self
            .db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let mut removed = 0;
                for (sql, key, values) in &deletes {
                    let n = tx.execute(sql, params_from_iter(values.iter()))?;
                    if n == 0 {
                        warn!(table = %table, key = %key, "no row matched key, skipping");
                    }
                    removed += n;
                }
                tx.commit()?;
                Ok(removed)
            })
            .await?;

        debug!(removed, "rows removed");
        Ok(removed)
    }

    // ── reads ────────────────────────────────────────────────────────

    /// Up to `n` rows, ordered by primary key descending (rowid when the
    /// table has no primary key).
    #[instrument(skip(self))]
    pub async fn get_last_n_rows(&self, table: &str, n: usize) -> StoreResult<Vec<Row>> {
        let schema = self.schema(table)?;
        let sql = format!(
            "SELECT {} FROM {} {} LIMIT ?",
            quote_list(schema.column_names()),
            quote_ident(&schema.name),
            schema.order_by(true)
        );
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        self.db
            .execute(move |conn| select_rows(conn, &schema, &sql, vec![Value::Integer(limit)]))
            .await
    }

    /// Rows matching any of the supplied column conjunctions, ordered by
    /// primary key ascending.
    ///
    /// Each key row is an AND of `column IS value` terms; the rows are ORed.
    /// Comparison is null-safe.
    #[instrument(skip(self, key_rows), fields(keys = key_rows.len()))]
    pub async fn query_rows_by_keys(&self, table: &str, key_rows: &[Row]) -> StoreResult<Vec<Row>> {
        let schema = self.schema(table)?;
        if key_rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut clauses = Vec::with_capacity(key_rows.len());
        let mut values = Vec::new();
        for key_row in key_rows {
            let key_row = check_columns(&schema, key_row.clone(), true)?;
            if key_row.is_empty() {
                return Err(StoreError::InvalidArgument(format!(
                    "empty key for `{table}`"
                )));
            }
            clauses.push(format!("({})", match_clause(key_row.keys())));
            values.extend(key_row.into_values());
        }

        let sql = format!(
            "SELECT {} FROM {} WHERE {} {}",
            quote_list(schema.column_names()),
            quote_ident(&schema.name),
            clauses.join(" OR "),
            schema.order_by(false)
        );
        self.db
            .execute(move |conn| select_rows(conn, &schema, &sql, values))
            .await
    }

    /// Every row of `table`, ordered by primary key ascending.
    #[instrument(skip(self))]
    pub async fn list_all_rows(&self, table: &str) -> StoreResult<Vec<Row>> {
        let schema = self.schema(table)?;
        let sql = format!(
            "SELECT {} FROM {} {}",
            quote_list(schema.column_names()),
            quote_ident(&schema.name),
            schema.order_by(false)
        );
        self.db
            .execute(move |conn| select_rows(conn, &schema, &sql, Vec::new()))
            .await
    }
}

// ── helpers ──────────────────────────────────────────────────────────

/// Validate a row against `schema`: column names, value types and, in
/// strict mode, primary-key presence. Non-strict mode drops unknown columns.
fn check_row(schema: &TableSchema, row: Row, strict: bool) -> StoreResult<Row> {
    let checked = check_columns(schema, row, strict)?;
    if strict
        && let Some(missing) = schema
            .primary_keys
            .iter()
            .find(|k| matches!(checked.get(*k), None | Some(Value::Null)))
    {
        return Err(StoreError::MissingPrimaryKey {
            table: schema.name.clone(),
            column: missing.clone(),
        });
    }
    Ok(checked)
}

fn check_columns(schema: &TableSchema, row: Row, strict: bool) -> StoreResult<Row> {
    let mut checked = Row::new();
    for (column, value) in row {
        let Some(ty) = schema.column_type(&column) else {
            if strict {
                return Err(StoreError::UnknownColumn {
                    table: schema.name.clone(),
                    column,
                });
            }
            debug!(table = %schema.name, column = %column, "dropping undeclared column");
            continue;
        };
        if !value.fits(ty) {
            return Err(StoreError::TypeMismatch {
                table: schema.name.clone(),
                column,
                expected: ty.label(),
            });
        }
        checked.insert(column, value);
    }
    Ok(checked)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// `"a" IS ? AND "b" IS ?`
fn match_clause<'a>(columns: impl IntoIterator<Item = &'a String>) -> String {
    columns
        .into_iter()
        .map(|c| format!("{} IS ?", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Map a primary-key/unique violation to [`StoreError::DuplicateKey`].
fn duplicate_or(err: rusqlite::Error, table: &str, key: &str) -> StoreError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &err
        && (failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE)
    {
        return StoreError::DuplicateKey {
            table: table.to_string(),
            key: key.to_string(),
        };
    }
    StoreError::Sqlite(err)
}

fn select_rows(
    conn: &Connection,
    schema: &TableSchema,
    sql: &str,
    params: Vec<Value>,
) -> StoreResult<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(params.iter()), |r| {
        let mut row = Row::new();
        for (i, column) in schema.columns.iter().enumerate() {
            row.insert(column.name.clone(), Value::from_sql(r.get_ref(i)?, column.ty));
        }
        Ok(row)
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

// ── discovery ────────────────────────────────────────────────────────

fn discover_schemas(conn: &Connection) -> StoreResult<Vec<TableSchema>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    names.iter().map(|name| discover_table(conn, name)).collect()
}

fn discover_table(conn: &Connection, name: &str) -> StoreResult<TableSchema> {
    let table = quote_ident(name);
    let mut schema = TableSchema::new(name);

    // cid, name, type, notnull, dflt_value, pk
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?.unwrap_or_default(),
                r.get::<_, i64>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut keyed = Vec::new();
    for (column, declared, pk) in columns {
        if pk > 0 {
            keyed.push((pk, column.clone()));
        }
        schema = schema.column(column, ColumnType::from_declared(&declared));
    }
    keyed.sort_by_key(|(pos, _)| *pos);
    schema.primary_keys = keyed.into_iter().map(|(_, c)| c).collect();

    // id, seq, table, from, to, on_update, on_delete, match
    let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({table})"))?;
    schema.foreign_keys = stmt
        .query_map([], |r| {
            Ok(ForeignKey {
                column: r.get(3)?,
                ref_table: r.get(2)?,
                ref_column: r.get::<_, Option<String>>(4)?.unwrap_or_default(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    // seq, name, unique, origin, partial; origin 'c' = CREATE INDEX
    let mut stmt = conn.prepare(&format!("PRAGMA index_list({table})"))?;
    let indexes = stmt
        .query_map([], |r| Ok((r.get::<_, String>(1)?, r.get::<_, String>(3)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    for (index, origin) in indexes {
        if origin != "c" {
            continue;
        }
        let mut stmt = conn.prepare(&format!("PRAGMA index_info({})", quote_ident(&index)))?;
        let cols = stmt
            .query_map([], |r| r.get::<_, Option<String>>(2))?
            .collect::<Result<Vec<_>, _>>()?;
        for col in cols.into_iter().flatten() {
            if !schema.index_keys.contains(&col) {
                schema.index_keys.push(col);
            }
        }
    }

    Ok(schema)
}

// ── tests ────────────────────────────────────────────────────────────
