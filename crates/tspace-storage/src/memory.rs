//! In-memory table storage for tests and embedding.
//!
//! [`InMemoryStorage`] keeps tables (column list plus rows) in a `BTreeMap`
//! behind a `RwLock`, and records every [`StorageOps`] call in a journal so
//! callers can assert on the exact sequence of physical operations.

use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};

use serde_json::Value;

use crate::error::{Result, StorageError};
use crate::traits::StorageOps;

/// A row of cell values.
pub type Row = Vec<Value>;

#[derive(Clone, Debug, Default, PartialEq)]
struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

/// One call made through [`StorageOps`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageOp {
    Create { base: String, target: String },
    Drop { target: String },
    Recreate { base: String, target: String },
    Truncate { target: String },
    Copy { from: String, to: String },
}

/// An in-memory implementation of [`StorageOps`].
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    tables: RwLock<BTreeMap<String, Table>>,
    journal: Mutex<Vec<StorageOp>>,
}

impl InMemoryStorage {
    /// Create an empty storage with no tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Define (or replace) a table with the given columns and no rows.
    ///
    /// This is how base tables come into existence; it is not journaled.
    pub fn define_table(&self, name: &str, columns: &[&str]) -> Result<()> {
        let mut tables = self.write_tables()?;
        tables.insert(
            name.to_string(),
            Table {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    /// Append rows to an existing table.
    pub fn insert_rows(&self, name: &str, rows: impl IntoIterator<Item = Row>) -> Result<()> {
        let mut tables = self.write_tables()?;
        let table = tables
            .get_mut(name)
            .ok_or_else(|| StorageError::TableNotFound {
                table: name.to_string(),
            })?;
        for row in rows {
            if row.len() != table.columns.len() {
                return Err(StorageError::Backend(format!(
                    "row has {} cells, table {name} has {} columns",
                    row.len(),
                    table.columns.len()
                )));
            }
            table.rows.push(row);
        }
        Ok(())
    }

    /// All rows of a table, in insertion order.
    pub fn rows(&self, name: &str) -> Result<Vec<Row>> {
        let tables = self.read_tables()?;
        tables
            .get(name)
            .map(|t| t.rows.clone())
            .ok_or_else(|| StorageError::TableNotFound {
                table: name.to_string(),
            })
    }

    /// Column names of a table.
    pub fn columns(&self, name: &str) -> Result<Vec<String>> {
        let tables = self.read_tables()?;
        tables
            .get(name)
            .map(|t| t.columns.clone())
            .ok_or_else(|| StorageError::TableNotFound {
                table: name.to_string(),
            })
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.read_tables()?.contains_key(name))
    }

    /// Names of all tables, sorted.
    pub fn table_names(&self) -> Result<Vec<String>> {
        Ok(self.read_tables()?.keys().cloned().collect())
    }

    /// Every journaled operation since creation or the last [`Self::clear_journal`].
    pub fn journal(&self) -> Vec<StorageOp> {
        self.journal
            .lock()
            .map(|j| j.clone())
            .unwrap_or_default()
    }

    pub fn clear_journal(&self) {
        if let Ok(mut journal) = self.journal.lock() {
            journal.clear();
        }
    }

    fn record(&self, op: StorageOp) -> Result<()> {
        self.journal
            .lock()
            .map_err(|e| StorageError::Backend(format!("lock poisoned: {e}")))?
            .push(op);
        Ok(())
    }

    fn read_tables(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, Table>>> {
        self.tables
            .read()
            .map_err(|e| StorageError::Backend(format!("lock poisoned: {e}")))
    }

    fn write_tables(&self) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, Table>>> {
        self.tables
            .write()
            .map_err(|e| StorageError::Backend(format!("lock poisoned: {e}")))
    }

    fn create_unjournaled(&self, base_name: &str, target_name: &str) -> Result<()> {
        if base_name == target_name {
            return Ok(());
        }
        let mut tables = self.write_tables()?;
        if tables.contains_key(target_name) {
            return Ok(());
        }
        let columns = tables
            .get(base_name)
            .map(|t| t.columns.clone())
            .ok_or_else(|| StorageError::TableNotFound {
                table: base_name.to_string(),
            })?;
        tables.insert(
            target_name.to_string(),
            Table {
                columns,
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    fn drop_unjournaled(&self, target_name: &str) -> Result<()> {
        self.write_tables()?.remove(target_name);
        Ok(())
    }
}

impl StorageOps for InMemoryStorage {
    fn create_table(&self, base_name: &str, target_name: &str) -> Result<()> {
        self.record(StorageOp::Create {
            base: base_name.to_string(),
            target: target_name.to_string(),
        })?;
        self.create_unjournaled(base_name, target_name)
    }

    fn drop_table(&self, target_name: &str) -> Result<()> {
        self.record(StorageOp::Drop {
            target: target_name.to_string(),
        })?;
        self.drop_unjournaled(target_name)
    }

    fn recreate_table(&self, base_name: &str, target_name: &str) -> Result<()> {
        self.record(StorageOp::Recreate {
            base: base_name.to_string(),
            target: target_name.to_string(),
        })?;
        if base_name == target_name {
            return Ok(());
        }
        self.drop_unjournaled(target_name)?;
        self.create_unjournaled(base_name, target_name)
    }

    fn truncate_table(&self, target_name: &str) -> Result<()> {
        self.record(StorageOp::Truncate {
            target: target_name.to_string(),
        })?;
        let mut tables = self.write_tables()?;
        let table = tables
            .get_mut(target_name)
            .ok_or_else(|| StorageError::TableNotFound {
                table: target_name.to_string(),
            })?;
        table.rows.clear();
        Ok(())
    }

    fn copy_table(&self, from_name: &str, to_name: &str) -> Result<()> {
        self.record(StorageOp::Copy {
            from: from_name.to_string(),
            to: to_name.to_string(),
        })?;
        if from_name == to_name {
            return Ok(());
        }

        let mut tables = self.write_tables()?;
        let source = tables
            .get(from_name)
            .cloned()
            .ok_or_else(|| StorageError::TableNotFound {
                table: from_name.to_string(),
            })?;
        let target = tables
            .get_mut(to_name)
            .ok_or_else(|| StorageError::TableNotFound {
                table: to_name.to_string(),
            })?;
        if source.columns != target.columns {
            return Err(StorageError::SchemaMismatch {
                from: from_name.to_string(),
                to: to_name.to_string(),
            });
        }
        target.rows.extend(source.rows);
        Ok(())
    }
}
