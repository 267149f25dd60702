//! SQL-backed table operations.
//!
//! [`SqlStorage`] turns [`StorageOps`] calls into SQL text and hands it to a
//! caller-supplied [`SqlExecutor`] (a connection wrapper). Cloning a table's
//! schema is dialect specific and delegated to a [`SchemaCopier`], chosen by
//! configuration when the storage is built. Schema statements are parsed with
//! `sqlparser` and re-rendered after renaming.

use serde::{Deserialize, Serialize};
use sqlparser::ast::{Ident, ObjectName, ObjectNamePart, Statement};
use sqlparser::dialect::{Dialect, GenericDialect, MySqlDialect};
use sqlparser::parser::Parser;
use tracing::debug;

use crate::error::{Result, StorageError};
use crate::traits::StorageOps;

/// Minimal connection interface needed to manage tables.
pub trait SqlExecutor: Send + Sync {
    /// Execute a statement that returns no rows.
    fn execute(&self, sql: &str) -> Result<()>;

    /// Whether a table with this name exists.
    fn table_exists(&self, table: &str) -> Result<bool>;

    /// Statements that reproduce `table`'s schema.
    ///
    /// For MySQL this is the single `SHOW CREATE TABLE` result. Other
    /// dialects return the `CREATE TABLE` statement followed by one
    /// `CREATE [UNIQUE] INDEX` statement per index.
    fn schema_statements(&self, table: &str) -> Result<Vec<String>>;
}

/// How a table schema is cloned under a new name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaCopier {
    /// Rewrite the `SHOW CREATE TABLE` statement (indexes are inline).
    MySql,
    /// Rewrite a portable `CREATE TABLE` plus separate index statements.
    #[default]
    Generic,
}

impl SchemaCopier {
    fn dialect(&self) -> Box<dyn Dialect> {
        match self {
            Self::MySql => Box::new(MySqlDialect {}),
            Self::Generic => Box::new(GenericDialect {}),
        }
    }

    /// Rewrite `statements` describing `base` so they create `target` instead.
    ///
    /// Each statement is parsed in the copier's dialect, the table (and for
    /// [`SchemaCopier::Generic`], index) names are replaced in the AST, and
    /// the result is rendered back to SQL. Schema qualifiers and identifier
    /// quoting are kept.
    pub fn rewrite(&self, statements: &[String], base: &str, target: &str) -> Result<Vec<String>> {
        if statements.is_empty() {
            return Err(StorageError::Schema(format!(
                "no schema statements for table {base}"
            )));
        }
        let dialect = self.dialect();
        let mut rewritten = Vec::with_capacity(statements.len());
        for sql in statements {
            let parsed = Parser::parse_sql(dialect.as_ref(), sql).map_err(|err| {
                StorageError::Schema(format!("cannot parse schema of {base}: {err}"))
            })?;
            for statement in parsed {
                rewritten.push(self.rewrite_statement(statement, base, target)?.to_string());
            }
        }
        Ok(rewritten)
    }

    fn rewrite_statement(&self, statement: Statement, base: &str, target: &str) -> Result<Statement> {
        match statement {
            Statement::CreateTable(mut create) => {
                rename_table(&mut create.name, base, target)?;
                Ok(Statement::CreateTable(create))
            }
            // MySQL reports indexes inline in SHOW CREATE TABLE.
            Statement::CreateIndex(mut index) if *self == Self::Generic => {
                rename_table(&mut index.table_name, base, target)?;
                if let Some(name) = index.name.as_mut() {
                    rename_index(name, base, target);
                }
                Ok(Statement::CreateIndex(index))
            }
            other => Err(StorageError::Schema(format!(
                "unsupported schema statement: {other}"
            ))),
        }
    }
}

fn last_ident(name: &mut ObjectName) -> Option<&mut Ident> {
    match name.0.last_mut()? {
        ObjectNamePart::Identifier(ident) => Some(ident),
        _ => None,
    }
}

fn rename_table(name: &mut ObjectName, base: &str, target: &str) -> Result<()> {
    let found = name.to_string();
    match last_ident(name) {
        Some(ident) if ident.value == base => {
            ident.value = target.to_string();
            Ok(())
        }
        _ => Err(StorageError::Schema(format!(
            "expected a statement on table {base}, found {found}"
        ))),
    }
}

/// Index names are unique per database, so they must follow the table.
fn rename_index(name: &mut ObjectName, base: &str, target: &str) {
    if let Some(ident) = last_ident(name) {
        ident.value = if ident.value.contains(base) {
            ident.value.replace(base, target)
        } else {
            format!("{target}__{}", ident.value)
        };
    }
}

/// [`StorageOps`] implemented by issuing SQL through an executor.
#[derive(Debug)]
pub struct SqlStorage<X> {
    executor: X,
    copier: SchemaCopier,
}

impl<X: SqlExecutor> SqlStorage<X> {
    pub fn new(executor: X, copier: SchemaCopier) -> Self {
        Self { executor, copier }
    }

    pub fn executor(&self) -> &X {
        &self.executor
    }

    pub fn copier(&self) -> SchemaCopier {
        self.copier
    }

    fn execute(&self, sql: &str) -> Result<()> {
        debug!(sql, "executing");
        self.executor.execute(sql)
    }
}

impl<X: SqlExecutor> StorageOps for SqlStorage<X> {
    fn create_table(&self, base_name: &str, target_name: &str) -> Result<()> {
        if base_name == target_name || self.executor.table_exists(target_name)? {
            return Ok(());
        }
        let statements = self.executor.schema_statements(base_name)?;
        for statement in self.copier.rewrite(&statements, base_name, target_name)? {
            self.execute(&statement)?;
        }
        Ok(())
    }

    fn drop_table(&self, target_name: &str) -> Result<()> {
        if self.executor.table_exists(target_name)? {
            self.execute(&format!("DROP TABLE {target_name}"))?;
        }
        Ok(())
    }

    fn truncate_table(&self, target_name: &str) -> Result<()> {
        self.execute(&format!("TRUNCATE TABLE {target_name}"))
    }

    fn copy_table(&self, from_name: &str, to_name: &str) -> Result<()> {
        if from_name == to_name {
            return Ok(());
        }
        self.execute(&format!("INSERT INTO {to_name} SELECT * FROM {from_name}"))
    }
}
