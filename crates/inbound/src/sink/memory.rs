//! In-process warehouse for tests and dry runs

use inbound_common::{InboundError, Result};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::WarehouseHandler;

/// A primitive executed against a [`MemoryWarehouse`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CreateTable(String),
    BulkLoad { table: String, rows: usize },
    CopyRows { from: String, to: String },
    RenameTable { from: String, to: String },
    DropTable(String),
}

#[derive(Debug, Clone, Default)]
struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, Table>,
    operations: Vec<Operation>,
}

/// Tables held in memory, with cells kept as the text that was loaded.
///
/// Clones share the same tables, so a test can hand one clone to a sink and
/// inspect the result through another.
#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
    state: Arc<Mutex<State>>,
}

struct CreateStatement {
    table: String,
    columns: Vec<String>,
    replace: bool,
    if_not_exists: bool,
}

fn parse_error(message: impl Into<String>) -> InboundError {
    InboundError::Warehouse(message.into())
}

/// Split a column list at top-level commas, leaving `number(38, 0)` intact.
fn split_columns(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut start = 0;

    for (i, c) in body.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => depth = depth.saturating_sub(1),
            ',' if !quoted && depth == 0 => {
                parts.push(&body[start..i]);
                start = i + 1;
            },
            _ => {},
        }
    }
    parts.push(&body[start..]);
    parts.into_iter().map(str::trim).filter(|p| !p.is_empty()).collect()
}

fn column_name(definition: &str) -> Result<String> {
    if let Some(rest) = definition.strip_prefix('"') {
        let end = rest
            .find('"')
            .ok_or_else(|| parse_error(format!("unterminated identifier in '{}'", definition)))?;
        return Ok(rest[..end].to_string());
    }
    definition
        .split_whitespace()
        .next()
        .map(str::to_string)
        .ok_or_else(|| parse_error("empty column definition"))
}

fn parse_create(ddl: &str) -> Result<CreateStatement> {
    let pattern = Regex::new(
        r"(?is)^\s*create\s+(or\s+replace\s+)?(?:transient\s+)?table\s+(if\s+not\s+exists\s+)?(\S+)\s*\((.*)\)\s*;?\s*$",
    )
    .map_err(|e| parse_error(e.to_string()))?;

    let captures = pattern
        .captures(ddl)
        .ok_or_else(|| parse_error(format!("unsupported DDL: {}", ddl)))?;
    let table = captures
        .get(3)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| parse_error("missing table name"))?;
    let body = captures.get(4).map_or("", |m| m.as_str());

    Ok(CreateStatement {
        table,
        columns: split_columns(body)
            .into_iter()
            .map(column_name)
            .collect::<Result<_>>()?,
        replace: captures.get(1).is_some(),
        if_not_exists: captures.get(2).is_some(),
    })
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| parse_error("memory warehouse lock poisoned"))
    }

    pub fn contains_table(&self, table: &str) -> Result<bool> {
        Ok(self.lock()?.tables.contains_key(table))
    }

    /// Column names of `table`, as declared in its DDL
    pub fn columns(&self, table: &str) -> Result<Vec<String>> {
        let state = self.lock()?;
        state
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .ok_or_else(|| parse_error(format!("table {} does not exist", table)))
    }

    /// Rows of `table` in load order; null cells are empty strings
    pub fn rows(&self, table: &str) -> Result<Vec<Vec<String>>> {
        let state = self.lock()?;
        state
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .ok_or_else(|| parse_error(format!("table {} does not exist", table)))
    }

    /// Every primitive executed so far, oldest first
    pub fn operations(&self) -> Result<Vec<Operation>> {
        Ok(self.lock()?.operations.clone())
    }
}

impl WarehouseHandler for MemoryWarehouse {
    fn create_table(&mut self, ddl: &str) -> Result<()> {
        let statement = parse_create(ddl)?;
        let mut state = self.lock()?;
        state.operations.push(Operation::CreateTable(statement.table.clone()));

        let exists = state.tables.contains_key(&statement.table);
        if exists && statement.if_not_exists {
            return Ok(());
        }
        if exists && !statement.replace {
            return Err(parse_error(format!("table {} already exists", statement.table)));
        }

        debug!(table = %statement.table, columns = statement.columns.len(), "Created table");
        state.tables.insert(
            statement.table,
            Table {
                columns: statement.columns,
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    fn table_exists(&mut self, table: &str) -> Result<bool> {
        self.contains_table(table)
    }

    fn bulk_load(&mut self, table: &str, file: &Path) -> Result<()> {
        let mut reader = csv::Reader::from_path(file)?;
        let headers = reader.headers()?.clone();

        let mut state = self.lock()?;
        let target = state
            .tables
            .get_mut(table)
            .ok_or_else(|| parse_error(format!("table {} does not exist", table)))?;

        let positions = headers
            .iter()
            .map(|header| {
                target
                    .columns
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case(header))
                    .ok_or_else(|| parse_error(format!("column {} not in table {}", header, table)))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut loaded = 0;
        for record in reader.records() {
            let record = record?;
            let mut row = vec![String::new(); target.columns.len()];
            for (field, &position) in record.iter().zip(&positions) {
                row[position] = field.to_string();
            }
            target.rows.push(row);
            loaded += 1;
        }

        state.operations.push(Operation::BulkLoad {
            table: table.to_string(),
            rows: loaded,
        });
        Ok(())
    }

    fn copy_rows(&mut self, from: &str, to: &str) -> Result<()> {
        let mut state = self.lock()?;
        let source = state
            .tables
            .get(from)
            .ok_or_else(|| parse_error(format!("table {} does not exist", from)))?;
        let width = source.columns.len();
        let rows = source.rows.clone();

        let target = state
            .tables
            .get_mut(to)
            .ok_or_else(|| parse_error(format!("table {} does not exist", to)))?;
        if target.columns.len() != width {
            return Err(parse_error(format!(
                "cannot copy {} columns into {} columns",
                width,
                target.columns.len()
            )));
        }
        target.rows.extend(rows);

        state.operations.push(Operation::CopyRows {
            from: from.to_string(),
            to: to.to_string(),
        });
        Ok(())
    }

    fn rename_table(&mut self, from: &str, to: &str) -> Result<()> {
        let mut state = self.lock()?;
        if state.tables.contains_key(to) {
            return Err(parse_error(format!("table {} already exists", to)));
        }
        let table = state
            .tables
            .remove(from)
            .ok_or_else(|| parse_error(format!("table {} does not exist", from)))?;
        state.tables.insert(to.to_string(), table);

        state.operations.push(Operation::RenameTable {
            from: from.to_string(),
            to: to.to_string(),
        });
        Ok(())
    }

    fn drop_table(&mut self, table: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.tables.remove(table);
        state.operations.push(Operation::DropTable(table.to_string()));
        Ok(())
    }
}
