//! Bulk-load sink: staged CSV files, a working table and a rename swap

use chrono::Utc;
use inbound_common::{InboundError, Result};
use minijinja::context;
use regex::Regex;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, error, info, instrument, warn};

use super::{CountingWriter, WarehouseHandler};
use crate::config::{SinkConfig, DEFAULT_STAGING_DIR, DEFAULT_TMP_FILE_MAX_SIZE, DEFAULT_TRANSIENT_POSTFIX};
use crate::models::{BatchResult, Description, Value};
use crate::query::{template_env, template_error};
use crate::sdk::{RowStream, Sink};

const DDL_TEMPLATE: &str = concat!(
    "create {% if transient %}or replace transient table{% else %}table if not exists{% endif %} ",
    "{{ table }} (",
    "{% for column in columns %}",
    "{% if quoted %}\"{{ column.name }}\"{% else %}{{ column.name }}{% endif %} {{ column.type }}",
    "{% if column.type == 'number' and column.precision is not none %}",
    "({{ column.precision }}{% if column.scale is not none %}, {{ column.scale }}{% endif %})",
    "{% endif %}",
    "{% if not loop.last %}, {% endif %}",
    "{% endfor %})"
);

/// Render the `create table` statement for `columns`.
///
/// Transient tables are created with `create or replace transient table`,
/// others with `create table if not exists`. Only `number` columns carry
/// precision and scale.
pub fn create_ddl(table: &str, columns: &[Description], transient: bool, quoted: bool) -> Result<String> {
    let env = template_env();
    let template = env.template_from_str(DDL_TEMPLATE).map_err(template_error)?;
    template
        .render(context! { table, columns, transient, quoted })
        .map_err(template_error)
}

/// Point a `create table` statement at `table`, leaving the column list
/// untouched.
fn retarget_ddl(ddl: &str, table: &str) -> Result<String> {
    let header = Regex::new(
        r"(?is)^\s*create\s+(?:or\s+replace\s+)?(?:transient\s+)?table\s+(?:if\s+not\s+exists\s+)?",
    )
    .map_err(|e| InboundError::InvalidArgument(e.to_string()))?;

    let start = header
        .find(ddl)
        .map(|m| m.end())
        .ok_or_else(|| InboundError::InvalidArgument(format!("not a create table statement: {}", ddl)))?;
    let rest = &ddl[start..];
    let end = rest
        .find(|c: char| c.is_whitespace() || c == '(')
        .unwrap_or(rest.len());
    if end == 0 {
        return Err(InboundError::InvalidArgument(format!("missing table name: {}", ddl)));
    }

    Ok(format!("{}{}{}", &ddl[..start], table, &rest[end..]))
}

/// Where staging files are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingArea {
    dir: PathBuf,
    file_name: String,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            file_name: file_name.into(),
        }
    }

    /// A staging file named after `table`, so sinks for different tables
    /// sharing `dir` never touch each other's files.
    pub fn for_table(dir: impl Into<PathBuf>, table: &str) -> Self {
        let stem: String = table
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
            .collect();
        Self::new(dir, format!("{}.csv", stem))
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    fn create_file(&self) -> Result<(StagingFile, File)> {
        let path = self.path();
        let file = File::create(&path)?;
        Ok((StagingFile { path, removed: false }, file))
    }
}

/// Guard that removes a staging file from disk when dropped.
struct StagingFile {
    path: PathBuf,
    removed: bool,
}

impl StagingFile {
    fn remove(mut self) -> Result<()> {
        self.removed = true;
        fs::remove_file(&self.path)?;
        Ok(())
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove staging file");
            }
        }
    }
}

/// Progress of a [`BulkLoadSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Staging,
    Rotating,
    Uploading,
    Publishing,
    Done,
    Failed,
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoadState::Idle => "IDLE",
            LoadState::Staging => "STAGING",
            LoadState::Rotating => "ROTATING",
            LoadState::Uploading => "UPLOADING",
            LoadState::Publishing => "PUBLISHING",
            LoadState::Done => "DONE",
            LoadState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Loads rows into `table` through a working table `<table>__tmp`.
///
/// Rows are staged into CSV files no larger than the configured maximum
/// (plus the last batch that crossed it), each file is bulk-loaded into the
/// working table, and the working table is then renamed to
/// `<table><postfix>`. Non-transient sinks additionally append the working
/// table to `table` itself before the swap.
///
/// The swap is three statements (rename, rename, drop), not a transaction.
/// A crash between them can leave `<table><postfix>__old` behind; the next
/// run drops it.
pub struct BulkLoadSink<H> {
    table: String,
    transient: bool,
    handler: H,
    max_file_size: u64,
    ddl: Option<String>,
    staging: StagingArea,
    transient_postfix: String,
    quoted_identifiers: bool,
    state: LoadState,
}

impl<H: WarehouseHandler> BulkLoadSink<H> {
    pub fn new(table: impl Into<String>, transient: bool, handler: H) -> Self {
        let table = table.into();
        Self {
            staging: StagingArea::for_table(DEFAULT_STAGING_DIR, &table),
            table,
            transient,
            handler,
            max_file_size: DEFAULT_TMP_FILE_MAX_SIZE,
            ddl: None,
            transient_postfix: DEFAULT_TRANSIENT_POSTFIX.to_string(),
            quoted_identifiers: false,
            state: LoadState::Idle,
        }
    }

    /// Build a sink from loaded configuration
    pub fn from_config(
        table: impl Into<String>,
        transient: bool,
        handler: H,
        config: &SinkConfig,
    ) -> Self {
        let table = table.into();
        let staging = match &config.staging_file {
            Some(file_name) => StagingArea::new(&config.staging_dir, file_name),
            None => StagingArea::for_table(&config.staging_dir, &table),
        };
        Self::new(table, transient, handler)
            .with_max_file_size(config.tmp_file_max_size)
            .with_staging(staging)
            .with_transient_postfix(&config.transient_postfix)
            .with_quoted_identifiers(config.quoted_identifiers)
    }

    /// Rotate the staging file once it grows past `bytes`
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Use this DDL instead of generating one from the column descriptions.
    ///
    /// The working table's DDL is the same statement with the table name
    /// after `create ... table [if not exists]` swapped for `<table>__tmp`.
    pub fn with_ddl(mut self, ddl: impl Into<String>) -> Self {
        self.ddl = Some(ddl.into());
        self
    }

    pub fn with_staging(mut self, staging: StagingArea) -> Self {
        self.staging = staging;
        self
    }

    pub fn with_transient_postfix(mut self, postfix: impl Into<String>) -> Self {
        self.transient_postfix = postfix.into();
        self
    }

    pub fn with_quoted_identifiers(mut self, quoted: bool) -> Self {
        self.quoted_identifiers = quoted;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// The table the working table is swapped into
    pub fn transient_table(&self) -> String {
        format!("{}{}", self.table, self.transient_postfix)
    }

    pub fn temp_table(&self) -> String {
        format!("{}__tmp", self.table)
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    fn transition(&mut self, state: LoadState) {
        debug!(table = %self.table, from = %self.state, to = %state, "Load state changed");
        self.state = state;
    }

    fn resolve_ddl(&self, columns: &[Description]) -> Result<(String, String)> {
        let temp_table = self.temp_table();
        match &self.ddl {
            Some(ddl) => Ok((ddl.clone(), retarget_ddl(ddl, &temp_table)?)),
            None => Ok((
                create_ddl(&self.table, columns, self.transient, self.quoted_identifiers)?,
                create_ddl(&temp_table, columns, true, self.quoted_identifiers)?,
            )),
        }
    }

    /// Stage one file from `rows`, returning its result and whether the
    /// stream is exhausted.
    fn stage_batch(
        &mut self,
        number: usize,
        rows: &mut RowStream<'_>,
        header: &[&str],
        temp_table: &str,
    ) -> Result<(BatchResult, bool)> {
        self.transition(LoadState::Staging);
        let start = Utc::now();

        let (staging_file, file) = self.staging.create_file()?;
        let mut writer = csv::Writer::from_writer(CountingWriter::new(file));
        writer.write_record(header)?;
        writer.flush()?;

        let mut row_count = 0;
        let mut size_bytes = writer.get_ref().count();
        let mut exhausted = false;

        loop {
            let Some(batch) = rows.next() else {
                exhausted = true;
                break;
            };
            let batch = batch?;
            for row in &batch {
                writer.write_record(row.iter().map(Value::to_field))?;
            }
            writer.flush()?;
            row_count += batch.len();
            size_bytes = writer.get_ref().count();
            debug!(batch = number, rows = row_count, size_bytes, "Wrote rows to staging file");

            if size_bytes > self.max_file_size {
                self.transition(LoadState::Rotating);
                break;
            }
        }

        let mut file = writer.into_inner().map_err(|e| e.into_error())?.into_inner();
        file.flush()?;
        drop(file);
        let stop = Utc::now();

        self.transition(LoadState::Uploading);
        info!(
            table = %temp_table,
            batch = number,
            rows = row_count,
            size_bytes,
            "Uploading batch"
        );
        self.handler.bulk_load(temp_table, &staging_file.path)?;
        staging_file.remove()?;

        Ok((
            BatchResult {
                number,
                start,
                stop,
                rows: row_count,
                size_bytes,
            },
            exhausted,
        ))
    }

    fn swap(&mut self, temp_table: &str) -> Result<()> {
        let target = self.transient_table();
        let backup = format!("{}__old", target);

        self.handler.drop_table(&backup)?;
        if self.handler.table_exists(&target)? {
            self.handler.rename_table(&target, &backup)?;
        }
        self.handler.rename_table(temp_table, &target)?;
        self.handler.drop_table(&backup)
    }

    fn load(&mut self, mut rows: RowStream<'_>, columns: &[Description]) -> Result<Vec<BatchResult>> {
        let temp_table = self.temp_table();
        let (ddl, temp_ddl) = self.resolve_ddl(columns)?;

        self.staging.ensure_dir()?;

        if !self.transient {
            self.handler.create_table(&ddl)?;
        }
        self.handler.drop_table(&temp_table)?;
        self.handler.create_table(&temp_ddl)?;

        let header: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        let mut batches = Vec::new();
        loop {
            let (batch, exhausted) = self.stage_batch(batches.len(), &mut rows, &header, &temp_table)?;
            batches.push(batch);
            if exhausted {
                break;
            }
        }

        self.transition(LoadState::Publishing);
        if !self.transient {
            self.handler.copy_rows(&temp_table, &self.table)?;
        }
        self.swap(&temp_table)?;
        self.handler.drop_table(&temp_table)?;

        self.transition(LoadState::Done);
        Ok(batches)
    }
}

impl<H: WarehouseHandler> Sink for BulkLoadSink<H> {
    #[instrument(skip_all, fields(table = %self.table, transient = self.transient))]
    fn ingest(&mut self, rows: RowStream<'_>, columns: &[Description]) -> Result<Vec<BatchResult>> {
        match self.load(rows, columns) {
            Ok(batches) => {
                info!(
                    batches = batches.len(),
                    rows = batches.iter().map(|b| b.rows).sum::<usize>(),
                    "Bulk load complete"
                );
                Ok(batches)
            },
            Err(e) => {
                let failed_in = self.state;
                self.transition(LoadState::Failed);
                error!(state = %failed_in, error = %e, "Bulk load failed");
                Err(e)
            },
        }
    }
}
