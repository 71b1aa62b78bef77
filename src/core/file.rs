//! Purpose: File-backed connection provider over a directory of table files.
//! Exports: `FileStore`, `FileConnection`.
//! Role: The real backing store; cursors read a table file one line at a time.
//! Invariants: An open cursor holds a shared lock on its table until it is replaced or closed.
//! Invariants: Failures inside `execute`/`fetch_*` surface as `ErrorKind::Query`.
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::core::connection::{Connection, ConnectionProvider};
use crate::core::error::{Error, ErrorKind};
use crate::core::query::{Query, RowPlan};
use crate::core::table::{self, InsertOutcome, TableHeader, TableReader};
use crate::core::value::{Batch, Record, Value};
use crate::table_paths::{TableNameResolveError, resolve_table_path};

#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn table_path(&self, name: &str) -> Result<PathBuf, Error> {
        resolve_table_path(name, &self.dir).map_err(|err| {
            let message = match err {
                TableNameResolveError::Empty => "table name is empty",
                TableNameResolveError::NotIdentifier => "table name must be an identifier",
            };
            Error::new(ErrorKind::Usage)
                .with_message(message)
                .with_table(name)
                .with_hint("Use letters, digits, and underscores, starting with a letter.")
        })
    }

    pub fn create_table(
        &self,
        name: &str,
        columns: Vec<String>,
        primary_key: Option<String>,
    ) -> Result<TableHeader, Error> {
        let path = self.table_path(name)?;
        let header = TableHeader::new(columns, primary_key)?;
        table::create_table(&path, &header).map_err(|err| err.with_table(name))?;
        debug!(table = name, path = %path.display(), "table created");
        Ok(header)
    }

    pub fn table_header(&self, name: &str) -> Result<TableHeader, Error> {
        let path = self.table_path(name)?;
        let reader = TableReader::open(&path).map_err(|err| err.with_table(name))?;
        Ok(reader.header().clone())
    }

    pub fn insert_ignore<I>(&self, name: &str, rows: I) -> Result<InsertOutcome, Error>
    where
        I: IntoIterator<Item = Vec<Value>>,
    {
        let path = self.table_path(name)?;
        let outcome = table::insert_ignore(&path, rows).map_err(|err| err.with_table(name))?;
        debug!(
            table = name,
            inserted = outcome.inserted,
            ignored = outcome.ignored,
            rejected = outcome.rejected,
            "rows inserted"
        );
        Ok(outcome)
    }

    fn reader_for(&self, query: &Query) -> Result<(TableReader, RowPlan), Error> {
        let select = query.compile()?;
        let path = self.table_path(&select.table)?;
        let reader = TableReader::open(&path).map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                Error::new(ErrorKind::Query)
                    .with_message("no such table")
                    .with_path(&path)
                    .with_hint("Create it with `rowstream table create`.")
            } else {
                err
            }
        })?;
        let plan = select.plan(&reader.header().columns)?;
        Ok((reader, plan))
    }
}

impl ConnectionProvider for FileStore {
    type Connection = FileConnection;

    fn open(&self) -> Result<FileConnection, Error> {
        let meta = std::fs::metadata(&self.dir).map_err(|err| {
            Error::new(ErrorKind::Connection)
                .with_message("table directory is unavailable")
                .with_path(&self.dir)
                .with_hint("Create a table first or pass --dir.")
                .with_source(err)
        })?;
        if !meta.is_dir() {
            return Err(Error::new(ErrorKind::Connection)
                .with_message("table directory is not a directory")
                .with_path(&self.dir));
        }
        debug!(dir = %self.dir.display(), "file store connection opened");
        Ok(FileConnection {
            store: self.clone(),
            closed: false,
            cursor: None,
        })
    }
}

#[derive(Debug)]
struct FileCursor {
    reader: TableReader,
    plan: RowPlan,
}

#[derive(Debug)]
pub struct FileConnection {
    store: FileStore,
    closed: bool,
    cursor: Option<FileCursor>,
}

impl FileConnection {
    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed {
            return Err(Error::new(ErrorKind::Connection).with_message("connection is closed"));
        }
        Ok(())
    }

    fn next_from_cursor(&mut self) -> Result<Option<Record>, Error> {
        let cursor = self.cursor.as_mut().ok_or_else(|| {
            Error::new(ErrorKind::Query).with_message("fetch without an executed query")
        })?;
        while let Some(row) = cursor.reader.next_row()? {
            if let Some(record) = cursor.plan.apply(&row)? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

impl Connection for FileConnection {
    fn execute(&mut self, query: &Query) -> Result<(), Error> {
        self.ensure_open()?;
        // Drop the previous cursor first so its lock is released.
        self.cursor = None;
        let (reader, plan) = self.store.reader_for(query).map_err(into_query_error)?;
        trace!(path = %reader.path().display(), "cursor opened");
        self.cursor = Some(FileCursor { reader, plan });
        Ok(())
    }

    fn fetch_one(&mut self) -> Result<Option<Record>, Error> {
        self.ensure_open()?;
        self.next_from_cursor().map_err(into_query_error)
    }

    fn fetch_page(&mut self, query: &Query, limit: usize, offset: u64) -> Result<Batch, Error> {
        self.ensure_open()?;
        let (mut reader, plan) = self.store.reader_for(query).map_err(into_query_error)?;
        let mut skipped = 0u64;
        let mut batch = Vec::with_capacity(limit.min(1024));
        while batch.len() < limit {
            let Some(row) = reader.next_row().map_err(into_query_error)? else {
                break;
            };
            let Some(record) = plan.apply(&row).map_err(into_query_error)? else {
                continue;
            };
            if skipped < offset {
                skipped += 1;
                continue;
            }
            batch.push(record);
        }
        trace!(offset, limit, rows = batch.len(), "page read");
        Ok(batch)
    }

    fn close(&mut self) -> Result<(), Error> {
        if !self.closed {
            self.closed = true;
            self.cursor = None;
            debug!(dir = %self.store.dir.display(), "file store connection closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

fn into_query_error(err: Error) -> Error {
    if err.kind() == ErrorKind::Query {
        return err;
    }
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{:?} failure", err.kind()));
    let mut query_err = Error::new(ErrorKind::Query).with_message(message);
    if let Some(path) = err.path() {
        query_err = query_err.with_path(path.to_path_buf());
    }
    if let Some(hint) = err.hint() {
        query_err = query_err.with_hint(hint.to_string());
    }
    query_err.with_source(err)
}
