//! Purpose: In-memory connection provider with call counters and fault injection.
//! Exports: `MemoryStore`, `MemoryConnection`, `StoreStats`.
//! Role: Fake store for exercising stream lifetimes and fetch counts without disk I/O.
//! Invariants: Every trait call is counted before any fault is applied.
//! Invariants: Closing an already-closed connection counts the call but changes nothing.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::trace;

use crate::core::connection::{Connection, ConnectionProvider};
use crate::core::error::{Error, ErrorKind};
use crate::core::query::{Query, RowPlan};
use crate::core::value::{Batch, Record, Value};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StoreStats {
    pub opens: u64,
    /// Every `close()` invocation, including repeats.
    pub close_calls: u64,
    /// Closes that actually released an open connection.
    pub closes: u64,
    pub executes: u64,
    pub row_fetches: u64,
    pub page_fetches: u64,
}

#[derive(Debug, Default)]
struct Counters {
    opens: AtomicU64,
    close_calls: AtomicU64,
    closes: AtomicU64,
    executes: AtomicU64,
    row_fetches: AtomicU64,
    page_fetches: AtomicU64,
}

#[derive(Debug, Default)]
struct Faults {
    fail_open: AtomicBool,
    fail_close: AtomicBool,
    fetch_calls: AtomicU64,
    // Absolute fetch call number that fails; zero means disarmed.
    fail_at: AtomicU64,
}

#[derive(Debug)]
struct MemTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: RwLock<BTreeMap<String, MemTable>>,
    counters: Counters,
    faults: Faults,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(
        &self,
        name: &str,
        columns: &[&str],
        rows: Vec<Vec<Value>>,
    ) -> Result<(), Error> {
        if let Some(row) = rows.iter().find(|row| row.len() != columns.len()) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!(
                    "row has {} values, table has {} columns",
                    row.len(),
                    columns.len()
                ))
                .with_table(name));
        }
        let mut tables = self.write_tables()?;
        if tables.contains_key(name) {
            return Err(Error::new(ErrorKind::AlreadyExists)
                .with_message("table already exists")
                .with_table(name));
        }
        tables.insert(
            name.to_string(),
            MemTable {
                columns: columns.iter().map(|column| column.to_string()).collect(),
                rows,
            },
        );
        Ok(())
    }

    pub fn insert(&self, name: &str, row: Vec<Value>) -> Result<(), Error> {
        let mut tables = self.write_tables()?;
        let table = tables.get_mut(name).ok_or_else(|| missing_table(name))?;
        if row.len() != table.columns.len() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("row arity does not match table")
                .with_table(name));
        }
        table.rows.push(row);
        Ok(())
    }

    /// Keeps only the first `keep` rows, simulating a concurrent delete.
    pub fn truncate(&self, name: &str, keep: usize) -> Result<(), Error> {
        let mut tables = self.write_tables()?;
        let table = tables.get_mut(name).ok_or_else(|| missing_table(name))?;
        table.rows.truncate(keep);
        Ok(())
    }

    pub fn stats(&self) -> StoreStats {
        let counters = &self.inner.counters;
        StoreStats {
            opens: counters.opens.load(Ordering::SeqCst),
            close_calls: counters.close_calls.load(Ordering::SeqCst),
            closes: counters.closes.load(Ordering::SeqCst),
            executes: counters.executes.load(Ordering::SeqCst),
            row_fetches: counters.row_fetches.load(Ordering::SeqCst),
            page_fetches: counters.page_fetches.load(Ordering::SeqCst),
        }
    }

    /// Makes the next `open()` fail with a connection error.
    pub fn fail_next_open(&self) {
        self.inner.faults.fail_open.store(true, Ordering::SeqCst);
    }

    /// Makes the next effective `close()` fail after the connection is marked closed.
    pub fn fail_next_close(&self) {
        self.inner.faults.fail_close.store(true, Ordering::SeqCst);
    }

    /// Makes the `n`-th fetch from now (row or page, 1-based) fail with a query error.
    pub fn fail_fetch_at(&self, n: u64) {
        let faults = &self.inner.faults;
        let target = faults.fetch_calls.load(Ordering::SeqCst) + n;
        faults.fail_at.store(target, Ordering::SeqCst);
    }

    fn read_tables(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, MemTable>>, Error> {
        self.inner
            .tables
            .read()
            .map_err(|_| Error::new(ErrorKind::Internal).with_message("table lock poisoned"))
    }

    fn write_tables(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, MemTable>>, Error> {
        self.inner
            .tables
            .write()
            .map_err(|_| Error::new(ErrorKind::Internal).with_message("table lock poisoned"))
    }

    fn check_fetch_fault(&self) -> Result<(), Error> {
        let faults = &self.inner.faults;
        let call = faults.fetch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if faults
            .fail_at
            .compare_exchange(call, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return Err(Error::new(ErrorKind::Query).with_message("injected fetch failure"));
        }
        Ok(())
    }

    fn plan(&self, query: &Query) -> Result<(String, RowPlan), Error> {
        let select = query.compile()?;
        let tables = self.read_tables()?;
        let table = tables
            .get(&select.table)
            .ok_or_else(|| missing_table(&select.table))?;
        let plan = select.plan(&table.columns)?;
        Ok((select.table, plan))
    }
}

fn missing_table(name: &str) -> Error {
    Error::new(ErrorKind::Query)
        .with_message("no such table")
        .with_table(name)
}

impl ConnectionProvider for MemoryStore {
    type Connection = MemoryConnection;

    fn open(&self) -> Result<MemoryConnection, Error> {
        self.inner.counters.opens.fetch_add(1, Ordering::SeqCst);
        if self.inner.faults.fail_open.swap(false, Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::Connection).with_message("injected open failure"));
        }
        Ok(MemoryConnection {
            store: self.clone(),
            closed: false,
            cursor: None,
        })
    }
}

#[derive(Debug)]
struct MemCursor {
    table: String,
    plan: RowPlan,
    position: usize,
}

#[derive(Debug)]
pub struct MemoryConnection {
    store: MemoryStore,
    closed: bool,
    cursor: Option<MemCursor>,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed {
            return Err(Error::new(ErrorKind::Connection).with_message("connection is closed"));
        }
        Ok(())
    }
}

impl Connection for MemoryConnection {
    fn execute(&mut self, query: &Query) -> Result<(), Error> {
        self.ensure_open()?;
        self.store.inner.counters.executes.fetch_add(1, Ordering::SeqCst);
        let (table, plan) = self.store.plan(query)?;
        self.cursor = Some(MemCursor {
            table,
            plan,
            position: 0,
        });
        Ok(())
    }

    fn fetch_one(&mut self) -> Result<Option<Record>, Error> {
        self.ensure_open()?;
        self.store.inner.counters.row_fetches.fetch_add(1, Ordering::SeqCst);
        self.store.check_fetch_fault()?;
        let cursor = self.cursor.as_mut().ok_or_else(|| {
            Error::new(ErrorKind::Query).with_message("fetch without an executed query")
        })?;
        let tables = self.store.read_tables()?;
        let table = tables
            .get(&cursor.table)
            .ok_or_else(|| missing_table(&cursor.table))?;
        while let Some(row) = table.rows.get(cursor.position) {
            cursor.position += 1;
            if let Some(record) = cursor.plan.apply(row)? {
                trace!(position = cursor.position, "memory row fetched");
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn fetch_page(&mut self, query: &Query, limit: usize, offset: u64) -> Result<Batch, Error> {
        self.ensure_open()?;
        self.store.inner.counters.page_fetches.fetch_add(1, Ordering::SeqCst);
        self.store.check_fetch_fault()?;
        let (name, plan) = self.store.plan(query)?;
        let tables = self.store.read_tables()?;
        let table = tables.get(&name).ok_or_else(|| missing_table(&name))?;
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let mut batch = Vec::with_capacity(limit.min(table.rows.len()));
        let mut matched = 0usize;
        for row in &table.rows {
            if batch.len() == limit {
                break;
            }
            let Some(record) = plan.apply(row)? else {
                continue;
            };
            matched += 1;
            if matched > skip {
                batch.push(record);
            }
        }
        Ok(batch)
    }

    fn close(&mut self) -> Result<(), Error> {
        let counters = &self.store.inner.counters;
        counters.close_calls.fetch_add(1, Ordering::SeqCst);
        if !self.closed {
            self.closed = true;
            self.cursor = None;
            counters.closes.fetch_add(1, Ordering::SeqCst);
            if self.store.inner.faults.fail_close.swap(false, Ordering::SeqCst) {
                return Err(Error::new(ErrorKind::Connection).with_message("injected close failure"));
            }
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
