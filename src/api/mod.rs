//! Purpose: Define the stable caller-facing API for streaming reads.
//! Exports: `stream_rows`, `stream_batches`, `paginate`, `fetch_page`, `average`,
//! `average_column`, `batch_processing`, plus the types they return.
//! Role: Public surface for the CLI and embedders; storage is injected via `ConnectionProvider`.
//! Invariants: Size arguments are validated before any connection is opened.
//! Invariants: Returned streams own their connection; dropping them releases it.

mod process;

pub use crate::core::aggregate::{Aggregate, Average};
pub use crate::core::batch::{BatchSize, BatchStream};
pub use crate::core::connection::{Connection, ConnectionGuard, ConnectionProvider};
pub use crate::core::error::{Error, ErrorKind, to_exit_code};
pub use crate::core::file::{FileConnection, FileStore};
pub use crate::core::memory::{MemoryConnection, MemoryStore, StoreStats};
pub use crate::core::paginate::{Page, Paginator};
pub use crate::core::query::{Condition, Query};
pub use crate::core::rows::{RowStream, StreamState};
pub use crate::core::table::{InsertOutcome, TableHeader};
pub use crate::core::value::{Batch, Record, Value};
pub use process::FilteredRecords;

use crate::core::{aggregate, paginate as pages};

pub type ApiResult<T> = Result<T, Error>;

/// Streams one record per advance from the store's server-side cursor.
pub fn stream_rows<P: ConnectionProvider>(
    provider: &P,
    query: &Query,
) -> ApiResult<RowStream<P::Connection>> {
    RowStream::open(provider, query)
}

/// Streams batches of up to `batch_size` records; non-positive sizes are rejected up front.
pub fn stream_batches<P: ConnectionProvider>(
    provider: &P,
    query: Query,
    batch_size: i64,
) -> ApiResult<BatchStream<P::Connection>> {
    let batch_size = BatchSize::new(batch_size)?;
    BatchStream::open(provider, query, batch_size)
}

/// Pages over every row of `table`, fetching one page per request.
pub fn paginate<P: ConnectionProvider>(
    provider: &P,
    table: &str,
    page_size: i64,
) -> ApiResult<Paginator<P::Connection>> {
    paginate_query(provider, Query::select_all(table), page_size)
}

pub fn paginate_query<P: ConnectionProvider>(
    provider: &P,
    query: Query,
    page_size: i64,
) -> ApiResult<Paginator<P::Connection>> {
    let page_size = BatchSize::new(page_size)?;
    Paginator::open(provider, query, page_size)
}

/// Fetches exactly one page at `offset` on a short-lived connection.
pub fn fetch_page<P: ConnectionProvider>(
    provider: &P,
    query: &Query,
    page_size: i64,
    offset: u64,
) -> ApiResult<Batch> {
    let page_size = BatchSize::new(page_size)?;
    pages::fetch_page(provider, query, page_size, offset)
}

/// Averages the single projected column of `query`.
pub fn average<P: ConnectionProvider>(provider: &P, query: &Query) -> ApiResult<Average> {
    aggregate::average(|| RowStream::open(provider, query))
}

pub fn average_column<P: ConnectionProvider>(
    provider: &P,
    table: &str,
    column: &str,
) -> ApiResult<Aggregate> {
    let rows = RowStream::open(provider, &Query::select_column(table, column))?;
    aggregate::aggregate_rows(rows)
}

/// Flattens `batches` and keeps only the records satisfying `condition`.
pub fn batch_processing<I>(batches: I, condition: Condition) -> FilteredRecords<I::IntoIter>
where
    I: IntoIterator<Item = ApiResult<Batch>>,
{
    FilteredRecords::new(batches.into_iter(), condition)
}
