// Caller-facing lazy pagination: one bounded fetch per page request, never ahead.
use tracing::debug;

use crate::core::batch::{BatchSize, BatchStream};
use crate::core::connection::{Connection, ConnectionGuard, ConnectionProvider};
use crate::core::error::Error;
use crate::core::query::Query;
use crate::core::rows::StreamState;
use crate::core::value::Batch;

/// One page as handed to the caller.
#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    /// 1-based page number.
    pub number: u64,
    pub offset: u64,
    pub records: Batch,
}

pub struct Paginator<C: Connection> {
    batches: BatchStream<C>,
    pages: u64,
}

impl<C: Connection> Paginator<C> {
    pub fn open<P>(provider: &P, query: Query, page_size: BatchSize) -> Result<Self, Error>
    where
        P: ConnectionProvider<Connection = C>,
    {
        Ok(Self {
            batches: BatchStream::open(provider, query, page_size)?,
            pages: 0,
        })
    }

    pub fn page_size(&self) -> BatchSize {
        self.batches.batch_size()
    }

    /// Pages handed out so far.
    pub fn pages(&self) -> u64 {
        self.pages
    }

    /// Underlying fetches so far; equals the number of page requests made.
    pub fn fetches(&self) -> u64 {
        self.batches.fetches()
    }

    pub fn state(&self) -> StreamState {
        self.batches.state()
    }

    /// Fetches the next page. `Ok(None)` once an empty page has been seen.
    pub fn next_page(&mut self) -> Result<Option<Page>, Error> {
        let offset = self.batches.offset();
        match self.batches.next() {
            Some(Ok(records)) => {
                self.pages += 1;
                Ok(Some(Page {
                    number: self.pages,
                    offset,
                    records,
                }))
            }
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }
}

impl<C: Connection> Iterator for Paginator<C> {
    type Item = Result<Page, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_page().transpose()
    }
}

/// Fetches a single page on its own connection, released before returning.
pub fn fetch_page<P: ConnectionProvider>(
    provider: &P,
    query: &Query,
    page_size: BatchSize,
    offset: u64,
) -> Result<Batch, Error> {
    let mut guard = ConnectionGuard::open(provider)?;
    let fetched = guard
        .connection()
        .and_then(|conn| conn.fetch_page(query, page_size.get(), offset));
    match fetched {
        Ok(batch) => {
            debug!(offset, rows = batch.len(), "page fetched");
            guard.release()?;
            Ok(batch)
        }
        Err(err) => Err(guard.fail(err.with_offset(offset))),
    }
}

#[cfg(test)]
mod tests {
    use super::{Paginator, fetch_page};
    use crate::core::batch::BatchSize;
    use crate::core::memory::MemoryStore;
    use crate::core::query::Query;
    use crate::core::value::Value;

    fn numbers(count: i64) -> MemoryStore {
        let store = MemoryStore::new();
        let rows = (1..=count).map(|n| vec![Value::Int(n)]).collect();
        store.create_table("numbers", &["n"], rows).expect("table");
        store
    }

    fn size(value: i64) -> BatchSize {
        BatchSize::new(value).expect("size")
    }

    #[test]
    fn k_requests_make_exactly_k_fetches() {
        let store = numbers(100);
        let mut pages =
            Paginator::open(&store, Query::select_all("numbers"), size(10)).expect("open");
        assert_eq!(store.stats().page_fetches, 0);
        for k in 1..=3 {
            let page = pages.next_page().expect("page").expect("some");
            assert_eq!(page.number, k);
            assert_eq!(page.records.len(), 10);
            assert_eq!(pages.fetches(), k);
            assert_eq!(store.stats().page_fetches, k);
        }
    }

    #[test]
    fn pages_carry_their_offsets() {
        let store = numbers(5);
        let pages = Paginator::open(&store, Query::select_all("numbers"), size(2))
            .expect("open")
            .collect::<Result<Vec<_>, _>>()
            .expect("pages");
        let offsets = pages.iter().map(|page| page.offset).collect::<Vec<_>>();
        assert_eq!(offsets, vec![0, 2, 4]);
        assert_eq!(pages[2].records[0].get("n"), Some(&Value::Int(5)));
        assert_eq!(store.stats().page_fetches, 4);
        assert_eq!(store.stats().close_calls, 1);
    }

    #[test]
    fn dropping_mid_pagination_releases() {
        let store = numbers(50);
        {
            let mut pages =
                Paginator::open(&store, Query::select_all("numbers"), size(5)).expect("open");
            pages.next_page().expect("page");
        }
        assert_eq!(store.stats().close_calls, 1);
        assert_eq!(store.stats().page_fetches, 1);
    }

    #[test]
    fn single_page_fetch_opens_and_closes() {
        let store = numbers(5);
        let page = fetch_page(&store, &Query::select_all("numbers"), size(2), 3).expect("page");
        let values = page
            .iter()
            .map(|record| record.get("n").cloned().expect("n"))
            .collect::<Vec<_>>();
        assert_eq!(values, vec![Value::Int(4), Value::Int(5)]);
        let stats = store.stats();
        assert_eq!(stats.opens, 1);
        assert_eq!(stats.close_calls, 1);
    }
}
