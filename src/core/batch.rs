// Fixed-size batches via repeated bounded fetches at an advancing offset.
use std::num::NonZeroUsize;

use tracing::debug;

use crate::core::connection::{Connection, ConnectionGuard, ConnectionProvider};
use crate::core::error::{Error, ErrorKind};
use crate::core::query::Query;
use crate::core::rows::StreamState;
use crate::core::value::Batch;

/// A validated, positive batch or page size.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BatchSize(NonZeroUsize);

impl BatchSize {
    pub fn new(value: i64) -> Result<Self, Error> {
        usize::try_from(value)
            .ok()
            .and_then(NonZeroUsize::new)
            .map(Self)
            .ok_or_else(|| {
                Error::new(ErrorKind::Configuration)
                    .with_message(format!("batch size must be a positive integer, got {value}"))
                    .with_hint("Pass a size of 1 or more.")
            })
    }

    pub fn get(self) -> usize {
        self.0.get()
    }
}

/// A single-pass sequence of batches of up to `batch_size` records.
///
/// The stream ends on the first empty batch; that is the only termination
/// condition, so a table that shrinks between fetches simply ends early.
pub struct BatchStream<C: Connection> {
    guard: ConnectionGuard<C>,
    query: Query,
    batch_size: BatchSize,
    offset: u64,
    fetches: u64,
    state: StreamState,
}

impl<C: Connection> BatchStream<C> {
    pub fn open<P>(provider: &P, query: Query, batch_size: BatchSize) -> Result<Self, Error>
    where
        P: ConnectionProvider<Connection = C>,
    {
        let guard = ConnectionGuard::open(provider)?;
        debug!(query = %query, batch_size = batch_size.get(), "batch stream opened");
        Ok(Self {
            guard,
            query,
            batch_size,
            offset: 0,
            fetches: 0,
            state: StreamState::Open,
        })
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn batch_size(&self) -> BatchSize {
        self.batch_size
    }

    /// Offset the next fetch will start from.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bounded fetches issued so far, including a terminating empty one.
    pub fn fetches(&self) -> u64 {
        self.fetches
    }

    fn fetch(&mut self) -> Result<Batch, Error> {
        let limit = self.batch_size.get();
        let offset = self.offset;
        let conn = self.guard.connection()?;
        self.fetches += 1;
        conn.fetch_page(&self.query, limit, offset)
            .map_err(|err| err.with_offset(offset))
    }
}

impl<C: Connection> Iterator for BatchStream<C> {
    type Item = Result<Batch, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state != StreamState::Open {
            return None;
        }
        match self.fetch() {
            Ok(batch) if batch.is_empty() => {
                self.state = StreamState::Exhausted;
                debug!(fetches = self.fetches, offset = self.offset, "batch stream exhausted");
                match self.guard.release() {
                    Ok(()) => None,
                    Err(err) => Some(Err(err)),
                }
            }
            Ok(batch) => {
                debug!(offset = self.offset, rows = batch.len(), "batch fetched");
                self.offset += self.batch_size.get() as u64;
                Some(Ok(batch))
            }
            Err(err) => {
                self.state = StreamState::Failed;
                Some(Err(self.guard.fail(err)))
            }
        }
    }
}
