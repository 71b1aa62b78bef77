// Row-at-a-time streaming over a connection's server-side cursor.
use tracing::{debug, trace};

use crate::core::connection::{Connection, ConnectionGuard, ConnectionProvider};
use crate::core::error::Error;
use crate::core::query::Query;
use crate::core::value::Record;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamState {
    Open,
    Exhausted,
    Failed,
}

/// A single-pass sequence of records from one query.
///
/// Each `next()` performs exactly one `fetch_one`. The connection is released
/// when the cursor is exhausted, when a fetch fails (before the error is
/// yielded), or when the stream is dropped early.
pub struct RowStream<C: Connection> {
    guard: ConnectionGuard<C>,
    state: StreamState,
    yielded: u64,
}

impl<C: Connection> RowStream<C> {
    pub fn open<P>(provider: &P, query: &Query) -> Result<Self, Error>
    where
        P: ConnectionProvider<Connection = C>,
    {
        let mut guard = ConnectionGuard::open(provider)?;
        let executed = guard.connection().and_then(|conn| conn.execute(query));
        if let Err(err) = executed {
            return Err(guard.fail(err));
        }
        debug!(query = %query, "row stream opened");
        Ok(Self {
            guard,
            state: StreamState::Open,
            yielded: 0,
        })
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Records yielded so far.
    pub fn yielded(&self) -> u64 {
        self.yielded
    }

    fn advance(&mut self) -> Result<Option<Record>, Error> {
        let conn = self.guard.connection()?;
        conn.fetch_one()
    }
}

impl<C: Connection> Iterator for RowStream<C> {
    type Item = Result<Record, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state != StreamState::Open {
            return None;
        }
        match self.advance() {
            Ok(Some(record)) => {
                self.yielded += 1;
                trace!(row = self.yielded, "row fetched");
                Some(Ok(record))
            }
            Ok(None) => {
                self.state = StreamState::Exhausted;
                debug!(rows = self.yielded, "row stream exhausted");
                match self.guard.release() {
                    Ok(()) => None,
                    Err(err) => Some(Err(err)),
                }
            }
            Err(err) => {
                self.state = StreamState::Failed;
                Some(Err(self.guard.fail(err)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{RowStream, StreamState};
    use crate::core::error::ErrorKind;
    use crate::core::memory::MemoryStore;
    use crate::core::query::Query;
    use crate::core::value::Value;

    fn users(count: i64) -> MemoryStore {
        let store = MemoryStore::new();
        let rows = (0..count)
            .map(|i| vec![Value::from(format!("u{i}")), Value::Int(20 + i)])
            .collect();
        store
            .create_table("user_data", &["user_id", "age"], rows)
            .expect("table");
        store
    }

    #[test]
    fn yields_rows_in_order_then_releases() {
        let store = users(3);
        let stream = RowStream::open(&store, &Query::select_all("user_data")).expect("open");
        let ids = stream
            .map(|row| row.expect("row").get("user_id").cloned().expect("id"))
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![Value::from("u0"), Value::from("u1"), Value::from("u2")]);
        let stats = store.stats();
        assert_eq!(stats.close_calls, 1);
        assert_eq!(stats.row_fetches, 4);
    }

    #[test]
    fn each_advance_fetches_exactly_one_row() {
        let store = users(10);
        let mut stream = RowStream::open(&store, &Query::select_all("user_data")).expect("open");
        assert_eq!(store.stats().row_fetches, 0);
        stream.next().expect("first").expect("row");
        stream.next().expect("second").expect("row");
        assert_eq!(store.stats().row_fetches, 2);
        assert_eq!(stream.yielded(), 2);
    }

    #[test]
    fn abandoned_stream_releases_on_drop() {
        let store = users(10);
        {
            let mut stream =
                RowStream::open(&store, &Query::select_all("user_data")).expect("open");
            stream.next().expect("first").expect("row");
            assert_eq!(store.stats().close_calls, 0);
        }
        assert_eq!(store.stats().close_calls, 1);
    }

    #[test]
    fn mid_stream_failure_releases_before_error() {
        let store = users(5);
        store.fail_fetch_at(3);
        let mut stream = RowStream::open(&store, &Query::select_all("user_data")).expect("open");
        assert!(stream.next().expect("1").is_ok());
        assert!(stream.next().expect("2").is_ok());
        let err = stream.next().expect("3").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Query);
        assert_eq!(store.stats().close_calls, 1);
        assert_eq!(stream.state(), StreamState::Failed);
        assert!(stream.next().is_none());
        drop(stream);
        assert_eq!(store.stats().close_calls, 1);
    }

    #[test]
    fn close_failure_on_exhaustion_is_the_final_item() {
        let store = users(1);
        store.fail_next_close();
        let mut stream = RowStream::open(&store, &Query::select_all("user_data")).expect("open");
        assert!(stream.next().expect("row").is_ok());
        let err = stream.next().expect("close error").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(stream.next().is_none());
        assert_eq!(stream.state(), StreamState::Exhausted);
        assert_eq!(store.stats().close_calls, 1);
    }

    #[test]
    fn fetch_error_wins_over_close_failure() {
        let store = users(3);
        store.fail_fetch_at(2);
        store.fail_next_close();
        let mut stream = RowStream::open(&store, &Query::select_all("user_data")).expect("open");
        assert!(stream.next().expect("1").is_ok());
        let err = stream.next().expect("2").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Query);
        assert!(stream.next().is_none());
        assert_eq!(store.stats().close_calls, 1);
    }

    #[test]
    fn execute_failure_releases_connection() {
        let store = users(1);
        let result = RowStream::open(&store, &Query::select_all("missing"));
        assert_eq!(result.err().map(|err| err.kind()), Some(ErrorKind::Query));
        assert_eq!(store.stats().close_calls, 1);
    }

    #[test]
    fn open_failure_surfaces_connection_error() {
        let store = users(1);
        store.fail_next_open();
        let result = RowStream::open(&store, &Query::select_all("user_data"));
        assert_eq!(result.err().map(|err| err.kind()), Some(ErrorKind::Connection));
        assert_eq!(store.stats().close_calls, 0);
    }

    #[test]
    fn stream_is_not_restartable() {
        let store = users(1);
        let mut stream = RowStream::open(&store, &Query::select_all("user_data")).expect("open");
        assert!(stream.next().is_some());
        assert!(stream.next().is_none());
        assert!(stream.next().is_none());
        assert_eq!(stream.state(), StreamState::Exhausted);
        assert_eq!(store.stats().row_fetches, 2);
    }
}
