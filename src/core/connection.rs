// Connection provider seam and scoped connection ownership for streams.
use tracing::{debug, warn};

use crate::core::error::{Error, ErrorKind};
use crate::core::query::Query;
use crate::core::value::{Batch, Record};

/// Opens connections to a backing store. No retries and no pooling happen here.
pub trait ConnectionProvider {
    type Connection: Connection;

    fn open(&self) -> Result<Self::Connection, Error>;
}

/// A single logical reader against the store.
///
/// A connection has at most one open cursor. `execute` replaces it, `fetch_one`
/// advances it by exactly one row, and `fetch_page` runs an independent bounded
/// query without touching the cursor. `close` is idempotent.
pub trait Connection {
    fn execute(&mut self, query: &Query) -> Result<(), Error>;

    /// Returns the next row of the open cursor, or `None` once it is exhausted.
    fn fetch_one(&mut self) -> Result<Option<Record>, Error>;

    /// Runs `query` with `LIMIT limit OFFSET offset` semantics.
    fn fetch_page(&mut self, query: &Query, limit: usize, offset: u64) -> Result<Batch, Error>;

    fn close(&mut self) -> Result<(), Error>;

    fn is_closed(&self) -> bool;
}

/// Owns a connection for a stream's lifetime and closes it exactly once.
///
/// Release happens through `release()` on exhaustion or error, or on drop when
/// the caller abandons the stream early.
#[derive(Debug)]
pub struct ConnectionGuard<C: Connection> {
    conn: Option<C>,
}

impl<C: Connection> ConnectionGuard<C> {
    pub fn new(conn: C) -> Self {
        Self { conn: Some(conn) }
    }

    pub fn open<P>(provider: &P) -> Result<Self, Error>
    where
        P: ConnectionProvider<Connection = C>,
    {
        let conn = provider.open()?;
        debug!("connection opened");
        Ok(Self::new(conn))
    }

    pub fn is_released(&self) -> bool {
        self.conn.is_none()
    }

    pub fn connection(&mut self) -> Result<&mut C, Error> {
        self.conn.as_mut().ok_or_else(|| {
            Error::new(ErrorKind::Connection).with_message("connection already released")
        })
    }

    /// Closes the connection if it is still held. Later calls are no-ops.
    pub fn release(&mut self) -> Result<(), Error> {
        match self.conn.take() {
            Some(mut conn) => {
                debug!("connection released");
                conn.close()
            }
            None => Ok(()),
        }
    }

    /// Releases ahead of propagating `err`; a close failure is logged, `err` wins.
    pub fn fail(&mut self, err: Error) -> Error {
        if let Err(close_err) = self.release() {
            warn!(error = %close_err, "failed to close connection after error");
        }
        err
    }
}

impl<C: Connection> Drop for ConnectionGuard<C> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(error = %err, "failed to close abandoned connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionGuard;
    use crate::core::error::{Error, ErrorKind};
    use crate::core::memory::MemoryStore;
    use crate::core::value::Value;

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .create_table("t", &["n"], vec![vec![Value::Int(1)]])
            .expect("table");
        store
    }

    #[test]
    fn release_closes_once() {
        let store = store();
        let mut guard = ConnectionGuard::open(&store).expect("open");
        guard.release().expect("release");
        guard.release().expect("second release");
        drop(guard);
        let stats = store.stats();
        assert_eq!(stats.opens, 1);
        assert_eq!(stats.close_calls, 1);
    }

    #[test]
    fn drop_closes_unreleased_connection() {
        let store = store();
        {
            let _guard = ConnectionGuard::open(&store).expect("open");
        }
        assert_eq!(store.stats().close_calls, 1);
    }

    #[test]
    fn failed_close_on_drop_is_not_fatal() {
        let store = store();
        store.fail_next_close();
        {
            let _guard = ConnectionGuard::open(&store).expect("open");
        }
        let stats = store.stats();
        assert_eq!(stats.close_calls, 1);
        assert_eq!(stats.closes, 1);
    }

    #[test]
    fn fail_keeps_the_original_error() {
        let store = store();
        store.fail_next_close();
        let mut guard = ConnectionGuard::open(&store).expect("open");
        let err = guard.fail(Error::new(ErrorKind::Query).with_message("fetch failed"));
        assert_eq!(err.kind(), ErrorKind::Query);
        assert!(guard.is_released());
        assert_eq!(store.stats().close_calls, 1);
    }

    #[test]
    fn released_guard_refuses_access() {
        let store = store();
        let mut guard = ConnectionGuard::open(&store).expect("open");
        guard.release().expect("release");
        assert!(guard.is_released());
        assert!(guard.connection().is_err());
    }
}
