// Running count/total over a single-column row stream; the mean is derived on demand.
use tracing::debug;

use crate::core::error::{Error, ErrorKind};
use crate::core::value::{Record, Value};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Aggregate {
    count: u64,
    total: i128,
}

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn total(&self) -> i128 {
        self.total
    }

    /// Adds one value. NULL is skipped; strings are rejected.
    pub fn push(&mut self, value: &Value) -> Result<(), Error> {
        match value {
            Value::Int(n) => {
                self.count += 1;
                self.total += i128::from(*n);
                Ok(())
            }
            Value::Null => Ok(()),
            Value::Str(text) => Err(Error::new(ErrorKind::Query)
                .with_message(format!("cannot aggregate non-numeric value '{text}'"))),
        }
    }

    pub fn push_record(&mut self, record: &Record) -> Result<(), Error> {
        match record.values() {
            [value] => self.push(value),
            values => Err(Error::new(ErrorKind::Query)
                .with_message(format!(
                    "aggregation expects one projected column, got {}",
                    values.len()
                ))
                .with_hint("Select exactly one numeric column.")),
        }
    }

    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(self.total as f64 / self.count as f64)
    }

    pub fn average(&self) -> Average {
        match self.mean() {
            Some(mean) => Average::Mean(mean),
            None => Average::NoData,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Average {
    /// No numeric values were seen.
    NoData,
    Mean(f64),
}

impl Average {
    pub fn value(self) -> Option<f64> {
        match self {
            Average::NoData => None,
            Average::Mean(mean) => Some(mean),
        }
    }

    pub fn value_or_zero(self) -> f64 {
        self.value().unwrap_or(0.0)
    }
}

/// Folds rows strictly in arrival order. The first error stops consumption.
pub fn aggregate_rows<I>(rows: I) -> Result<Aggregate, Error>
where
    I: IntoIterator<Item = Result<Record, Error>>,
{
    let mut aggregate = Aggregate::new();
    for row in rows {
        aggregate.push_record(&row?)?;
    }
    debug!(count = aggregate.count, "aggregation finished");
    Ok(aggregate)
}

/// Opens a row stream through `open_rows` and averages its single column.
pub fn average<F, I>(open_rows: F) -> Result<Average, Error>
where
    F: FnOnce() -> Result<I, Error>,
    I: IntoIterator<Item = Result<Record, Error>>,
{
    aggregate_rows(open_rows()?).map(|aggregate| aggregate.average())
}
