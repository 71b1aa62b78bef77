//! Purpose: Flatten a batch stream into filtered records without buffering past one batch.
//! Exports: `FilteredRecords`.
//! Role: Client-side processing stage layered on `BatchStream` (e.g. `age > 25`).
//! Invariants: The next batch is fetched only after the current one is fully consumed.
//! Invariants: Stream and filter errors are yielded once; iteration then stops.
//! Invariants: The batch source is dropped before an error is yielded or `None` is returned.

use std::vec::IntoIter;

use crate::core::error::Error;
use crate::core::query::Condition;
use crate::core::value::{Batch, Record};

pub struct FilteredRecords<I> {
    // `None` once finished, so the source's connection is already released.
    batches: Option<I>,
    condition: Condition,
    current: IntoIter<Record>,
}

impl<I> FilteredRecords<I>
where
    I: Iterator<Item = Result<Batch, Error>>,
{
    pub fn new(batches: I, condition: Condition) -> Self {
        Self {
            batches: Some(batches),
            condition,
            current: Vec::new().into_iter(),
        }
    }

    fn finish(&mut self) {
        self.batches = None;
        self.current = Vec::new().into_iter();
    }
}

impl<I> Iterator for FilteredRecords<I>
where
    I: Iterator<Item = Result<Batch, Error>>,
{
    type Item = Result<Record, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.batches.is_none() {
                return None;
            }
            for record in self.current.by_ref() {
                match self.condition.evaluate(&record) {
                    Ok(true) => return Some(Ok(record)),
                    Ok(false) => {}
                    Err(err) => {
                        self.finish();
                        return Some(Err(err));
                    }
                }
            }
            match self.batches.as_mut().and_then(Iterator::next) {
                Some(Ok(batch)) => self.current = batch.into_iter(),
                Some(Err(err)) => {
                    self.finish();
                    return Some(Err(err));
                }
                None => {
                    self.finish();
                    return None;
                }
            }
        }
    }
}
