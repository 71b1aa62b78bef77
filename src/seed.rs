//! Purpose: Read seed files (headered CSV or NDJSON) as a lazy stream of table rows.
//! Exports: `SeedFormat`, `SeedRows`.
//! Role: Input side of `rowstream seed`; rows flow straight into `FileStore::insert_ignore`.
//! Invariants: One input record is parsed per pulled row; nothing is read ahead.
//! Invariants: Malformed records are skipped and counted; an I/O failure ends the stream.
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use rowstream::api::{Error, ErrorKind, Value};
use serde_json::Value as JsonValue;
use tracing::warn;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum SeedFormat {
    /// Comma-separated values with a header row naming the columns.
    Csv,
    /// One JSON object per line.
    Ndjson,
}

impl SeedFormat {
    /// `.csv` files are CSV; anything else is NDJSON.
    pub fn infer(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => SeedFormat::Csv,
            _ => SeedFormat::Ndjson,
        }
    }
}

enum Source {
    Ndjson(Lines<BufReader<File>>),
    Csv {
        records: csv::StringRecordsIntoIter<File>,
        // Position of each table column in the CSV header.
        positions: Vec<Option<usize>>,
    },
}

/// Rows laid out in table column order; missing fields become null.
pub struct SeedRows {
    source: Source,
    columns: Vec<String>,
    path: PathBuf,
    records: u64,
    rejected: u64,
    error: Option<Error>,
}

impl SeedRows {
    pub fn open(path: &Path, format: SeedFormat, columns: &[String]) -> Result<Self, Error> {
        let file = File::open(path).map_err(|err| {
            Error::new(ErrorKind::NotFound)
                .with_message("cannot open seed file")
                .with_path(path)
                .with_source(err)
        })?;
        let source = match format {
            SeedFormat::Ndjson => Source::Ndjson(BufReader::new(file).lines()),
            SeedFormat::Csv => {
                let mut reader = csv::ReaderBuilder::new()
                    .has_headers(true)
                    .trim(csv::Trim::All)
                    .from_reader(file);
                let headers = reader
                    .headers()
                    .map_err(|err| csv_error(path, err, "invalid csv header"))?;
                let positions = columns
                    .iter()
                    .map(|column| headers.iter().position(|name| name == column))
                    .collect();
                Source::Csv {
                    records: reader.into_records(),
                    positions,
                }
            }
        };
        Ok(Self {
            source,
            columns: columns.to_vec(),
            path: path.to_path_buf(),
            records: 0,
            rejected: 0,
            error: None,
        })
    }

    /// Ends the stream, returning the rejected count or the I/O error that stopped it.
    pub fn finish(self) -> Result<u64, Error> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.rejected),
        }
    }
}

impl Iterator for SeedRows {
    type Item = Vec<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.error.is_none() {
            let parsed = match &mut self.source {
                Source::Ndjson(lines) => match lines.next()? {
                    Ok(line) if line.trim().is_empty() => continue,
                    Ok(line) => ndjson_row(line.trim(), &self.columns),
                    Err(err) => {
                        self.error = Some(
                            Error::new(ErrorKind::Io)
                                .with_message("failed to read seed file")
                                .with_path(&self.path)
                                .with_source(err),
                        );
                        return None;
                    }
                },
                Source::Csv { records, positions } => match records.next()? {
                    Ok(record) => Ok(csv_row(&record, positions)),
                    Err(err) if err.is_io_error() => {
                        self.error = Some(csv_error(&self.path, err, "failed to read seed file"));
                        return None;
                    }
                    Err(err) => Err(csv_error(&self.path, err, "malformed csv record")),
                },
            };
            self.records += 1;
            match parsed {
                Ok(row) => return Some(row),
                Err(err) => {
                    warn!(record = self.records, error = %err, "skipping seed row");
                    self.rejected += 1;
                }
            }
        }
        None
    }
}

fn ndjson_row(text: &str, columns: &[String]) -> Result<Vec<Value>, Error> {
    let parsed: JsonValue = serde_json::from_str(text).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid json")
            .with_source(err)
    })?;
    let JsonValue::Object(object) = parsed else {
        return Err(Error::new(ErrorKind::Usage).with_message("seed rows must be json objects"));
    };
    columns
        .iter()
        .map(|column| match object.get(column) {
            Some(value) => Value::from_json(value),
            None => Ok(Value::Null),
        })
        .collect()
}

/// Empty cells are null; integer-looking cells are `Int`.
fn csv_row(record: &csv::StringRecord, positions: &[Option<usize>]) -> Vec<Value> {
    positions
        .iter()
        .map(|position| match position.and_then(|index| record.get(index)) {
            None | Some("") => Value::Null,
            Some(cell) => Value::parse_param(cell),
        })
        .collect()
}

fn csv_error(path: &Path, err: csv::Error, message: &str) -> Error {
    let kind = if err.is_io_error() {
        ErrorKind::Io
    } else {
        ErrorKind::Usage
    };
    Error::new(kind)
        .with_message(message)
        .with_path(path)
        .with_source(err)
}
