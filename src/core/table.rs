// Table file layout: a JSON header line, then one JSON array of values per row.
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use libc::{EACCES, EPERM};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::core::error::{Error, ErrorKind};
use crate::core::value::Value;

const FORMAT: &str = "rowstream-table";
const VERSION: u32 = 1;
const WRITE_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TableHeader {
    pub format: String,
    pub version: u32,
    pub columns: Vec<String>,
    pub primary_key: Option<String>,
}

impl TableHeader {
    pub fn new(columns: Vec<String>, primary_key: Option<String>) -> Result<Self, Error> {
        let header = Self {
            format: FORMAT.to_string(),
            version: VERSION,
            columns,
            primary_key,
        };
        header.validate_schema()?;
        Ok(header)
    }

    pub fn key_index(&self) -> Option<usize> {
        let key = self.primary_key.as_deref()?;
        self.columns.iter().position(|column| column == key)
    }

    fn validate_schema(&self) -> Result<(), Error> {
        if self.columns.is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("a table needs at least one column"));
        }
        let mut seen = HashSet::new();
        for column in &self.columns {
            let valid = column.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && column.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("column name `{column}` is not an identifier")));
            }
            if !seen.insert(column.as_str()) {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("duplicate column `{column}`")));
            }
        }
        if let Some(key) = &self.primary_key {
            if self.key_index().is_none() {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("primary key `{key}` is not a column")));
            }
        }
        Ok(())
    }

    fn decode(line: &str, path: &Path) -> Result<Self, Error> {
        let header: Self = serde_json::from_str(line).map_err(|err| {
            Error::new(ErrorKind::Corrupt)
                .with_message("invalid table header")
                .with_path(path)
                .with_source(err)
        })?;
        if header.format != FORMAT {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message("not a table file")
                .with_path(path));
        }
        if header.version != VERSION {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message("unsupported table version")
                .with_path(path));
        }
        header
            .validate_schema()
            .map_err(|err| Error::new(ErrorKind::Corrupt).with_path(path).with_source(err))?;
        Ok(header)
    }
}

/// Sequential reader over a table file holding a shared lock until dropped.
#[derive(Debug)]
pub struct TableReader {
    path: PathBuf,
    reader: BufReader<File>,
    header: TableHeader,
    line_no: u64,
}

impl TableReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|err| io_error(&path, err))?;
        FileExt::lock_shared(&file).map_err(|err| lock_error(&path, err))?;

        let mut reader = BufReader::new(file);
        let mut line = String::new();
        let read = reader.read_line(&mut line);
        let header = match read {
            Ok(0) => Err(Error::new(ErrorKind::Corrupt)
                .with_message("table file is empty")
                .with_path(&path)),
            Ok(_) => TableHeader::decode(line.trim_end(), &path),
            Err(err) => Err(io_error(&path, err)),
        };
        let header = match header {
            Ok(header) => header,
            Err(err) => {
                let _ = FileExt::unlock(reader.get_ref());
                return Err(err);
            }
        };

        Ok(Self {
            path,
            reader,
            header,
            line_no: 1,
        })
    }

    pub fn header(&self) -> &TableHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the next row, skipping blank lines. `None` at end of file.
    pub fn next_row(&mut self) -> Result<Option<Vec<Value>>, Error> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .map_err(|err| io_error(&self.path, err))?;
            if read == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            return decode_row(text, self.header.columns.len())
                .map(Some)
                .map_err(|err| {
                    err.with_message(format!("malformed row on line {}", self.line_no))
                        .with_path(&self.path)
                });
        }
    }
}

impl Drop for TableReader {
    fn drop(&mut self) {
        let _ = FileExt::unlock(self.reader.get_ref());
    }
}

fn decode_row(text: &str, width: usize) -> Result<Vec<Value>, Error> {
    let cells: Vec<JsonValue> = serde_json::from_str(text)
        .map_err(|err| Error::new(ErrorKind::Corrupt).with_source(err))?;
    if cells.len() != width {
        return Err(Error::new(ErrorKind::Corrupt));
    }
    cells
        .iter()
        .map(|cell| Value::from_json(cell).map_err(|err| Error::new(ErrorKind::Corrupt).with_source(err)))
        .collect()
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct InsertOutcome {
    pub inserted: u64,
    /// Rows whose primary key was already present.
    pub ignored: u64,
    /// Rows with the wrong number of values.
    pub rejected: u64,
}

pub fn create_table(path: impl AsRef<Path>, header: &TableHeader) -> Result<(), Error> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| io_error(parent, err))?;
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|err| {
            if err.kind() == io::ErrorKind::AlreadyExists {
                Error::new(ErrorKind::AlreadyExists)
                    .with_message("table already exists")
                    .with_path(path)
            } else {
                io_error(path, err)
            }
        })?;
    let mut line = serde_json::to_string(header).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode table header")
            .with_source(err)
    })?;
    line.push('\n');
    file.write_all(line.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|err| io_error(path, err))
}

/// Appends rows under the exclusive lock, skipping rows whose key already exists.
///
/// Rows are pulled from `rows` one at a time and written in chunks of about
/// `WRITE_CHUNK_BYTES`; only the existing key set is held in memory.
pub fn insert_ignore<I>(path: impl AsRef<Path>, rows: I) -> Result<InsertOutcome, Error>
where
    I: IntoIterator<Item = Vec<Value>>,
{
    let path = path.as_ref();
    let file = OpenOptions::new()
        .read(true)
        .append(true)
        .open(path)
        .map_err(|err| io_error(path, err))?;
    FileExt::lock_exclusive(&file).map_err(|err| lock_error(path, err))?;
    let lock = ExclusiveLock { file: &file };

    let (header, mut keys, mut needs_newline) = scan_existing(lock.file, path)?;
    let key_index = header.key_index();
    let width = header.columns.len();

    let mut writer = lock.file;
    let mut outcome = InsertOutcome::default();
    let mut out = String::new();
    for row in rows {
        if row.len() != width {
            outcome.rejected += 1;
            continue;
        }
        if let Some(index) = key_index {
            if !keys.insert(row[index].clone()) {
                outcome.ignored += 1;
                continue;
            }
        }
        let line = serde_json::to_string(&row).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode row")
                .with_source(err)
        })?;
        if needs_newline {
            out.push('\n');
            needs_newline = false;
        }
        out.push_str(&line);
        out.push('\n');
        outcome.inserted += 1;
        if out.len() >= WRITE_CHUNK_BYTES {
            write_chunk(&mut writer, &mut out, path)?;
        }
    }
    write_chunk(&mut writer, &mut out, path)?;
    writer.flush().map_err(|err| io_error(path, err))?;
    drop(lock);
    Ok(outcome)
}

fn write_chunk(writer: &mut &File, out: &mut String, path: &Path) -> Result<(), Error> {
    if out.is_empty() {
        return Ok(());
    }
    writer
        .write_all(out.as_bytes())
        .map_err(|err| io_error(path, err))?;
    out.clear();
    Ok(())
}

struct ExclusiveLock<'a> {
    file: &'a File,
}

impl Drop for ExclusiveLock<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(self.file);
    }
}

fn scan_existing(file: &File, path: &Path) -> Result<(TableHeader, HashSet<Value>, bool), Error> {
    let mut reader = BufReader::new(file);
    reader
        .seek(SeekFrom::Start(0))
        .map_err(|err| io_error(path, err))?;
    let mut line = String::new();
    if reader.read_line(&mut line).map_err(|err| io_error(path, err))? == 0 {
        return Err(Error::new(ErrorKind::Corrupt)
            .with_message("table file is empty")
            .with_path(path));
    }
    let header = TableHeader::decode(line.trim_end(), path)?;
    let mut ends_with_newline = line.ends_with('\n');

    let mut keys = HashSet::new();
    let key_index = header.key_index();
    let mut line_no = 1u64;
    loop {
        line.clear();
        if reader.read_line(&mut line).map_err(|err| io_error(path, err))? == 0 {
            break;
        }
        line_no += 1;
        ends_with_newline = line.ends_with('\n');
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        let row = decode_row(text, header.columns.len()).map_err(|err| {
            err.with_message(format!("malformed row on line {line_no}"))
                .with_path(path)
        })?;
        if let Some(index) = key_index {
            keys.insert(row[index].clone());
        }
    }

    Ok((header, keys, !ends_with_newline))
}

fn io_error(path: &Path, err: io::Error) -> Error {
    let kind = match err.kind() {
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    };
    Error::new(kind).with_path(path).with_source(err)
}

fn lock_error(path: &Path, err: io::Error) -> Error {
    Error::new(lock_error_kind(&err))
        .with_message("failed to lock table file")
        .with_path(path)
        .with_source(err)
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return ErrorKind::Permission;
    }
    match err.kind() {
        io::ErrorKind::WouldBlock => ErrorKind::Busy,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}
