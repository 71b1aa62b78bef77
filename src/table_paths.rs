//! Purpose: Shared table-directory and table-name path resolution helpers.
//! Exports: `default_table_dir`, `resolve_table_path`, `TABLE_EXTENSION`.
//! Role: Keep CLI and file-store path semantics aligned from one source.
//! Invariants: Default table directory is `$ROWSTREAM_DIR`, else `~/.rowstream/tables`.
//! Invariants: Table names are identifiers so queries can name them unquoted.

use std::path::{Path, PathBuf};

pub const TABLE_EXTENSION: &str = "rows";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TableNameResolveError {
    Empty,
    NotIdentifier,
}

pub fn default_table_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("ROWSTREAM_DIR") {
        return PathBuf::from(dir);
    }
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".rowstream").join("tables")
}

pub fn resolve_table_path(name: &str, table_dir: &Path) -> Result<PathBuf, TableNameResolveError> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(TableNameResolveError::Empty);
    };
    if !(first.is_ascii_alphabetic() || first == '_')
        || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(TableNameResolveError::NotIdentifier);
    }
    Ok(table_dir.join(format!("{name}.{TABLE_EXTENSION}")))
}
