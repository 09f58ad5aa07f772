//! SQLite connections for collection files.
//!
//! Each collection lives in its own database file. A file the current user
//! cannot write is opened read-only instead of failing.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::io::ErrorKind;
use std::path::Path;

/// Whether the file at `path` may be opened for writing.
///
/// Only a permission error degrades to read-only; a missing file counts as
/// writable so it can be created.
pub fn is_writable(path: &Path) -> bool {
    match std::fs::OpenOptions::new().write(true).open(path) {
        Ok(_) => true,
        Err(e) => e.kind() != ErrorKind::PermissionDenied,
    }
}

pub async fn connect(path: &Path, read_only: bool, create: bool) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create && !read_only)
        .read_only(read_only);

    SqlitePoolOptions::new()
        .max_connections(if read_only { 4 } else { 2 })
        .connect_with(options)
        .await
}
