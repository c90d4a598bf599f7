#![allow(dead_code)]

use std::cell::Cell;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tabflow::cursor::{IterCursor, RowCursor};
use tabflow::data::Value;
use tabflow::error::Result;
use tabflow::schema::{ColumnType, describe_columns};
use tempfile::{TempDir, tempdir};

pub type RowsCursor = IterCursor<std::vec::IntoIter<Vec<Value>>>;

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Writes a CSV of `rows` numbered rows under `header`; column `c` of row
    /// `r` holds `r` for the first column and `r-c` after that.
    pub fn numbered_csv(&self, name: &str, header: &[&str], rows: usize) -> PathBuf {
        let mut contents = header.join(",");
        contents.push('\n');
        for r in 1..=rows {
            let line = (0..header.len())
                .map(|c| if c == 0 { r.to_string() } else { format!("{r}-{c}") })
                .collect::<Vec<_>>()
                .join(",");
            contents.push_str(&line);
            contents.push('\n');
        }
        self.write(name, &contents)
    }
}

/// In-memory cursor of integer rows; cell `(r, c)` is `r * 10 + c` with `r` 1-based.
pub fn numbered_cursor(names: &[&str], rows: usize) -> RowsCursor {
    let columns = describe_columns(names.iter().map(|n| (*n, ColumnType::Integer)));
    let data = (1..=rows)
        .map(|r| {
            (0..names.len())
                .map(|c| Value::Integer((r * 10 + c) as i64))
                .collect()
        })
        .collect::<Vec<_>>();
    IterCursor::new(columns, data)
}

/// In-memory cursor of string rows.
pub fn string_cursor(names: &[&str], rows: Vec<Vec<&str>>) -> RowsCursor {
    let columns = describe_columns(names.iter().map(|n| (*n, ColumnType::String)));
    let data = rows
        .into_iter()
        .map(|row| row.into_iter().map(Value::from).collect())
        .collect::<Vec<_>>();
    IterCursor::new(columns, data)
}

/// Cursor wrapper that counts the `close` calls reaching it.
pub struct CloseTracker<C> {
    inner: C,
    closes: Rc<Cell<usize>>,
}

impl<C: RowCursor> CloseTracker<C> {
    pub fn new(inner: C) -> (Self, Rc<Cell<usize>>) {
        let closes = Rc::new(Cell::new(0));
        let tracker = Self {
            inner,
            closes: Rc::clone(&closes),
        };
        (tracker, closes)
    }
}

impl<C: RowCursor> RowCursor for CloseTracker<C> {
    fn advance(&mut self) -> Result<bool> {
        self.inner.advance()
    }

    fn field_count(&self) -> usize {
        self.inner.field_count()
    }

    fn name(&self, ordinal: usize) -> Result<&str> {
        self.inner.name(ordinal)
    }

    fn declared_type(&self, ordinal: usize) -> Result<ColumnType> {
        self.inner.declared_type(ordinal)
    }

    fn value(&self, ordinal: usize) -> Result<Value> {
        self.inner.value(ordinal)
    }

    fn ordinal(&self, name: &str) -> Option<usize> {
        self.inner.ordinal(name)
    }

    fn close(&mut self) -> Result<()> {
        self.closes.set(self.closes.get() + 1);
        self.inner.close()
    }
}
