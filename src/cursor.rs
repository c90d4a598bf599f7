//! The forward-only row cursor contract every pipeline layer implements.
//!
//! A cursor exposes one current row at a time. [`RowCursor::advance`] moves
//! to the next row and returns `false` once the stream is exhausted; it keeps
//! returning `false` after that. Values may only be read while the cursor is
//! positioned on a row, i.e. between an `advance()` that returned `true` and
//! the next call to `advance()`. Column names and declared types are fixed
//! when a cursor is constructed and can be inspected at any time.
//!
//! Decorators own the cursor they wrap. Dropping a decorator drops the inner
//! cursor, which releases it on every exit path including early returns and
//! unwinding; [`RowCursor::close`] is the explicit, error-reporting form of
//! the same release and is propagated down the chain.

use crate::{
    columns::ColumnLookup,
    data::Value,
    error::{CursorError, Result},
    schema::{ColumnDescriptor, ColumnType},
};

pub trait RowCursor {
    /// Moves to the next row. Returns `false` at end of stream.
    fn advance(&mut self) -> Result<bool>;

    fn field_count(&self) -> usize;

    fn name(&self, ordinal: usize) -> Result<&str>;

    fn declared_type(&self, ordinal: usize) -> Result<ColumnType>;

    /// Value of the current row at `ordinal`.
    fn value(&self, ordinal: usize) -> Result<Value>;

    /// Resolves a column name to its ordinal (exact first, then case-insensitive).
    fn ordinal(&self, name: &str) -> Option<usize>;

    /// Releases the cursor and everything it wraps. Idempotent.
    fn close(&mut self) -> Result<()>;

    fn value_by_name(&self, name: &str) -> Result<Value> {
        let ordinal = self
            .ordinal(name)
            .ok_or_else(|| CursorError::UnknownColumn(name.to_string()))?;
        self.value(ordinal)
    }

    fn columns(&self) -> Result<Vec<ColumnDescriptor>> {
        (0..self.field_count())
            .map(|ordinal| {
                Ok(ColumnDescriptor::new(
                    self.name(ordinal)?,
                    ordinal,
                    self.declared_type(ordinal)?,
                ))
            })
            .collect()
    }
}

pub type BoxCursor<'a> = Box<dyn RowCursor + 'a>;

impl<C> RowCursor for Box<C>
where
    C: RowCursor + ?Sized,
{
    fn advance(&mut self) -> Result<bool> {
        (**self).advance()
    }

    fn field_count(&self) -> usize {
        (**self).field_count()
    }

    fn name(&self, ordinal: usize) -> Result<&str> {
        (**self).name(ordinal)
    }

    fn declared_type(&self, ordinal: usize) -> Result<ColumnType> {
        (**self).declared_type(ordinal)
    }

    fn value(&self, ordinal: usize) -> Result<Value> {
        (**self).value(ordinal)
    }

    fn ordinal(&self, name: &str) -> Option<usize> {
        (**self).ordinal(name)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// A borrowed cursor can be driven but not closed; the owner keeps that right.
impl<C> RowCursor for &mut C
where
    C: RowCursor + ?Sized,
{
    fn advance(&mut self) -> Result<bool> {
        (**self).advance()
    }

    fn field_count(&self) -> usize {
        (**self).field_count()
    }

    fn name(&self, ordinal: usize) -> Result<&str> {
        (**self).name(ordinal)
    }

    fn declared_type(&self, ordinal: usize) -> Result<ColumnType> {
        (**self).declared_type(ordinal)
    }

    fn value(&self, ordinal: usize) -> Result<Value> {
        (**self).value(ordinal)
    }

    fn ordinal(&self, name: &str) -> Option<usize> {
        (**self).ordinal(name)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Forwards the column-description half of [`RowCursor`] to a wrapped cursor field.
macro_rules! forward_columns {
    ($field:ident) => {
        fn field_count(&self) -> usize {
            self.$field.field_count()
        }

        fn name(&self, ordinal: usize) -> $crate::error::Result<&str> {
            self.$field.name(ordinal)
        }

        fn declared_type(
            &self,
            ordinal: usize,
        ) -> $crate::error::Result<$crate::schema::ColumnType> {
            self.$field.declared_type(ordinal)
        }

        fn ordinal(&self, name: &str) -> Option<usize> {
            self.$field.ordinal(name)
        }
    };
}

pub(crate) use forward_columns;

/// Where a cursor sits relative to its rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Position {
    #[default]
    BeforeFirst,
    OnRow,
    Exhausted,
}

impl Position {
    pub fn ensure_row(self) -> Result<()> {
        match self {
            Position::OnRow => Ok(()),
            _ => Err(CursorError::NotPositioned),
        }
    }

    /// Records the outcome of an advance and passes it through.
    pub fn record(&mut self, advanced: bool) -> bool {
        *self = if advanced {
            Position::OnRow
        } else {
            Position::Exhausted
        };
        advanced
    }
}

pub fn check_ordinal(ordinal: usize, count: usize) -> Result<()> {
    if ordinal < count {
        Ok(())
    } else {
        Err(CursorError::OrdinalOutOfRange { ordinal, count })
    }
}

/// Reads every column of the current row.
pub fn read_row(cursor: &dyn RowCursor) -> Result<Vec<Value>> {
    (0..cursor.field_count())
        .map(|ordinal| cursor.value(ordinal))
        .collect()
}

/// Drains a cursor into memory. Intended for small result sets and tests.
pub fn collect_rows<C>(cursor: &mut C) -> Result<Vec<Vec<Value>>>
where
    C: RowCursor + ?Sized,
{
    let mut rows = Vec::new();
    while cursor.advance()? {
        rows.push(
            (0..cursor.field_count())
                .map(|ordinal| cursor.value(ordinal))
                .collect::<Result<Vec<_>>>()?,
        );
    }
    Ok(rows)
}

/// Advances through the remaining rows without reading them.
pub fn drain<C>(cursor: &mut C) -> Result<u64>
where
    C: RowCursor + ?Sized,
{
    let mut rows = 0u64;
    while cursor.advance()? {
        rows += 1;
    }
    Ok(rows)
}

/// Cursor over any iterator of rows with a fixed column list.
///
/// Rows shorter than the column list read as [`Value::Null`] in the missing
/// positions; extra values are ignored.
pub struct IterCursor<I> {
    columns: Vec<ColumnDescriptor>,
    lookup: ColumnLookup,
    rows: Option<I>,
    current: Option<Vec<Value>>,
    position: Position,
}

impl<I> IterCursor<I>
where
    I: Iterator<Item = Vec<Value>>,
{
    pub fn new<R>(columns: Vec<ColumnDescriptor>, rows: R) -> Self
    where
        R: IntoIterator<IntoIter = I>,
    {
        let lookup = ColumnLookup::new(columns.iter().map(|c| c.name.as_str()));
        Self {
            columns,
            lookup,
            rows: Some(rows.into_iter()),
            current: None,
            position: Position::BeforeFirst,
        }
    }
}

impl<I> std::fmt::Debug for IterCursor<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterCursor")
            .field("columns", &self.columns)
            .field("position", &self.position)
            .finish()
    }
}

impl<I> RowCursor for IterCursor<I>
where
    I: Iterator<Item = Vec<Value>>,
{
    fn advance(&mut self) -> Result<bool> {
        if self.position == Position::Exhausted {
            return Ok(false);
        }
        self.current = self.rows.as_mut().and_then(|rows| rows.next());
        Ok(self.position.record(self.current.is_some()))
    }

    fn field_count(&self) -> usize {
        self.columns.len()
    }

    fn name(&self, ordinal: usize) -> Result<&str> {
        check_ordinal(ordinal, self.columns.len())?;
        Ok(&self.columns[ordinal].name)
    }

    fn declared_type(&self, ordinal: usize) -> Result<ColumnType> {
        check_ordinal(ordinal, self.columns.len())?;
        Ok(self.columns[ordinal].datatype.clone())
    }

    fn value(&self, ordinal: usize) -> Result<Value> {
        self.position.ensure_row()?;
        check_ordinal(ordinal, self.columns.len())?;
        Ok(self
            .current
            .as_ref()
            .and_then(|row| row.get(ordinal))
            .cloned()
            .unwrap_or_default())
    }

    fn ordinal(&self, name: &str) -> Option<usize> {
        self.lookup.find(name)
    }

    fn close(&mut self) -> Result<()> {
        self.rows = None;
        self.current = None;
        self.position = Position::Exhausted;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn reading_before_first_advance_is_misuse() {
        let cursor = numbered(&["a"], 1);
        assert!(matches!(cursor.value(0), Err(CursorError::NotPositioned)));
    }

    #[test]
    fn advance_is_idempotent_after_end() {
        let mut cursor = numbered(&["a"], 1);
        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.value(0).unwrap(), Value::Integer(10));
        assert!(!cursor.advance().unwrap());
        assert!(!cursor.advance().unwrap());
        assert!(matches!(cursor.value(0), Err(CursorError::NotPositioned)));
    }

    #[test]
    fn value_by_name_is_case_insensitive() {
        let mut cursor = numbered(&["Alpha", "Beta"], 1);
        cursor.advance().unwrap();
        assert_eq!(cursor.value_by_name("beta").unwrap(), Value::Integer(11));
        assert!(matches!(
            cursor.value_by_name("gamma"),
            Err(CursorError::UnknownColumn(_))
        ));
    }

    #[test]
    fn out_of_range_ordinal_is_reported() {
        let mut cursor = numbered(&["a"], 1);
        cursor.advance().unwrap();
        assert!(matches!(
            cursor.value(3),
            Err(CursorError::OrdinalOutOfRange { ordinal: 3, count: 1 })
        ));
    }

    #[test]
    fn short_rows_pad_with_null() {
        let mut cursor = strings(&["a", "b"], vec![vec!["x"]]);
        cursor.advance().unwrap();
        assert_eq!(read_row(&cursor).unwrap(), vec![Value::from("x"), Value::Null]);
    }

    #[test]
    fn close_ends_the_stream() {
        let mut cursor = numbered(&["a"], 3);
        cursor.advance().unwrap();
        cursor.close().unwrap();
        assert!(!cursor.advance().unwrap());
    }

    #[test]
    fn borrowed_cursor_close_does_not_release_owner() {
        fn advance_and_close<C: RowCursor>(mut cursor: C) {
            cursor.advance().unwrap();
            cursor.close().unwrap();
        }

        let mut owner = numbered(&["a"], 2);
        advance_and_close(&mut owner);
        assert!(owner.advance().unwrap());
        assert_eq!(owner.value(0).unwrap(), Value::Integer(20));
    }

    #[test]
    fn columns_reports_descriptors() {
        let cursor = numbered(&["a", "b"], 0);
        let columns = cursor.columns().unwrap();
        assert_eq!(columns[1].name, "b");
        assert_eq!(columns[1].ordinal, 1);
        assert_eq!(columns[1].datatype, ColumnType::Integer);
    }
}
