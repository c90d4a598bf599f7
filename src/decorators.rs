//! Row-level decorators with at most constant state.
//!
//! Each decorator owns exactly one inner cursor, forwards the calls it does
//! not care about, and propagates [`RowCursor::close`] to the inner cursor.

use std::collections::HashMap;

use log::debug;

use crate::{
    columns::{ColumnLookup, fold_name},
    cursor::{Position, RowCursor, check_ordinal, forward_columns},
    data::Value,
    error::{CursorError, Result},
    schema::ColumnType,
};

/// Callback evaluated against the current row.
pub type RowPredicate<'a> = Box<dyn FnMut(&dyn RowCursor) -> Result<bool> + 'a>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderState {
    HeaderCaptured,
    Streaming,
    Exhausted,
}

/// Promotes one row of the inner cursor to be the column names.
///
/// Rows before the header row are discarded when the cursor is opened. The
/// header row's values become the names verbatim (case preserved, duplicates
/// allowed) and every following row is passed through unchanged.
pub struct PromoteHeader<C> {
    inner: C,
    names: Vec<String>,
    lookup: ColumnLookup,
    state: HeaderState,
}

impl<C> PromoteHeader<C>
where
    C: RowCursor,
{
    /// `header_row` is 1-based: `1` promotes the first row.
    pub fn new(mut inner: C, header_row: usize) -> Result<Self> {
        if header_row == 0 {
            return Err(CursorError::InvalidArgument(
                "Header row numbers start at 1".to_string(),
            ));
        }
        let mut remaining = header_row - 1;
        let mut found = false;
        while inner.advance()? {
            if remaining == 0 {
                found = true;
                break;
            }
            remaining -= 1;
        }

        let (names, state) = if found {
            let names = (0..inner.field_count())
                .map(|ordinal| inner.value(ordinal).map(|value| value.as_display()))
                .collect::<Result<Vec<_>>>()?;
            debug!("Promoted row {header_row} to header: {names:?}");
            (names, HeaderState::HeaderCaptured)
        } else {
            debug!("Input ended before header row {header_row}");
            let names = (0..inner.field_count())
                .map(|ordinal| inner.name(ordinal).map(str::to_string))
                .collect::<Result<Vec<_>>>()?;
            (names, HeaderState::Exhausted)
        };
        let lookup = ColumnLookup::new(&names);
        Ok(Self {
            inner,
            names,
            lookup,
            state,
        })
    }
}

impl<C> RowCursor for PromoteHeader<C>
where
    C: RowCursor,
{
    fn advance(&mut self) -> Result<bool> {
        match self.state {
            HeaderState::Exhausted => Ok(false),
            HeaderState::HeaderCaptured | HeaderState::Streaming => {
                if self.inner.advance()? {
                    self.state = HeaderState::Streaming;
                    Ok(true)
                } else {
                    self.state = HeaderState::Exhausted;
                    Ok(false)
                }
            }
        }
    }

    fn field_count(&self) -> usize {
        self.names.len()
    }

    fn name(&self, ordinal: usize) -> Result<&str> {
        check_ordinal(ordinal, self.names.len())?;
        Ok(&self.names[ordinal])
    }

    fn declared_type(&self, ordinal: usize) -> Result<ColumnType> {
        self.inner.declared_type(ordinal)
    }

    fn value(&self, ordinal: usize) -> Result<Value> {
        if self.state != HeaderState::Streaming {
            return Err(CursorError::NotPositioned);
        }
        self.inner.value(ordinal)
    }

    fn ordinal(&self, name: &str) -> Option<usize> {
        self.lookup.find(name)
    }

    fn close(&mut self) -> Result<()> {
        self.state = HeaderState::Exhausted;
        self.inner.close()
    }
}

/// Renames columns through an alias dictionary; ordinals are unchanged.
pub struct Rename<C> {
    inner: C,
    names: Vec<String>,
    lookup: ColumnLookup,
}

impl<C> Rename<C>
where
    C: RowCursor,
{
    /// Keys are matched exactly first, then case-insensitively. Names without
    /// an alias pass through.
    pub fn new(inner: C, aliases: &HashMap<String, String>) -> Result<Self> {
        let folded = aliases
            .iter()
            .map(|(from, to)| (fold_name(from), to))
            .collect::<HashMap<_, _>>();
        let names = (0..inner.field_count())
            .map(|ordinal| {
                let name = inner.name(ordinal)?;
                let renamed = aliases
                    .get(name)
                    .or_else(|| folded.get(&fold_name(name)).copied())
                    .cloned()
                    .unwrap_or_else(|| name.to_string());
                Ok(renamed)
            })
            .collect::<Result<Vec<_>>>()?;
        let lookup = ColumnLookup::new(&names);
        Ok(Self {
            inner,
            names,
            lookup,
        })
    }
}

impl<C> RowCursor for Rename<C>
where
    C: RowCursor,
{
    fn advance(&mut self) -> Result<bool> {
        self.inner.advance()
    }

    fn field_count(&self) -> usize {
        self.names.len()
    }

    fn name(&self, ordinal: usize) -> Result<&str> {
        check_ordinal(ordinal, self.names.len())?;
        Ok(&self.names[ordinal])
    }

    fn declared_type(&self, ordinal: usize) -> Result<ColumnType> {
        self.inner.declared_type(ordinal)
    }

    fn value(&self, ordinal: usize) -> Result<Value> {
        self.inner.value(ordinal)
    }

    fn ordinal(&self, name: &str) -> Option<usize> {
        self.lookup.find(name)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

/// Skips rows that fail any of its predicates.
///
/// Holding several predicates in one decorator evaluates them in a single
/// pass per row instead of stacking one filter per predicate.
pub struct Filter<'a, C> {
    inner: C,
    predicates: Vec<RowPredicate<'a>>,
}

impl<'a, C> Filter<'a, C>
where
    C: RowCursor,
{
    pub fn new<F>(inner: C, predicate: F) -> Self
    where
        F: FnMut(&dyn RowCursor) -> Result<bool> + 'a,
    {
        Self::all(inner, vec![Box::new(predicate)])
    }

    pub fn all(inner: C, predicates: Vec<RowPredicate<'a>>) -> Self {
        Self { inner, predicates }
    }

    /// Adds another predicate to the same pass.
    pub fn and<F>(mut self, predicate: F) -> Self
    where
        F: FnMut(&dyn RowCursor) -> Result<bool> + 'a,
    {
        self.predicates.push(Box::new(predicate));
        self
    }

    fn accepts(&mut self) -> Result<bool> {
        for predicate in &mut self.predicates {
            if !predicate(&self.inner)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl<C> RowCursor for Filter<'_, C>
where
    C: RowCursor,
{
    fn advance(&mut self) -> Result<bool> {
        while self.inner.advance()? {
            if self.accepts()? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    forward_columns!(inner);

    fn value(&self, ordinal: usize) -> Result<Value> {
        self.inner.value(ordinal)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

/// Stops after `max` rows.
///
/// The inner cursor is not advanced past the last row returned, so a caller
/// that still owns it can continue from there.
pub struct Limit<C> {
    inner: C,
    max: u64,
    returned: u64,
    position: Position,
}

impl<C> Limit<C>
where
    C: RowCursor,
{
    pub fn new(inner: C, max: u64) -> Self {
        Self {
            inner,
            max,
            returned: 0,
            position: Position::BeforeFirst,
        }
    }

    pub fn returned(&self) -> u64 {
        self.returned
    }
}

impl<C> RowCursor for Limit<C>
where
    C: RowCursor,
{
    fn advance(&mut self) -> Result<bool> {
        if self.position == Position::Exhausted || self.returned >= self.max {
            return Ok(self.position.record(false));
        }
        let advanced = self.inner.advance()?;
        if advanced {
            self.returned += 1;
        }
        Ok(self.position.record(advanced))
    }

    forward_columns!(inner);

    fn value(&self, ordinal: usize) -> Result<Value> {
        if self.position == Position::Exhausted {
            return Err(CursorError::NotPositioned);
        }
        self.inner.value(ordinal)
    }

    fn close(&mut self) -> Result<()> {
        self.position = Position::Exhausted;
        self.inner.close()
    }
}

/// Makes the first `advance()` report a row that was already loaded.
pub struct WarmStart<C> {
    inner: C,
    pending: Option<bool>,
}

impl<C> WarmStart<C>
where
    C: RowCursor,
{
    /// Advances the inner cursor immediately.
    pub fn prime(mut inner: C) -> Result<Self> {
        let advanced = inner.advance()?;
        Ok(Self {
            inner,
            pending: Some(advanced),
        })
    }

    /// Wraps a cursor that the caller already advanced, with that advance's result.
    pub fn already_advanced(inner: C, advanced: bool) -> Self {
        Self {
            inner,
            pending: Some(advanced),
        }
    }
}

impl<C> RowCursor for WarmStart<C>
where
    C: RowCursor,
{
    fn advance(&mut self) -> Result<bool> {
        match self.pending.take() {
            Some(advanced) => Ok(advanced),
            None => self.inner.advance(),
        }
    }

    forward_columns!(inner);

    fn value(&self, ordinal: usize) -> Result<Value> {
        self.inner.value(ordinal)
    }

    fn close(&mut self) -> Result<()> {
        self.pending = Some(false);
        self.inner.close()
    }
}

/// Counts rows produced by the inner cursor.
pub struct Counting<C> {
    inner: C,
    rows: u64,
}

impl<C> Counting<C>
where
    C: RowCursor,
{
    pub fn new(inner: C) -> Self {
        Self { inner, rows: 0 }
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C> RowCursor for Counting<C>
where
    C: RowCursor,
{
    fn advance(&mut self) -> Result<bool> {
        let advanced = self.inner.advance()?;
        if advanced {
            self.rows += 1;
        }
        Ok(advanced)
    }

    forward_columns!(inner);

    fn value(&self, ordinal: usize) -> Result<Value> {
        self.inner.value(ordinal)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

/// Runs a side effect for every row.
pub struct Inspect<C, F> {
    inner: C,
    action: F,
}

impl<C, F> Inspect<C, F>
where
    C: RowCursor,
    F: FnMut(&dyn RowCursor) -> Result<()>,
{
    pub fn new(inner: C, action: F) -> Self {
        Self { inner, action }
    }
}

impl<C, F> RowCursor for Inspect<C, F>
where
    C: RowCursor,
    F: FnMut(&dyn RowCursor) -> Result<()>,
{
    fn advance(&mut self) -> Result<bool> {
        let advanced = self.inner.advance()?;
        if advanced {
            (self.action)(&self.inner)?;
        }
        Ok(advanced)
    }

    forward_columns!(inner);

    fn value(&self, ordinal: usize) -> Result<Value> {
        self.inner.value(ordinal)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

/// Reports progress every `every` rows and once more on the final row.
pub struct Notify<C, F> {
    inner: C,
    every: u64,
    rows: u64,
    last_notified: u64,
    finished: bool,
    callback: F,
}

impl<C, F> Notify<C, F>
where
    C: RowCursor,
    F: FnMut(u64),
{
    pub fn new(inner: C, every: u64, callback: F) -> Self {
        Self {
            inner,
            every: every.max(1),
            rows: 0,
            last_notified: 0,
            finished: false,
            callback,
        }
    }
}

impl<C, F> RowCursor for Notify<C, F>
where
    C: RowCursor,
    F: FnMut(u64),
{
    fn advance(&mut self) -> Result<bool> {
        let advanced = self.inner.advance()?;
        if advanced {
            self.rows += 1;
            if self.rows % self.every == 0 {
                self.last_notified = self.rows;
                (self.callback)(self.rows);
            }
        } else if !self.finished {
            self.finished = true;
            if self.rows > self.last_notified {
                self.last_notified = self.rows;
                (self.callback)(self.rows);
            }
        }
        Ok(advanced)
    }

    forward_columns!(inner);

    fn value(&self, ordinal: usize) -> Result<Value> {
        self.inner.value(ordinal)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::cursor::{
        collect_rows, drain,
        test_support::{CloseCounter, first_column, numbered, strings},
    };

    fn assert_close_reaches_inner<I, W, F>(inner: I, wrap: F)
    where
        I: RowCursor,
        W: RowCursor,
        F: FnOnce(CloseCounter<I>) -> Result<W>,
    {
        let (counter, closes) = CloseCounter::new(inner);
        let mut cursor = wrap(counter).unwrap();
        cursor.advance().unwrap();
        cursor.close().unwrap();
        assert_eq!(closes.get(), 1);
        assert!(!cursor.advance().unwrap());
    }

    #[test]
    fn promote_header_adopts_the_configured_row() {
        let mut rows = vec![vec!["x", "y", "z"], vec!["Header1", "Header2", "Header3"]];
        rows.extend((1..=100).map(|_| vec!["1", "2", "3"]));
        let inner = strings(&["c0", "c1", "c2"], rows);
        let mut cursor = PromoteHeader::new(inner, 2).expect("promote");
        assert_eq!(cursor.name(0).unwrap(), "Header1");
        assert_eq!(cursor.ordinal("header3"), Some(2));
        assert!(matches!(cursor.value(0), Err(CursorError::NotPositioned)));
        assert_eq!(drain(&mut cursor).unwrap(), 100);
    }

    #[test]
    fn promote_header_past_end_yields_no_rows() {
        let inner = strings(&["a"], vec![vec!["only"]]);
        let mut cursor = PromoteHeader::new(inner, 3).unwrap();
        assert_eq!(cursor.name(0).unwrap(), "a");
        assert!(!cursor.advance().unwrap());
    }

    #[test]
    fn promote_header_rejects_row_zero() {
        let inner = strings(&["a"], vec![]);
        assert!(PromoteHeader::new(inner, 0).is_err());
    }

    #[test]
    fn rename_changes_names_only() {
        let aliases = HashMap::from([("A".to_string(), "alpha".to_string())]);
        let mut cursor = Rename::new(numbered(&["a", "b"], 1), &aliases).unwrap();
        assert_eq!(cursor.name(0).unwrap(), "alpha");
        assert_eq!(cursor.name(1).unwrap(), "b");
        cursor.advance().unwrap();
        assert_eq!(cursor.value_by_name("alpha").unwrap(), Value::Integer(10));
        assert_eq!(cursor.ordinal("a"), None);
    }

    #[test]
    fn filter_applies_every_predicate_in_one_pass() {
        let calls = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&calls);
        let mut cursor = Filter::new(numbered(&["n"], 10), move |row| {
            *counter.borrow_mut() += 1;
            Ok(matches!(row.value(0)?, Value::Integer(n) if n % 20 == 0))
        })
        .and(|row| Ok(matches!(row.value(0)?, Value::Integer(n) if n > 40)));
        let rows = collect_rows(&mut cursor).unwrap();
        assert_eq!(
            first_column(&rows),
            vec![Value::Integer(60), Value::Integer(80), Value::Integer(100)]
        );
        assert_eq!(*calls.borrow(), 10);
    }

    #[test]
    fn filter_propagates_predicate_errors() {
        let mut cursor = Filter::new(numbered(&["n"], 3), |row| {
            row.value_by_name("missing").map(|_| true)
        });
        assert!(matches!(
            cursor.advance(),
            Err(CursorError::UnknownColumn(_))
        ));
    }

    #[test]
    fn limit_stops_without_advancing_inner() {
        let mut inner = Counting::new(numbered(&["n"], 10));
        {
            let mut limited = Limit::new(&mut inner, 3);
            assert_eq!(drain(&mut limited).unwrap(), 3);
            assert!(!limited.advance().unwrap());
            assert!(matches!(limited.value(0), Err(CursorError::NotPositioned)));
        }
        assert_eq!(inner.rows(), 3);
        assert_eq!(inner.value(0).unwrap(), Value::Integer(30));
    }

    #[test]
    fn warm_start_reports_preloaded_row_once() {
        let mut cursor = WarmStart::prime(numbered(&["n"], 2)).unwrap();
        assert_eq!(cursor.value(0).unwrap(), Value::Integer(10));
        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.value(0).unwrap(), Value::Integer(10));
        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.value(0).unwrap(), Value::Integer(20));
        assert!(!cursor.advance().unwrap());
    }

    #[test]
    fn warm_start_on_empty_input_reports_end() {
        let mut cursor = WarmStart::prime(numbered(&["n"], 0)).unwrap();
        assert!(!cursor.advance().unwrap());
    }

    #[test]
    fn inspect_sees_every_row() {
        let mut seen = Vec::new();
        {
            let mut cursor = Inspect::new(numbered(&["n"], 3), |row| {
                seen.push(row.value(0)?);
                Ok(())
            });
            drain(&mut cursor).unwrap();
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn notify_fires_on_interval_and_final_row() {
        let mut ticks = Vec::new();
        {
            let mut cursor = Notify::new(numbered(&["n"], 7), 3, |rows| ticks.push(rows));
            drain(&mut cursor).unwrap();
            cursor.advance().unwrap();
        }
        assert_eq!(ticks, vec![3, 6, 7]);
    }

    #[test]
    fn notify_does_not_repeat_when_final_row_is_on_interval() {
        let mut ticks = Vec::new();
        {
            let mut cursor = Notify::new(numbered(&["n"], 6), 3, |rows| ticks.push(rows));
            drain(&mut cursor).unwrap();
        }
        assert_eq!(ticks, vec![3, 6]);
    }

    #[test]
    fn close_reaches_the_wrapped_cursor() {
        let headed = || strings(&["c0"], vec![vec!["h"], vec!["1"], vec!["2"]]);
        assert_close_reaches_inner(headed(), |inner| PromoteHeader::new(inner, 1));
        let aliases = HashMap::from([("n".to_string(), "number".to_string())]);
        assert_close_reaches_inner(numbered(&["n"], 3), |inner| Rename::new(inner, &aliases));
        assert_close_reaches_inner(numbered(&["n"], 3), |inner| {
            Ok(Filter::new(inner, |_| Ok(true)))
        });
        assert_close_reaches_inner(numbered(&["n"], 3), |inner| Ok(Limit::new(inner, 2)));
        assert_close_reaches_inner(numbered(&["n"], 3), WarmStart::prime);
        assert_close_reaches_inner(numbered(&["n"], 3), |inner| Ok(Counting::new(inner)));
        assert_close_reaches_inner(numbered(&["n"], 3), |inner| {
            Ok(Inspect::new(inner, |_| Ok(())))
        });
        assert_close_reaches_inner(numbered(&["n"], 3), |inner| {
            Ok(Notify::new(inner, 1, |_| {}))
        });
    }
}
