//! Decorators that reconcile column lists: concatenation and duplicate removal.

use std::collections::HashSet;

use log::debug;

use crate::{
    columns::{ColumnLookup, fold_name},
    cursor::{BoxCursor, Position, RowCursor, check_ordinal},
    data::Value,
    error::{CursorError, Result},
    schema::ColumnType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    First,
    Second,
    Done,
}

/// Streams every row of `first`, then every row of `second`, under the first
/// cursor's column list.
///
/// Columns of `second` are matched to the union columns by case-insensitive
/// name; union columns with no counterpart in `second` read as null for its
/// rows. No rows are deduplicated.
pub struct Union<A, B> {
    first: A,
    second: B,
    names: Vec<String>,
    types: Vec<ColumnType>,
    lookup: ColumnLookup,
    second_ordinals: Vec<Option<usize>>,
    phase: Phase,
    position: Position,
}

impl<A, B> Union<A, B>
where
    A: RowCursor,
    B: RowCursor,
{
    pub fn new(first: A, second: B) -> Result<Self> {
        let names = (0..first.field_count())
            .map(|ordinal| first.name(ordinal).map(str::to_string))
            .collect::<Result<Vec<_>>>()?;
        let types = (0..first.field_count())
            .map(|ordinal| first.declared_type(ordinal))
            .collect::<Result<Vec<_>>>()?;
        let second_names = (0..second.field_count())
            .map(|ordinal| second.name(ordinal).map(str::to_string))
            .collect::<Result<Vec<_>>>()?;
        let second_lookup = ColumnLookup::new(&second_names);
        let second_ordinals = names
            .iter()
            .map(|name| second_lookup.find_folded(name))
            .collect::<Vec<_>>();
        let missing = second_ordinals.iter().filter(|o| o.is_none()).count();
        if missing > 0 {
            debug!("{missing} union column(s) have no match in the appended cursor");
        }
        let lookup = ColumnLookup::new(&names);
        Ok(Self {
            first,
            second,
            names,
            types,
            lookup,
            second_ordinals,
            phase: Phase::First,
            position: Position::BeforeFirst,
        })
    }
}

impl<A, B> RowCursor for Union<A, B>
where
    A: RowCursor,
    B: RowCursor,
{
    fn advance(&mut self) -> Result<bool> {
        if self.phase == Phase::First {
            if self.first.advance()? {
                return Ok(self.position.record(true));
            }
            self.first.close()?;
            self.phase = Phase::Second;
        }
        if self.phase == Phase::Second {
            if self.second.advance()? {
                return Ok(self.position.record(true));
            }
            self.second.close()?;
            self.phase = Phase::Done;
        }
        Ok(self.position.record(false))
    }

    fn field_count(&self) -> usize {
        self.names.len()
    }

    fn name(&self, ordinal: usize) -> Result<&str> {
        check_ordinal(ordinal, self.names.len())?;
        Ok(&self.names[ordinal])
    }

    fn declared_type(&self, ordinal: usize) -> Result<ColumnType> {
        check_ordinal(ordinal, self.types.len())?;
        Ok(self.types[ordinal].clone())
    }

    fn value(&self, ordinal: usize) -> Result<Value> {
        self.position.ensure_row()?;
        check_ordinal(ordinal, self.names.len())?;
        match self.phase {
            Phase::First => self.first.value(ordinal),
            Phase::Second => match self.second_ordinals[ordinal] {
                Some(mapped) => self.second.value(mapped),
                None => Ok(Value::Null),
            },
            Phase::Done => Err(CursorError::NotPositioned),
        }
    }

    fn ordinal(&self, name: &str) -> Option<usize> {
        self.lookup.find(name)
    }

    fn close(&mut self) -> Result<()> {
        self.phase = Phase::Done;
        self.position = Position::Exhausted;
        let first = self.first.close();
        let second = self.second.close();
        first.and(second)
    }
}

/// Concatenates any number of cursors under the first one's column list.
pub fn concat<'a>(cursors: Vec<BoxCursor<'a>>) -> Result<BoxCursor<'a>> {
    let mut cursors = cursors.into_iter();
    let first = cursors.next().ok_or_else(|| {
        CursorError::InvalidArgument("At least one cursor is required to concatenate".to_string())
    })?;
    cursors.try_fold(first, |joined, next| {
        Ok(Box::new(Union::new(joined, next)?) as BoxCursor<'a>)
    })
}

/// Hides later columns whose name (case-insensitively) repeats an earlier one.
///
/// Each exposed column reads from the first inner ordinal that carried its
/// name.
pub struct DistinctColumns<C> {
    inner: C,
    kept: Vec<usize>,
    names: Vec<String>,
    lookup: ColumnLookup,
}

impl<C> DistinctColumns<C>
where
    C: RowCursor,
{
    pub fn new(inner: C) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        let mut names = Vec::new();
        for ordinal in 0..inner.field_count() {
            let name = inner.name(ordinal)?;
            if seen.insert(fold_name(name)) {
                kept.push(ordinal);
                names.push(name.to_string());
            }
        }
        let dropped = inner.field_count() - kept.len();
        if dropped > 0 {
            debug!("Dropped {dropped} duplicate column(s)");
        }
        let lookup = ColumnLookup::new(&names);
        Ok(Self {
            inner,
            kept,
            names,
            lookup,
        })
    }
}

impl<C> RowCursor for DistinctColumns<C>
where
    C: RowCursor,
{
    fn advance(&mut self) -> Result<bool> {
        self.inner.advance()
    }

    fn field_count(&self) -> usize {
        self.kept.len()
    }

    fn name(&self, ordinal: usize) -> Result<&str> {
        check_ordinal(ordinal, self.names.len())?;
        Ok(&self.names[ordinal])
    }

    fn declared_type(&self, ordinal: usize) -> Result<ColumnType> {
        check_ordinal(ordinal, self.kept.len())?;
        self.inner.declared_type(self.kept[ordinal])
    }

    fn value(&self, ordinal: usize) -> Result<Value> {
        check_ordinal(ordinal, self.kept.len())?;
        self.inner.value(self.kept[ordinal])
    }

    fn ordinal(&self, name: &str) -> Option<usize> {
        self.lookup.find(name)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}
