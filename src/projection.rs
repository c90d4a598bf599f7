//! Column-shaping decorators: projection, appended computed columns, and
//! per-column value replacement.
//!
//! Computed values are evaluated when a column is read, not when the cursor
//! advances, so unread columns cost nothing.

use log::debug;

use crate::{
    columns::ColumnLookup,
    cursor::{Position, RowCursor, check_ordinal},
    data::Value,
    error::{CursorError, Result},
    schema::ColumnType,
    transform::TransformGroup,
};

/// Computes a value from the current row of the wrapped cursor.
pub type RowFn<'a> = Box<dyn Fn(&dyn RowCursor) -> Result<Value> + 'a>;

/// Addresses an existing column by name or ordinal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRef {
    Name(String),
    Ordinal(usize),
}

impl ColumnRef {
    pub fn resolve(&self, cursor: &dyn RowCursor) -> Result<usize> {
        match self {
            ColumnRef::Name(name) => cursor
                .ordinal(name)
                .ok_or_else(|| CursorError::UnknownColumn(name.clone())),
            ColumnRef::Ordinal(ordinal) => {
                check_ordinal(*ordinal, cursor.field_count())?;
                Ok(*ordinal)
            }
        }
    }
}

impl From<&str> for ColumnRef {
    fn from(value: &str) -> Self {
        ColumnRef::Name(value.to_string())
    }
}

impl From<String> for ColumnRef {
    fn from(value: String) -> Self {
        ColumnRef::Name(value)
    }
}

impl From<usize> for ColumnRef {
    fn from(value: usize) -> Self {
        ColumnRef::Ordinal(value)
    }
}

/// A named column whose value is computed from the current row.
pub struct ComputedColumn<'a> {
    pub name: String,
    pub datatype: ColumnType,
    compute: RowFn<'a>,
}

impl<'a> ComputedColumn<'a> {
    pub fn new<F>(name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&dyn RowCursor) -> Result<Value> + 'a,
    {
        Self {
            name: name.into(),
            datatype: ColumnType::String,
            compute: Box::new(compute),
        }
    }

    pub fn with_type(mut self, datatype: ColumnType) -> Self {
        self.datatype = datatype;
        self
    }
}

/// One output column of a [`Project`].
pub enum Projection<'a> {
    Column(ColumnRef),
    Computed(ComputedColumn<'a>),
}

impl<'a> Projection<'a> {
    pub fn column(column: impl Into<ColumnRef>) -> Self {
        Projection::Column(column.into())
    }

    pub fn computed<F>(name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&dyn RowCursor) -> Result<Value> + 'a,
    {
        Projection::Computed(ComputedColumn::new(name, compute))
    }
}

enum Slot<'a> {
    Source(usize),
    Computed(RowFn<'a>),
}

struct ProjectedColumn<'a> {
    name: String,
    datatype: ColumnType,
    slot: Slot<'a>,
}

/// Re-exposes a cursor through a new column list.
pub struct Project<'a, C> {
    inner: C,
    columns: Vec<ProjectedColumn<'a>>,
    lookup: ColumnLookup,
    position: Position,
}

impl<'a, C> Project<'a, C>
where
    C: RowCursor,
{
    pub fn new(inner: C, projections: Vec<Projection<'a>>) -> Result<Self> {
        let columns = projections
            .into_iter()
            .map(|projection| match projection {
                Projection::Column(column) => {
                    let ordinal = column.resolve(&inner)?;
                    Ok(ProjectedColumn {
                        name: inner.name(ordinal)?.to_string(),
                        datatype: inner.declared_type(ordinal)?,
                        slot: Slot::Source(ordinal),
                    })
                }
                Projection::Computed(computed) => Ok(ProjectedColumn {
                    name: computed.name,
                    datatype: computed.datatype,
                    slot: Slot::Computed(computed.compute),
                }),
            })
            .collect::<Result<Vec<_>>>()?;
        let lookup = ColumnLookup::new(columns.iter().map(|c| c.name.as_str()));
        debug!(
            "Projected {} column(s) over {} source column(s)",
            columns.len(),
            inner.field_count()
        );
        Ok(Self {
            inner,
            columns,
            lookup,
            position: Position::BeforeFirst,
        })
    }

    /// Keeps only the named columns, in the given order.
    pub fn select<S>(inner: C, names: &[S]) -> Result<Self>
    where
        S: AsRef<str>,
    {
        let projections = names
            .iter()
            .map(|name| Projection::column(name.as_ref()))
            .collect();
        Self::new(inner, projections)
    }

    /// Exposes only computed columns.
    pub fn computed(inner: C, computed: Vec<ComputedColumn<'a>>) -> Result<Self> {
        Self::new(inner, computed.into_iter().map(Projection::Computed).collect())
    }

    /// Keeps every existing column and appends computed ones after them.
    pub fn append(inner: C, computed: Vec<ComputedColumn<'a>>) -> Result<Self> {
        let mut projections = (0..inner.field_count())
            .map(|ordinal| Projection::column(ordinal))
            .collect::<Vec<_>>();
        projections.extend(computed.into_iter().map(Projection::Computed));
        Self::new(inner, projections)
    }
}

impl<C> RowCursor for Project<'_, C>
where
    C: RowCursor,
{
    fn advance(&mut self) -> Result<bool> {
        let advanced = self.inner.advance()?;
        Ok(self.position.record(advanced))
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
        match &self.columns[ordinal].slot {
            Slot::Source(source) => self.inner.value(*source),
            Slot::Computed(compute) => compute(&self.inner),
        }
    }

    fn ordinal(&self, name: &str) -> Option<usize> {
        self.lookup.find(name)
    }

    fn close(&mut self) -> Result<()> {
        self.position = Position::Exhausted;
        self.inner.close()
    }
}

struct Override<'a> {
    compute: RowFn<'a>,
    datatype: Option<ColumnType>,
}

/// Replaces the values of selected columns; the column list is unchanged.
pub struct TransformColumns<'a, C> {
    inner: C,
    overrides: Vec<Option<Override<'a>>>,
}

impl<'a, C> TransformColumns<'a, C>
where
    C: RowCursor,
{
    pub fn new(inner: C) -> Self {
        let overrides = (0..inner.field_count()).map(|_| None).collect();
        Self { inner, overrides }
    }

    /// Replaces `column` with a value computed from the whole row.
    pub fn replace<F>(self, column: impl Into<ColumnRef>, compute: F) -> Result<Self>
    where
        F: Fn(&dyn RowCursor) -> Result<Value> + 'a,
    {
        self.install(column.into(), Box::new(compute), None)
    }

    /// Replaces `column` with a function of its own value.
    pub fn map_value<F>(self, column: impl Into<ColumnRef>, map: F) -> Result<Self>
    where
        F: Fn(Value) -> Result<Value> + 'a,
    {
        let column = column.into();
        let ordinal = column.resolve(&self.inner)?;
        self.install(
            column,
            Box::new(move |row: &dyn RowCursor| map(row.value(ordinal)?)),
            None,
        )
    }

    /// Coerces `column` to `target` through the conversion registered in `group`.
    ///
    /// Columns for which the group has no conversion pass through unchanged.
    pub fn coerce(
        self,
        column: impl Into<ColumnRef>,
        group: &TransformGroup,
        target: ColumnType,
    ) -> Result<Self> {
        let column = column.into();
        let ordinal = column.resolve(&self.inner)?;
        let source_type = self.inner.declared_type(ordinal)?;
        let Some(converter) = group.converter(&target, Some(&source_type)) else {
            debug!(
                "Group '{}' has no conversion to {target}; column {ordinal} passes through",
                group.name()
            );
            return Ok(self);
        };
        let name = self.inner.name(ordinal)?.to_string();
        let declared = target.clone();
        self.install(
            column,
            Box::new(move |row: &dyn RowCursor| {
                let raw = row.value(ordinal)?;
                converter
                    .convert(&raw, &target)
                    .map_err(|source| CursorError::Coercion {
                        ordinal,
                        column: name.clone(),
                        value: raw.as_display(),
                        target: target.to_string(),
                        source,
                    })
            }),
            Some(declared),
        )
    }

    fn install(
        mut self,
        column: ColumnRef,
        compute: RowFn<'a>,
        datatype: Option<ColumnType>,
    ) -> Result<Self> {
        let ordinal = column.resolve(&self.inner)?;
        self.overrides[ordinal] = Some(Override { compute, datatype });
        Ok(self)
    }
}

impl<C> RowCursor for TransformColumns<'_, C>
where
    C: RowCursor,
{
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
        match self.overrides.get(ordinal) {
            Some(Some(Override {
                datatype: Some(datatype),
                ..
            })) => Ok(datatype.clone()),
            _ => self.inner.declared_type(ordinal),
        }
    }

    fn value(&self, ordinal: usize) -> Result<Value> {
        match self.overrides.get(ordinal) {
            Some(Some(entry)) => {
                // Surface misuse before running user code.
                self.inner.value(ordinal)?;
                (entry.compute)(&self.inner)
            }
            _ => self.inner.value(ordinal),
        }
    }

    fn ordinal(&self, name: &str) -> Option<usize> {
        self.inner.ordinal(name)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}
