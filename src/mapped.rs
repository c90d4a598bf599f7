//! The schema-aware mapping cursor.
//!
//! [`MappedCursor`] presents a source cursor under a destination column list.
//! Columns are matched by case-insensitive name when the cursor is built; any
//! ambiguity fails construction. Values are converted lazily: a destination
//! cell is coerced only when it is read, and a failed coercion is reported by
//! that read alone. The rest of the row, and the stream, stay usable.

use std::fmt;

use itertools::Itertools;
use log::{debug, warn};
use serde::Serialize;

use crate::{
    columns::ColumnLookup,
    cursor::{Position, RowCursor, check_ordinal},
    data::Value,
    error::{CursorError, Result},
    mapping::ColumnMappingInfo,
    schema::{ColumnDescriptor, ColumnType, SchemaProvider},
    transform::{TransformEntry, TransformGroup},
};

/// Outcome of reading and coercing one source column of the current row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticRecord {
    pub source_ordinal: usize,
    pub source_column_name: String,
    pub source_type: String,
    pub source_value_text: Option<String>,
    pub destination_ordinal: Option<usize>,
    pub destination_column_name: Option<String>,
    pub destination_type: Option<String>,
    pub destination_value_text: Option<String>,
    pub error: Option<String>,
}

impl DiagnosticRecord {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl fmt::Display for DiagnosticRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} ({}) = {}",
            self.source_ordinal,
            self.source_column_name,
            self.source_type,
            self.source_value_text.as_deref().unwrap_or("<null>")
        )?;
        match (&self.destination_ordinal, &self.destination_column_name) {
            (Some(ordinal), Some(name)) => write!(
                f,
                " -> #{ordinal} {name} ({}) = {}",
                self.destination_type.as_deref().unwrap_or("?"),
                self.destination_value_text.as_deref().unwrap_or("<null>")
            )?,
            _ => write!(f, " -> <unmapped>")?,
        }
        if let Some(error) = &self.error {
            write!(f, " ERROR: {error}")?;
        }
        Ok(())
    }
}

pub struct MappedCursor<C> {
    source: C,
    mapping: ColumnMappingInfo,
    lookup: ColumnLookup,
    converters: Vec<Option<TransformEntry>>,
    group: String,
    position: Position,
}

impl<C> MappedCursor<C>
where
    C: RowCursor,
{
    pub fn new(
        source: C,
        destination: Vec<ColumnDescriptor>,
        group: &TransformGroup,
    ) -> Result<Self> {
        let source_columns = source.columns()?;
        let mapping = ColumnMappingInfo::resolve(&source_columns, &destination)?;
        for column in mapping.unmapped_destinations() {
            debug!(
                "Destination column '{}' has no source column and will read as null",
                column.name
            );
        }

        let mut converters: Vec<Option<TransformEntry>> = vec![None; destination.len()];
        for &dest in &mapping.non_string_destinations {
            let target = &mapping.destination_columns[dest].datatype;
            let source_type = mapping
                .source_for(dest)
                .map(|src| &mapping.source_columns[src].datatype);
            converters[dest] = group.converter(target, source_type);
            if converters[dest].is_none() {
                debug!(
                    "Group '{}' has no conversion to {target}; column '{}' passes through",
                    group.name(),
                    mapping.destination_columns[dest].name
                );
            }
        }

        let lookup = ColumnLookup::new(destination.iter().map(|c| c.name.as_str()));
        debug!(
            "Mapping cursor ready: {} destination column(s), {} need coercion, group '{}'",
            destination.len(),
            mapping.non_string_destinations.len(),
            group.name()
        );
        Ok(Self {
            source,
            mapping,
            lookup,
            converters,
            group: group.name().to_string(),
            position: Position::BeforeFirst,
        })
    }

    /// Builds the destination column list from `provider`.
    pub fn for_table(
        source: C,
        provider: &dyn SchemaProvider,
        table: &str,
        group: &TransformGroup,
    ) -> Result<Self> {
        let destination = provider.columns(table)?;
        Self::new(source, destination, group)
    }

    pub fn mapping(&self) -> &ColumnMappingInfo {
        &self.mapping
    }

    pub fn group_name(&self) -> &str {
        &self.group
    }

    pub fn destination_columns(&self) -> &[ColumnDescriptor] {
        &self.mapping.destination_columns
    }

    pub fn into_inner(self) -> C {
        self.source
    }

    fn coerce(&self, dest: usize, raw: Value) -> Result<Value> {
        let column = &self.mapping.destination_columns[dest];
        let target = &column.datatype;
        if target.is_string() {
            return Ok(match raw {
                Value::Null | Value::String(_) => raw,
                other => Value::String(other.as_display()),
            });
        }
        let Some(converter) = &self.converters[dest] else {
            return Ok(raw);
        };
        if self.already_typed(dest, &raw) {
            return Ok(raw);
        }
        converter
            .convert(&raw, target)
            .map_err(|source| CursorError::Coercion {
                ordinal: dest,
                column: column.name.clone(),
                value: raw.as_display(),
                target: target.to_string(),
                source,
            })
    }

    /// True when the source already declares the destination type and the
    /// value carries it, so converting would be a no-op.
    fn already_typed(&self, dest: usize, raw: &Value) -> bool {
        let target = &self.mapping.destination_columns[dest].datatype;
        let Some(src) = self.mapping.source_for(dest) else {
            return false;
        };
        if self.mapping.source_columns[src].datatype != *target {
            return false;
        }
        match raw.column_type() {
            None => true,
            Some(ty) => ty.kind() == target.kind(),
        }
    }

    /// Reads and coerces every source column of the current row without
    /// failing on coercion errors; each outcome is captured in a record.
    ///
    /// With `only_non_string`, only source columns feeding a destination that
    /// needs coercion are reported.
    pub fn diagnostics(&self, only_non_string: bool) -> Result<Vec<DiagnosticRecord>> {
        self.position.ensure_row()?;
        let mut records = Vec::with_capacity(self.mapping.source_columns.len());
        for (src, column) in self.mapping.source_columns.iter().enumerate() {
            let dest = self.mapping.destination_for(src);
            if only_non_string && !dest.is_some_and(|d| self.mapping.is_non_string(d)) {
                continue;
            }
            let mut record = DiagnosticRecord {
                source_ordinal: src,
                source_column_name: column.name.clone(),
                source_type: column.datatype.to_string(),
                source_value_text: None,
                destination_ordinal: dest,
                destination_column_name: None,
                destination_type: None,
                destination_value_text: None,
                error: None,
            };
            if let Some(dest) = dest {
                let target = &self.mapping.destination_columns[dest];
                record.destination_column_name = Some(target.name.clone());
                record.destination_type = Some(target.datatype.to_string());
            }
            let raw = match self.source.value(src) {
                Ok(raw) => raw,
                Err(err) => {
                    record.error = Some(err.to_string());
                    records.push(record);
                    continue;
                }
            };
            record.source_value_text = text_or_none(&raw);
            if let Some(dest) = dest {
                match self.coerce(dest, raw) {
                    Ok(value) => record.destination_value_text = text_or_none(&value),
                    Err(err) => record.error = Some(err.to_string()),
                }
            }
            records.push(record);
        }
        Ok(records)
    }

    /// The current row's diagnostics, one line per source column.
    pub fn diagnostic_trace(&self) -> Result<String> {
        let records = self.diagnostics(false)?;
        let failures = records.iter().filter(|r| r.is_error()).count();
        if failures > 0 {
            warn!("{failures} column(s) of the current row failed to convert");
        }
        Ok(records.iter().join("\n"))
    }
}

fn text_or_none(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(other.as_display()),
    }
}

impl<C> RowCursor for MappedCursor<C>
where
    C: RowCursor,
{
    fn advance(&mut self) -> Result<bool> {
        if self.position == Position::Exhausted {
            return Ok(false);
        }
        let advanced = self.source.advance()?;
        Ok(self.position.record(advanced))
    }

    fn field_count(&self) -> usize {
        self.mapping.destination_columns.len()
    }

    fn name(&self, ordinal: usize) -> Result<&str> {
        check_ordinal(ordinal, self.field_count())?;
        Ok(&self.mapping.destination_columns[ordinal].name)
    }

    fn declared_type(&self, ordinal: usize) -> Result<ColumnType> {
        check_ordinal(ordinal, self.field_count())?;
        Ok(self.mapping.destination_columns[ordinal].datatype.clone())
    }

    fn value(&self, ordinal: usize) -> Result<Value> {
        self.position.ensure_row()?;
        check_ordinal(ordinal, self.field_count())?;
        match self.mapping.source_for(ordinal) {
            None => Ok(Value::Null),
            Some(src) => {
                let raw = self.source.value(src)?;
                self.coerce(ordinal, raw)
            }
        }
    }

    fn ordinal(&self, name: &str) -> Option<usize> {
        self.lookup.find(name)
    }

    fn close(&mut self) -> Result<()> {
        self.position = Position::Exhausted;
        self.source.close()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::*;
    use crate::{
        cursor::{
            IterCursor, collect_rows,
            test_support::{CloseCounter, strings},
        },
        error::MappingSide,
        schema::{Schema, describe_columns},
        transform::TransformRegistry,
    };

    fn default_group() -> TransformGroup {
        TransformGroup::standard()
    }

    #[test]
    fn coerces_and_reorders_to_destination() {
        let source = strings(
            &["when", "Amount", "ignored"],
            vec![vec!["08012035", "(89)", "x"]],
        );
        let destination = describe_columns([
            ("amount", ColumnType::Integer),
            ("WHEN", ColumnType::Date),
            ("note", ColumnType::String),
        ]);
        let mut mapped = MappedCursor::new(source, destination, &default_group()).unwrap();
        assert_eq!(mapped.field_count(), 3);
        assert_eq!(mapped.name(0).unwrap(), "amount");
        let rows = collect_rows(&mut mapped).unwrap();
        assert_eq!(
            rows,
            vec![vec![
                Value::Integer(-89),
                Value::Date(NaiveDate::from_ymd_opt(2035, 8, 1).unwrap()),
                Value::Null,
            ]]
        );
    }

    #[test]
    fn identical_schema_returns_raw_values() {
        let columns = describe_columns([
            ("id", ColumnType::Integer),
            ("flag", ColumnType::Boolean),
            ("price", ColumnType::Decimal(None)),
            ("label", ColumnType::String),
        ]);
        let rows = vec![
            vec![
                Value::Integer(1),
                Value::Null,
                Value::Decimal(Decimal::from_str("1.50").unwrap()),
                Value::from("a"),
            ],
            vec![Value::Integer(2), Value::Boolean(true), Value::Null, Value::Null],
        ];
        let source = IterCursor::new(columns.clone(), rows.clone());
        let mut mapped = MappedCursor::new(source, columns, &default_group()).unwrap();
        assert_eq!(collect_rows(&mut mapped).unwrap(), rows);
    }

    #[test]
    fn coercion_failure_is_scoped_to_one_cell() {
        let source = strings(&["a", "b"], vec![vec!["abc", "5"], vec!["7", "8"]]);
        let destination =
            describe_columns([("a", ColumnType::Integer), ("b", ColumnType::Integer)]);
        let mut mapped = MappedCursor::new(source, destination, &default_group()).unwrap();
        assert!(mapped.advance().unwrap());
        let err = mapped.value(0).unwrap_err();
        assert!(err.is_coercion());
        assert!(err.to_string().contains("'abc'"), "{err}");
        assert_eq!(mapped.value(1).unwrap(), Value::Integer(5));
        assert!(mapped.advance().unwrap());
        assert_eq!(mapped.value(0).unwrap(), Value::Integer(7));
    }

    #[test]
    fn diagnostics_capture_failures_without_raising() {
        let source = strings(
            &["count", "name", "when"],
            vec![vec!["abc", "widget", "10272017"]],
        );
        let destination = describe_columns([
            ("count", ColumnType::Integer),
            ("name", ColumnType::String),
            ("when", ColumnType::Date),
        ]);
        let mut mapped = MappedCursor::new(source, destination, &default_group()).unwrap();
        assert!(mapped.advance().unwrap());
        let records = mapped.diagnostics(false).unwrap();
        assert_eq!(records.len(), 3);
        let count = &records[0];
        assert!(
            count
                .error
                .as_deref()
                .is_some_and(|e| e.contains("not in a correct format")),
            "{count:?}"
        );
        assert_eq!(records[1].destination_value_text.as_deref(), Some("widget"));
        assert_eq!(records[2].destination_value_text.as_deref(), Some("2017-10-27"));
        assert!(records[2].error.is_none());

        let non_string = mapped.diagnostics(true).unwrap();
        assert_eq!(
            non_string.iter().map(|r| r.source_ordinal).collect::<Vec<_>>(),
            vec![0, 2]
        );
        let trace = mapped.diagnostic_trace().unwrap();
        assert_eq!(trace.lines().count(), 3);
        assert!(trace.contains("ERROR"));
    }

    #[test]
    fn diagnostics_report_unmapped_source_columns() {
        let source = strings(&["extra"], vec![vec!["1"]]);
        let destination = describe_columns([("other", ColumnType::Integer)]);
        let mut mapped = MappedCursor::new(source, destination, &default_group()).unwrap();
        assert!(mapped.advance().unwrap());
        let records = mapped.diagnostics(false).unwrap();
        assert_eq!(records[0].destination_ordinal, None);
        assert!(records[0].to_string().contains("<unmapped>"));
        assert_eq!(mapped.value(0).unwrap(), Value::Null);
    }

    #[test]
    fn ambiguity_fails_at_construction() {
        let source = strings(&["id", "ID"], vec![]);
        let destination = describe_columns([("Id", ColumnType::Integer)]);
        let err = MappedCursor::new(source, destination, &default_group())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            CursorError::AmbiguousMapping {
                side: MappingSide::Source,
                ..
            }
        ));
    }

    #[test]
    fn none_group_passes_values_through() {
        let registry = TransformRegistry::standard();
        let none = registry.get("none").unwrap();
        let source = strings(&["n"], vec![vec!["(89)"]]);
        let destination = describe_columns([("n", ColumnType::Integer)]);
        let mut mapped = MappedCursor::new(source, destination, none).unwrap();
        assert_eq!(mapped.group_name(), "none");
        assert!(mapped.advance().unwrap());
        assert_eq!(mapped.value(0).unwrap(), Value::from("(89)"));
    }

    #[test]
    fn string_destinations_stringify_typed_values() {
        let source = IterCursor::new(
            describe_columns([("n", ColumnType::Integer)]),
            vec![vec![Value::Integer(42)]],
        );
        let destination = describe_columns([("n", ColumnType::String)]);
        let mut mapped = MappedCursor::new(source, destination, &default_group()).unwrap();
        assert!(mapped.advance().unwrap());
        assert_eq!(mapped.value(0).unwrap(), Value::from("42"));
    }

    #[test]
    fn reads_before_advance_are_misuse() {
        let source = strings(&["a"], vec![vec!["1"]]);
        let destination = describe_columns([("a", ColumnType::Integer)]);
        let mut mapped = MappedCursor::new(source, destination, &default_group()).unwrap();
        assert!(matches!(mapped.value(0), Err(CursorError::NotPositioned)));
        assert!(mapped.diagnostics(false).is_err());
        assert!(mapped.advance().unwrap());
        assert!(!mapped.advance().unwrap());
        assert!(matches!(mapped.value(0), Err(CursorError::NotPositioned)));
    }

    #[test]
    fn destination_can_come_from_a_schema_provider() {
        let schema = Schema::from_yaml_str(
            "table: orders\ncolumns:\n  - name: qty\n    datatype: integer\n",
        )
        .unwrap();
        let source = strings(&["QTY"], vec![vec!["3"]]);
        let mut mapped =
            MappedCursor::for_table(source, &schema, "ORDERS", &default_group()).unwrap();
        assert!(mapped.advance().unwrap());
        assert_eq!(mapped.value_by_name("qty").unwrap(), Value::Integer(3));

        let other = strings(&["QTY"], vec![]);
        assert!(MappedCursor::for_table(other, &schema, "invoices", &default_group()).is_err());
    }

    #[test]
    fn close_reaches_the_source() {
        let (source, closes) = CloseCounter::new(strings(&["n"], vec![vec!["1"], vec!["2"]]));
        let destination = describe_columns([("n", ColumnType::Integer)]);
        let mut mapped = MappedCursor::new(source, destination, &default_group()).unwrap();
        assert!(mapped.advance().unwrap());
        mapped.close().unwrap();
        assert_eq!(closes.get(), 1);
        assert!(!mapped.advance().unwrap());
    }
}
