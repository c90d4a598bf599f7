//! Command implementations: CSV sources composed through the cursor decorators
//! and a mapping cursor, then written back out.

use std::{
    collections::HashMap,
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use itertools::Itertools;
use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    batch::Batches,
    cli::{DiagnoseArgs, InputArgs, MapArgs, parse_alias},
    cursor::{BoxCursor, RowCursor},
    decorators::{Filter, Limit, Notify, PromoteHeader, Rename},
    expr::{expression_predicate, parse_derived_columns},
    io_utils::{self, CsvCursor, CsvOptions},
    mapped::{DiagnosticRecord, MappedCursor},
    mapping::ColumnMappingInfo,
    printable_delimiter,
    projection::Project,
    schema::{ColumnDescriptor, Schema, SchemaProvider},
    transform::TransformRegistry,
    union::concat,
};

/// Opens every input, promotes headers per file, concatenates them, and
/// applies aliases.
pub fn open_source<'a>(args: &InputArgs) -> Result<BoxCursor<'a>> {
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let mut cursors: Vec<BoxCursor<'a>> = Vec::with_capacity(args.inputs.len());
    for path in &args.inputs {
        let delimiter = io_utils::resolve_input_delimiter(path, args.delimiter);
        info!(
            "Reading '{}' with delimiter '{}'",
            path.display(),
            printable_delimiter(delimiter)
        );
        let options = CsvOptions {
            delimiter,
            encoding,
            has_headers: args.header_row.is_none(),
            header_row: args.header_row,
        };
        let csv = CsvCursor::open(path, &options)?;
        let cursor: BoxCursor<'a> = match args.header_row {
            Some(row) => Box::new(
                PromoteHeader::new(csv, row)
                    .with_context(|| format!("Promoting row {row} of {path:?} to header"))?,
            ),
            None => Box::new(csv),
        };
        cursors.push(cursor);
    }
    let mut cursor = concat(cursors).context("Combining inputs")?;

    if !args.aliases.is_empty() {
        let aliases = args
            .aliases
            .iter()
            .map(|alias| parse_alias(alias).map_err(|err| anyhow!(err)))
            .collect::<Result<HashMap<_, _>>>()?;
        debug!("Column aliases: {aliases:?}");
        cursor = Box::new(Rename::new(cursor, &aliases)?);
    }
    Ok(cursor)
}

/// Loads the destination column list through the schema's provider contract.
pub fn load_destination(args: &InputArgs) -> Result<Vec<ColumnDescriptor>> {
    let schema =
        Schema::load(&args.schema).with_context(|| format!("Loading schema {:?}", args.schema))?;
    let table = args
        .table
        .clone()
        .or_else(|| schema.table.clone())
        .unwrap_or_default();
    SchemaProvider::columns(&schema, &table)
}

fn with_limit<'a>(cursor: BoxCursor<'a>, limit: Option<u64>) -> BoxCursor<'a> {
    match limit {
        Some(max) => Box::new(Limit::new(cursor, max)),
        None => cursor,
    }
}

pub fn execute_map(args: &MapArgs) -> Result<()> {
    let registry = TransformRegistry::standard();
    let group = registry
        .get(&args.input.group)
        .ok_or_else(|| anyhow!("Unknown transform group '{}'", args.input.group))?;
    let destination = load_destination(&args.input)?;
    let headers = destination
        .iter()
        .map(|column| column.output_name().to_string())
        .collect_vec();

    let mut cursor = open_source(&args.input)?;
    if !args.filter_exprs.is_empty() {
        let predicates = args
            .filter_exprs
            .iter()
            .map(|expr| expression_predicate(expr.clone()))
            .collect();
        cursor = Box::new(Filter::all(cursor, predicates));
    }
    let derived = parse_derived_columns(&args.derives)?;
    if !derived.is_empty() {
        let computed = derived.into_iter().map(|d| d.into_computed()).collect();
        cursor = Box::new(Project::append(cursor, computed)?);
    }
    cursor = with_limit(cursor, args.input.limit);
    if let Some(every) = args.progress {
        cursor = Box::new(Notify::new(cursor, every, |rows| {
            info!("Processed {rows} row(s)")
        }));
    }

    let output_delimiter = io_utils::resolve_output_delimiter(
        args.output.as_deref(),
        args.output_delimiter,
        args.input.delimiter.unwrap_or(io_utils::DEFAULT_CSV_DELIMITER),
    );
    let output_encoding = io_utils::resolve_encoding(args.output_encoding.as_deref())?;

    match args.batch_size {
        Some(size) => {
            let output = args
                .output
                .as_deref()
                .filter(|path| !io_utils::is_dash(path))
                .ok_or_else(|| anyhow!("--batch-size requires an --output file"))?;
            // Fail on ambiguous columns even when the input has no rows.
            ColumnMappingInfo::resolve(&cursor.columns()?, &destination)?;
            let mut batches = Batches::new(cursor, size)?;
            let mut total = 0u64;
            let count = batches.for_each_batch(|index, batch| {
                let path = batch_path(output, index);
                let mut mapped = MappedCursor::new(batch, destination.clone(), group)?;
                let mut writer =
                    io_utils::open_csv_writer(Some(&path), output_delimiter, output_encoding)?;
                let rows = io_utils::write_cursor(&mut mapped, &mut writer, &headers)?;
                info!("Wrote batch {} ({rows} row(s)) to {path:?}", index + 1);
                total += rows;
                Ok(())
            })?;
            batches.close()?;
            info!("Mapped {total} row(s) into {count} batch file(s)");
        }
        None => {
            let mut mapped = MappedCursor::new(cursor, destination, group)?;
            let mut writer = io_utils::open_csv_writer(
                args.output.as_deref(),
                output_delimiter,
                output_encoding,
            )?;
            let rows = io_utils::write_cursor(&mut mapped, &mut writer, &headers)?;
            mapped.close()?;
            info!("Mapped {rows} row(s) using transform group '{}'", group.name());
        }
    }
    Ok(())
}

/// `out.csv` becomes `out_0001.csv`, `out_0002.csv`, ...
pub fn batch_path(output: &Path, index: u64) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "batch".to_string());
    let name = match output.extension() {
        Some(ext) => format!("{stem}_{:04}.{}", index + 1, ext.to_string_lossy()),
        None => format!("{stem}_{:04}", index + 1),
    };
    output.with_file_name(name)
}

#[derive(Debug, Serialize)]
struct RowDiagnostics<'a> {
    row: u64,
    records: &'a [DiagnosticRecord],
}

pub fn execute_diagnose(args: &DiagnoseArgs) -> Result<()> {
    let registry = TransformRegistry::standard();
    let group = registry
        .get(&args.input.group)
        .ok_or_else(|| anyhow!("Unknown transform group '{}'", args.input.group))?;
    let destination = load_destination(&args.input)?;
    let cursor = with_limit(open_source(&args.input)?, args.input.limit);
    let mut mapped = MappedCursor::new(cursor, destination, group)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut rows = 0u64;
    let mut failing = 0u64;
    while mapped.advance()? {
        rows += 1;
        let records = mapped.diagnostics(args.non_string_only)?;
        if !records.iter().any(DiagnosticRecord::is_error) {
            continue;
        }
        failing += 1;
        let line = serde_json::to_string(&RowDiagnostics {
            row: rows,
            records: &records,
        })
        .context("Serialising diagnostics")?;
        writeln!(out, "{line}").context("Writing diagnostics")?;
    }
    out.flush().context("Flushing diagnostics")?;
    mapped.close()?;

    if failing > 0 {
        warn!("{failing} of {rows} row(s) have conversion errors");
    } else {
        info!("All {rows} row(s) convert cleanly");
    }
    Ok(())
}
