use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Stream tabular data into a destination schema one row at a time",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Map one or more CSV files onto a schema and write the converted rows
    Map(MapArgs),
    /// Report per-column conversion failures for rows that do not fit a schema
    Diagnose(DiagnoseArgs),
}

/// Options shared by every command that reads CSV input.
#[derive(Debug, Args)]
pub struct InputArgs {
    /// Input CSV files, concatenated in order (`-` reads stdin)
    #[arg(short = 'i', long = "input", required = true, num_args = 1..)]
    pub inputs: Vec<PathBuf>,
    /// YAML schema describing the destination columns
    #[arg(short = 's', long = "schema")]
    pub schema: PathBuf,
    /// Table name the schema must describe, when it names one
    #[arg(long)]
    pub table: Option<String>,
    /// 1-based row holding the column names; earlier rows are discarded
    #[arg(long = "header-row")]
    pub header_row: Option<usize>,
    /// Rename source columns before mapping, as `from=to`
    #[arg(long = "alias", action = clap::ArgAction::Append)]
    pub aliases: Vec<String>,
    /// Transform group used for conversions (`default` or `none`)
    #[arg(long = "group", default_value = "default")]
    pub group: String,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Stop after this many rows
    #[arg(long)]
    pub limit: Option<u64>,
}

#[derive(Debug, Args)]
pub struct MapArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Output CSV file (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Keep only rows for which this expression is true (repeatable)
    #[arg(long = "filter-expr", action = clap::ArgAction::Append)]
    pub filter_exprs: Vec<String>,
    /// Additional source columns using `name=expression`
    #[arg(long = "derive", action = clap::ArgAction::Append)]
    pub derives: Vec<String>,
    /// Write one output file per batch of this many rows (requires --output)
    #[arg(long = "batch-size")]
    pub batch_size: Option<u64>,
    /// Log progress every N rows
    #[arg(long)]
    pub progress: Option<u64>,
    /// Delimiter to use for output (defaults to input delimiter)
    #[arg(long = "output-delimiter", value_parser = parse_delimiter)]
    pub output_delimiter: Option<u8>,
    /// Character encoding for the output file/stdout (defaults to utf-8)
    #[arg(long = "output-encoding")]
    pub output_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct DiagnoseArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Only report columns whose destination needs conversion
    #[arg(long = "non-string-only")]
    pub non_string_only: bool,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

/// Parses `from=to` alias pairs.
pub fn parse_alias(value: &str) -> Result<(String, String), String> {
    let (from, to) = value
        .split_once('=')
        .ok_or_else(|| format!("Alias '{value}' must look like from=to"))?;
    let (from, to) = (from.trim(), to.trim());
    if from.is_empty() || to.is_empty() {
        return Err(format!("Alias '{value}' must name both columns"));
    }
    Ok((from.to_string(), to.to_string()))
}
