pub mod batch;
pub mod cli;
pub mod columns;
pub mod cursor;
pub mod data;
pub mod decorators;
pub mod error;
pub mod expr;
pub mod io_utils;
pub mod mapped;
pub mod mapping;
pub mod pipeline;
pub mod projection;
pub mod schema;
pub mod transform;
pub mod union;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use crate::cli::{Cli, Commands};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("tabflow", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Map(args) => pipeline::execute_map(&args),
        Commands::Diagnose(args) => pipeline::execute_diagnose(&args),
    }
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
