pub mod cli;
pub mod columns;
pub mod duplicates;
pub mod error;
pub mod import;
pub mod import_cmd;
pub mod io_utils;
pub mod mapper;
pub mod profile;
pub mod reconcile;
pub mod report;
pub mod sanitize;
pub mod sheet;
pub mod store;
pub mod table;
pub mod validate;
pub mod value;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info};

use crate::cli::{Cli, Commands};

pub use crate::{
    error::ImportError,
    import::{DuplicatePolicy, ImportOptions, UpsertMode, import_sheet, run_import, run_import_with},
    profile::{ColumnMapping, CrossFieldRule, ImportProfile, ValueKind},
    report::{BatchOutcome, RowError},
    sheet::{generate_template, write_template},
    store::{JsonFileStore, MemoryStore, RecordStore, StoreError},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("sheet_import", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Import(args) => import_cmd::execute(&args),
        Commands::Template(args) => handle_template(&args),
        Commands::Columns(args) => columns::execute(&args),
    }
}

fn handle_template(args: &cli::TemplateArgs) -> Result<()> {
    let profile = ImportProfile::load(&args.profile)
        .with_context(|| format!("Loading profile from {:?}", args.profile))?;
    let delimiter = io_utils::resolve_delimiter(args.output.as_deref(), args.delimiter);
    let out = io_utils::open_output(args.output.as_deref())?;
    write_template(&profile, out, delimiter)
        .with_context(|| format!("Writing template for '{}'", profile.entity))?;
    if let Some(path) = &args.output {
        info!(
            "Template with {} column(s) written to {:?}",
            profile.columns.len(),
            path
        );
    }
    Ok(())
}
