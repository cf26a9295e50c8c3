use std::{fs::File, io::BufWriter};

use anyhow::{Context, Result};
use itertools::Itertools;
use log::info;

use crate::{
    cli::ImportArgs,
    import::{ImportOptions, run_import_with},
    io_utils::{printable_delimiter, read_input, resolve_delimiter, resolve_encoding},
    profile::ImportProfile,
    report::{BatchOutcome, render_error_table, write_error_report},
    sheet::CsvSheetParser,
    store::JsonFileStore,
};

pub fn execute(args: &ImportArgs) -> Result<()> {
    let profile = ImportProfile::load(&args.profile)
        .with_context(|| format!("Loading profile from {:?}", args.profile))?;
    let encoding = resolve_encoding(args.input_encoding.as_deref())?;
    let delimiter = resolve_delimiter(Some(args.input.as_path()), args.delimiter);
    info!(
        "Importing '{}' as '{}' using delimiter '{}'",
        args.input.display(),
        profile.entity,
        printable_delimiter(delimiter)
    );

    let options = ImportOptions {
        chunk_size: args.chunk_size,
        skip_empty_cells: !args.keep_empty_cells,
        duplicate_policy: args.duplicate_policy.into(),
        mode: args.mode.into(),
        actor: args.actor.clone(),
        ..ImportOptions::default()
    };
    let bytes = read_input(&args.input, &options.limits)?;
    let mut store = JsonFileStore::open(&args.store)?;
    let parser = CsvSheetParser::new(delimiter, encoding);
    let outcome = run_import_with(&parser, &bytes, &profile, &mut store, &options)
        .with_context(|| format!("Importing {:?}", args.input))?;
    store.save()?;
    info!(
        "Store {:?} now holds {} record(s)",
        store.path(),
        store.store().len()
    );

    if let Some(path) = &args.errors_out {
        let file = File::create(path)
            .with_context(|| format!("Creating error report {path:?}"))?;
        write_error_report(&outcome, BufWriter::new(file))?;
        info!(
            "Wrote {} failed row(s) to {:?}",
            outcome.failed_rows(),
            path
        );
    }

    if args.json {
        let json =
            serde_json::to_string_pretty(&outcome).context("Serializing import outcome")?;
        println!("{json}");
    } else {
        print_outcome(&outcome);
    }
    Ok(())
}

fn print_outcome(outcome: &BatchOutcome) {
    println!("{}", outcome.summary_line());
    if outcome.skipped_blank_rows > 0 {
        println!("{} blank row(s) skipped", outcome.skipped_blank_rows);
    }
    for group in &outcome.duplicates {
        println!(
            "repeated key '{}' on rows {}",
            group.key,
            group.row_numbers.iter().join(", ")
        );
    }
    if !outcome.is_clean() {
        println!();
        print!("{}", render_error_table(outcome));
    }
}
