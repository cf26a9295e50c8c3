use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::import::{DuplicatePolicy, UpsertMode};

#[derive(Debug, Parser)]
#[command(author, version, about = "Import spreadsheet exports into a record store", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Validate, deduplicate and write the rows of a sheet into a store
    Import(ImportArgs),
    /// Write a blank template holding the headers a profile expects
    Template(TemplateArgs),
    /// List the columns of an import profile in a formatted table
    Columns(ColumnsArgs),
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Input CSV file to import (use - for stdin)
    #[arg(short, long)]
    pub input: PathBuf,
    /// Import profile (YAML) describing the target entity
    #[arg(short, long)]
    pub profile: PathBuf,
    /// JSON record store to update; created when missing
    #[arg(short, long)]
    pub store: PathBuf,
    /// Rows per bulk insert
    #[arg(long, default_value_t = crate::import::DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,
    /// Handling of rows repeating a natural key within the file
    #[arg(long, value_enum, default_value = "last-write-wins")]
    pub duplicate_policy: DuplicatePolicyArg,
    /// Handling of rows whose natural key is already stored
    #[arg(long, value_enum, default_value = "upsert")]
    pub mode: UpsertModeArg,
    /// Write blank cells as explicit nulls instead of leaving them out
    #[arg(long = "keep-empty-cells")]
    pub keep_empty_cells: bool,
    /// Name recorded in the profile's creator field for inserted rows
    #[arg(long)]
    pub actor: Option<String>,
    /// Write failed rows with their messages to this CSV file
    #[arg(long = "errors-out")]
    pub errors_out: Option<PathBuf>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Print the outcome as JSON instead of a summary and error table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct TemplateArgs {
    /// Import profile (YAML) to build the template from
    #[arg(short, long)]
    pub profile: PathBuf,
    /// Destination file (defaults to stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
}

#[derive(Debug, Args)]
pub struct ColumnsArgs {
    /// Import profile (YAML) to describe
    #[arg(short, long)]
    pub profile: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
#[value(rename_all = "kebab-case")]
pub enum DuplicatePolicyArg {
    LastWriteWins,
    Reject,
}

impl From<DuplicatePolicyArg> for DuplicatePolicy {
    fn from(value: DuplicatePolicyArg) -> Self {
        match value {
            DuplicatePolicyArg::LastWriteWins => DuplicatePolicy::LastWriteWins,
            DuplicatePolicyArg::Reject => DuplicatePolicy::Reject,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
#[value(rename_all = "kebab-case")]
pub enum UpsertModeArg {
    Upsert,
    Insert,
    RejectExisting,
}

impl From<UpsertModeArg> for UpsertMode {
    fn from(value: UpsertModeArg) -> Self {
        match value {
            UpsertModeArg::Upsert => UpsertMode::Upsert,
            UpsertModeArg::Insert => UpsertMode::Insert,
            UpsertModeArg::RejectExisting => UpsertMode::RejectExisting,
        }
    }
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
            if !first.is_ascii() || first == '"' || first == '\n' {
                return Err(format!("'{first}' cannot be used as a delimiter"));
            }
            Ok(first as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiter_names_and_characters_are_accepted() {
        assert_eq!(parse_delimiter("tab"), Ok(b'\t'));
        assert_eq!(parse_delimiter("semicolon"), Ok(b';'));
        assert_eq!(parse_delimiter("#"), Ok(b'#'));
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter("ab").is_err());
        assert!(parse_delimiter("\"").is_err());
    }

    #[test]
    fn import_flags_parse_into_options() {
        let cli = Cli::try_parse_from([
            "sheet-import",
            "import",
            "-i",
            "in.csv",
            "-p",
            "profile.yaml",
            "-s",
            "store.json",
            "--duplicate-policy",
            "reject",
            "--mode",
            "reject-existing",
            "--keep-empty-cells",
        ])
        .unwrap();
        let Commands::Import(args) = cli.command else {
            panic!("expected import command");
        };
        assert_eq!(DuplicatePolicy::from(args.duplicate_policy), DuplicatePolicy::Reject);
        assert_eq!(UpsertMode::from(args.mode), UpsertMode::RejectExisting);
        assert!(args.keep_empty_cells);
        assert_eq!(args.chunk_size, 1000);
    }
}
