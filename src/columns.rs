//! Column listing for an import profile.
//!
//! Renders each field with its kind, requirement, accepted headers and help
//! text as an ASCII table, the reference sheet handed to whoever fills in a
//! template.

use anyhow::{Context, Result};
use log::info;

use crate::{cli::ColumnsArgs, profile::ImportProfile, table::TextTable};

pub fn describe_profile(profile: &ImportProfile) -> String {
    let mut table = TextTable::new(["#", "field", "kind", "required", "headers", "help"]);
    for (idx, column) in profile.columns.iter().enumerate() {
        let mut kind = column.kind.to_string();
        if let Some(reference) = column.reference.as_deref() {
            kind = format!("{kind} -> {reference}");
        }
        let mut help = column.help.clone();
        if !column.allowed_values.is_empty() {
            let allowed = format!("one of: {}", column.allowed_values.join(", "));
            help = if help.is_empty() {
                allowed
            } else {
                format!("{help} ({allowed})")
            };
        }
        let mut field = column.field.clone();
        if profile.natural_key.as_deref() == Some(column.field.as_str()) {
            field.push_str(" (key)");
        }
        table.push_row([
            (idx + 1).to_string(),
            field,
            kind,
            if column.required { "yes" } else { "" }.to_string(),
            column.headers.join(" | "),
            help,
        ]);
    }
    table.render()
}

pub fn execute(args: &ColumnsArgs) -> Result<()> {
    let profile = ImportProfile::load(&args.profile)
        .with_context(|| format!("Loading profile from {:?}", args.profile))?;
    print!("{}", describe_profile(&profile));
    for rule in &profile.rules {
        println!("rule: {}", profile.rule_message(rule));
    }
    info!(
        "Listed {} column(s) of '{}'",
        profile.columns.len(),
        profile.entity
    );
    Ok(())
}
