//! Import profiles: the per-entity column mapping configuration.
//!
//! An [`ImportProfile`] lists the canonical fields an entity accepts, the
//! spreadsheet headers that feed each of them, and the validation rules
//! applied to every row. Profiles are persisted as YAML.
//!
//! ## Responsibilities
//!
//! - YAML loading and saving via `serde_yaml`
//! - Structural checks (unique fields, known natural key, rule targets)
//! - Field labels and the default error message wording

use std::{collections::HashSet, fmt, fs::File, io::BufReader, path::Path, str::FromStr};

use anyhow::{Context, Result, anyhow, ensure};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    #[default]
    Text,
    Number,
    Date,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Text => "text",
            ValueKind::Number => "number",
            ValueKind::Date => "date",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "string" => Ok(ValueKind::Text),
            "number" | "numeric" => Ok(ValueKind::Number),
            "date" => Ok(ValueKind::Date),
            other => Err(anyhow!(
                "Unknown value kind '{other}'. Supported kinds: text, number, date"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub field: String,
    #[serde(default, alias = "accepted_headers", skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub kind: ValueKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub help: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,
    /// Reference table used to resolve display names into record ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl ColumnMapping {
    pub fn new(field: &str, kind: ValueKind) -> Self {
        Self {
            field: field.to_string(),
            headers: Vec::new(),
            required: false,
            kind,
            label: None,
            help: String::new(),
            required_message: None,
            allowed_values: Vec::new(),
            reference: None,
        }
    }

    pub fn text(field: &str) -> Self {
        Self::new(field, ValueKind::Text)
    }

    pub fn number(field: &str) -> Self {
        Self::new(field, ValueKind::Number)
    }

    pub fn date(field: &str) -> Self {
        Self::new(field, ValueKind::Date)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.headers.extend(headers.into_iter().map(Into::into));
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn with_help(mut self, help: &str) -> Self {
        self.help = help.to_string();
        self
    }

    pub fn with_required_message(mut self, message: &str) -> Self {
        self.required_message = Some(message.to_string());
        self
    }

    pub fn with_allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_reference(mut self, table: &str) -> Self {
        self.reference = Some(table.to_string());
        self
    }

    pub fn label(&self) -> &str {
        self.label
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(&self.field)
    }

    /// Header written into generated templates.
    pub fn template_header(&self) -> &str {
        self.headers
            .iter()
            .map(String::as_str)
            .find(|header| !header.trim().is_empty())
            .unwrap_or(&self.field)
    }

    /// Every header name that maps onto this field, including the field id.
    pub fn accepted_names(&self) -> impl Iterator<Item = &str> {
        self.headers
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.field.as_str()))
    }

    pub fn required_error(&self) -> String {
        match self.required_message.as_deref() {
            Some(message) if !message.trim().is_empty() => message.to_string(),
            _ => format!("{} is required", self.label()),
        }
    }

    /// Declared spelling of an allowed value, matched case-insensitively.
    pub fn canonical_allowed_value(&self, value: &str) -> Option<&str> {
        let wanted = value.trim();
        self.allowed_values
            .iter()
            .map(String::as_str)
            .find(|allowed| allowed.trim().to_lowercase() == wanted.to_lowercase())
    }
}

/// Conditional requirement: at least one of the listed fields must be filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossFieldRule {
    pub at_least_one_of: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attach_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CrossFieldRule {
    pub fn at_least_one_of<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            at_least_one_of: fields.into_iter().map(Into::into).collect(),
            attach_to: None,
            message: None,
        }
    }

    pub fn attached_to(mut self, field: &str) -> Self {
        self.attach_to = Some(field.to_string());
        self
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    pub fn target_field(&self) -> &str {
        self.attach_to
            .as_deref()
            .or_else(|| self.at_least_one_of.first().map(String::as_str))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportProfile {
    #[serde(default)]
    pub entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub natural_key: Option<String>,
    /// Field stamped with the acting user on insert and never overwritten.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_field: Option<String>,
    pub columns: Vec<ColumnMapping>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<CrossFieldRule>,
}

impl ImportProfile {
    pub fn new(entity: &str, columns: Vec<ColumnMapping>) -> Self {
        Self {
            entity: entity.to_string(),
            natural_key: None,
            creator_field: None,
            columns,
            rules: Vec::new(),
        }
    }

    pub fn with_natural_key(mut self, field: &str) -> Self {
        self.natural_key = Some(field.to_string());
        self
    }

    pub fn with_creator_field(mut self, field: &str) -> Self {
        self.creator_field = Some(field.to_string());
        self
    }

    pub fn with_rule(mut self, rule: CrossFieldRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn column(&self, field: &str) -> Option<&ColumnMapping> {
        self.columns.iter().find(|column| column.field == field)
    }

    pub fn natural_key_column(&self) -> Option<&ColumnMapping> {
        self.natural_key
            .as_deref()
            .and_then(|field| self.column(field))
    }

    pub fn template_headers(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|column| column.template_header().to_string())
            .collect()
    }

    /// Distinct reference tables, in declaration order.
    pub fn reference_tables(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter_map(|column| column.reference.as_deref())
            .unique()
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.columns.is_empty(),
            "Profile '{}' does not define any columns",
            self.entity
        );
        let mut seen = HashSet::new();
        for column in &self.columns {
            ensure!(
                !column.field.trim().is_empty(),
                "Profile '{}' has a column without a field name",
                self.entity
            );
            ensure!(
                seen.insert(column.field.as_str()),
                "Field '{}' is declared more than once",
                column.field
            );
        }
        if let Some(key) = self.natural_key.as_deref() {
            ensure!(
                seen.contains(key),
                "Natural key '{key}' is not a declared column"
            );
        }
        if let Some(creator) = self.creator_field.as_deref() {
            ensure!(
                !creator.trim().is_empty(),
                "Creator field cannot be blank"
            );
            ensure!(
                !seen.contains(creator),
                "Creator field '{creator}' is stamped by the importer and cannot be a sheet column"
            );
        }
        for rule in &self.rules {
            ensure!(
                !rule.at_least_one_of.is_empty(),
                "Cross-field rule must list at least one field"
            );
            for field in rule.at_least_one_of.iter().map(String::as_str) {
                ensure!(
                    seen.contains(field),
                    "Cross-field rule refers to unknown field '{field}'"
                );
            }
            ensure!(
                seen.contains(rule.target_field()),
                "Cross-field rule attaches to unknown field '{}'",
                rule.target_field()
            );
        }
        Ok(())
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let profile: ImportProfile =
            serde_yaml::from_str(contents).context("Parsing import profile YAML")?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        self.validate()?;
        serde_yaml::to_string(self).context("Serializing import profile to YAML")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Opening import profile {path:?}"))?;
        let profile: ImportProfile = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing import profile {path:?}"))?;
        profile
            .validate()
            .with_context(|| format!("Validating import profile {path:?}"))?;
        Ok(profile)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = self.to_yaml_string()?;
        std::fs::write(path, contents)
            .with_context(|| format!("Writing import profile {path:?}"))
    }

    pub fn rule_message(&self, rule: &CrossFieldRule) -> String {
        if let Some(message) = rule.message.as_deref().filter(|m| !m.trim().is_empty()) {
            return message.to_string();
        }
        let labels = rule
            .at_least_one_of
            .iter()
            .map(|field| {
                self.column(field)
                    .map(|column| column.label().to_string())
                    .unwrap_or_else(|| field.clone())
            })
            .join(" or ");
        format!("{labels} is required")
    }
}
