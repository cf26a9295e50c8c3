#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use sheet_import::{ColumnMapping, ImportProfile};
use tempfile::{TempDir, tempdir};

pub const CUSTOMERS_YAML: &str = r#"entity: customers
natural_key: phone
creator_field: created_by
columns:
  - field: name
    headers: ["Tên khách buôn", "Ten khach buon", "Name"]
    required: true
    help: Customer display name
  - field: phone
    headers: ["Số điện thoại 1", "So dien thoai 1", "Phone"]
    required: true
  - field: founded
    headers: ["Năm thành lập", "Year founded"]
    kind: number
"#;

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.join(name);
        fs::write(&path, contents).expect("write temp file contents");
        path
    }
}

/// `name` and `phone` required, `phone` as natural key.
pub fn customers_profile() -> ImportProfile {
    ImportProfile::new(
        "customers",
        vec![
            ColumnMapping::text("name").required(),
            ColumnMapping::text("phone").required(),
        ],
    )
    .with_natural_key("phone")
}

/// Builds CSV text from a header line and data lines.
pub fn csv(header: &str, rows: &[&str]) -> String {
    let mut text = String::from(header);
    text.push('\n');
    for row in rows {
        text.push_str(row);
        text.push('\n');
    }
    text
}

/// `count` rows with unique phone numbers starting at `first`.
pub fn customer_rows(first: usize, count: usize) -> Vec<String> {
    (first..first + count)
        .map(|n| format!("Customer {n},09{n:08}"))
        .collect()
}
