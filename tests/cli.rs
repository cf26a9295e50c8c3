mod common;

use std::fs;

use assert_cmd::Command;
use common::{CUSTOMERS_YAML, TestWorkspace};
use predicates::str::contains;
use sheet_import::{JsonFileStore, value::FieldValue};

fn sheet_import() -> Command {
    Command::cargo_bin("sheet-import").expect("binary exists")
}

#[test]
fn import_reports_summary_and_error_table() {
    let workspace = TestWorkspace::new();
    let profile = workspace.write("customers.yaml", CUSTOMERS_YAML);
    let input = workspace.write(
        "customers.csv",
        "Tên khách buôn,Số điện thoại 1,Năm thành lập\nAcme,0900000001,1999\n,0900000002,\nBeta,0900000003,soon\n,,\n",
    );
    let store = workspace.join("store.json");
    let errors = workspace.join("errors.csv");

    sheet_import()
        .args([
            "import",
            "-i",
            input.to_str().unwrap(),
            "-p",
            profile.to_str().unwrap(),
            "-s",
            store.to_str().unwrap(),
            "--actor",
            "importer",
            "--errors-out",
            errors.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(contains("1 inserted, 0 updated, 2 errors"))
        .stdout(contains("1 blank row(s) skipped"))
        .stdout(contains("name is required"))
        .stdout(contains("founded must be a number"));

    let report = fs::read_to_string(&errors).expect("error report");
    assert_eq!(
        report,
        "row,error\n2,name is required\n3,founded must be a number\n"
    );

    let saved = JsonFileStore::open(&store).expect("store written");
    let record = saved.store().get(1).expect("record stored");
    assert_eq!(record["created_by"], FieldValue::Text("importer".into()));
}

#[test]
fn import_json_output_is_machine_readable() {
    let workspace = TestWorkspace::new();
    let profile = workspace.write("customers.yaml", CUSTOMERS_YAML);
    let input = workspace.write(
        "customers.tsv",
        "Name\tPhone\nAcme\t0900000001\nAcme2\t0900000001\n",
    );
    let store = workspace.join("store.json");

    let output = sheet_import()
        .args([
            "import",
            "-i",
            input.to_str().unwrap(),
            "-p",
            profile.to_str().unwrap(),
            "-s",
            store.to_str().unwrap(),
            "--duplicate-policy",
            "reject",
            "--json",
        ])
        .output()
        .expect("run import");
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json outcome");
    assert_eq!(json["inserted"], 1);
    assert_eq!(json["errors"][0]["row_number"], 2);
    assert_eq!(json["errors"][0]["message"], "duplicate phone 0900000001");
    assert_eq!(json["duplicates"][0]["row_numbers"], serde_json::json!([1, 2]));
}

#[test]
fn import_reads_stdin_and_updates_existing_rows() {
    let workspace = TestWorkspace::new();
    let profile = workspace.write("customers.yaml", CUSTOMERS_YAML);
    let store = workspace.join("store.json");
    let args = |extra: &[&str]| {
        let mut args = vec![
            "import".to_string(),
            "-i".to_string(),
            "-".to_string(),
            "-p".to_string(),
            profile.to_str().unwrap().to_string(),
            "-s".to_string(),
            store.to_str().unwrap().to_string(),
        ];
        args.extend(extra.iter().map(|s| s.to_string()));
        args
    };

    sheet_import()
        .args(args(&[]))
        .write_stdin("Name,Phone\nAcme,0900000001\n")
        .assert()
        .success()
        .stdout(contains("1 inserted, 0 updated, 0 errors"));

    sheet_import()
        .args(args(&[]))
        .write_stdin("Name,Phone\nAcme Ltd,0900000001\n")
        .assert()
        .success()
        .stdout(contains("0 inserted, 1 updated, 0 errors"));

    sheet_import()
        .args(args(&["--mode", "reject-existing"]))
        .write_stdin("Name,Phone\nAcme Again,0900000001\n")
        .assert()
        .success()
        .stdout(contains("phone 0900000001 already exists"));
}

#[test]
fn import_of_empty_file_fails() {
    let workspace = TestWorkspace::new();
    let profile = workspace.write("customers.yaml", CUSTOMERS_YAML);
    let input = workspace.write("empty.csv", "");
    let store = workspace.join("store.json");

    sheet_import()
        .args([
            "import",
            "-i",
            input.to_str().unwrap(),
            "-p",
            profile.to_str().unwrap(),
            "-s",
            store.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(contains("error:"))
        .stderr(contains("input file is empty"));
    assert!(!store.exists());
}

#[test]
fn template_writes_bom_and_headers() {
    let workspace = TestWorkspace::new();
    let profile = workspace.write("customers.yaml", CUSTOMERS_YAML);
    let output = workspace.join("template.csv");

    sheet_import()
        .args([
            "template",
            "-p",
            profile.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
        ])
        .assert()
        .success();

    let bytes = fs::read(&output).expect("template written");
    assert!(bytes.starts_with(b"\xEF\xBB\xBF"));
    let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
    assert_eq!(
        text.trim_end(),
        "\"Tên khách buôn\",\"Số điện thoại 1\",\"Năm thành lập\""
    );
}

#[test]
fn columns_lists_profile_fields() {
    let workspace = TestWorkspace::new();
    let profile = workspace.write("customers.yaml", CUSTOMERS_YAML);

    sheet_import()
        .args(["columns", "-p", profile.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("phone (key)"))
        .stdout(contains("Customer display name"))
        .stdout(contains("number"));
}

#[test]
fn unknown_encoding_is_rejected() {
    let workspace = TestWorkspace::new();
    let profile = workspace.write("customers.yaml", CUSTOMERS_YAML);
    let input = workspace.write("customers.csv", "Name,Phone\nA,1\n");
    let store = workspace.join("store.json");

    sheet_import()
        .args([
            "import",
            "-i",
            input.to_str().unwrap(),
            "-p",
            profile.to_str().unwrap(),
            "-s",
            store.to_str().unwrap(),
            "--input-encoding",
            "klingon",
        ])
        .assert()
        .failure()
        .stderr(contains("Unknown encoding 'klingon'"));
}
