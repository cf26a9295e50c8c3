mod common;

use common::{TestWorkspace, csv, customers_profile};
use sheet_import::{
    ImportOptions, JsonFileStore, RecordStore, run_import,
    value::FieldValue,
};

#[test]
fn json_store_persists_between_imports() {
    let workspace = TestWorkspace::new();
    let path = workspace.join("store.json");
    let profile = customers_profile();

    let mut store = JsonFileStore::open(&path).unwrap();
    let first = run_import(
        csv("name,phone", &["Acme,0900000001"]).as_bytes(),
        &profile,
        &mut store,
        &ImportOptions::default(),
    )
    .unwrap();
    assert_eq!(first.inserted, 1);
    store.save().unwrap();

    let mut reopened = JsonFileStore::open(&path).unwrap();
    let second = run_import(
        csv("name,phone", &["Acme Ltd,0900000001", "Beta,0900000002"]).as_bytes(),
        &profile,
        &mut reopened,
        &ImportOptions::default(),
    )
    .unwrap();
    assert_eq!(second.updated, 1);
    assert_eq!(second.inserted, 1);
    reopened.save().unwrap();

    let last = JsonFileStore::open(&path).unwrap();
    assert_eq!(last.store().len(), 2);
    assert_eq!(
        last.store().get(1).unwrap()["name"],
        FieldValue::Text("Acme Ltd".into())
    );
}

#[test]
fn unique_fields_and_references_come_from_the_document() {
    let workspace = TestWorkspace::new();
    let path = workspace.write(
        "store.json",
        r#"{
  "next_id": 10,
  "unique_fields": ["phone"],
  "records": [{ "id": 4, "fields": { "phone": "0900000001", "name": "Acme" } }],
  "references": { "groups": { "Retail": 2 } }
}"#,
    );
    let mut store = JsonFileStore::open(&path).unwrap();
    assert_eq!(store.find_reference_table("groups").unwrap()["retail"], 2);
    let mut record = sheet_import::store::Record::new();
    record.insert("phone".into(), FieldValue::Text("0900000001".into()));
    assert!(store.insert_one(&record).is_err());
    record.insert("phone".into(), FieldValue::Text("0900000002".into()));
    assert_eq!(store.insert_one(&record).unwrap(), 10);
}

#[test]
fn corrupt_document_is_reported() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("store.json", "{ not json");
    let err = JsonFileStore::open(&path).unwrap_err();
    assert!(format!("{err:#}").contains("Parsing store"));
}
