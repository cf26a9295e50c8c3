mod common;

use common::{CUSTOMERS_YAML, TestWorkspace};
use sheet_import::{
    ImportProfile, generate_template,
    mapper::{FieldMapper, HeaderTarget, MatchKind},
    sheet::{CsvSheetParser, SheetParser},
};

#[test]
fn profile_loads_from_yaml_file() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("customers.yaml", CUSTOMERS_YAML);
    let profile = ImportProfile::load(&path).expect("load profile");
    assert_eq!(profile.entity, "customers");
    assert_eq!(profile.natural_key.as_deref(), Some("phone"));
    assert_eq!(profile.columns.len(), 3);
    assert_eq!(profile.columns[0].help, "Customer display name");
}

#[test]
fn saved_profile_reloads_identically() {
    let workspace = TestWorkspace::new();
    let profile = ImportProfile::from_yaml_str(CUSTOMERS_YAML).unwrap();
    let path = workspace.join("copy.yaml");
    profile.save(&path).unwrap();
    assert_eq!(ImportProfile::load(&path).unwrap(), profile);
}

#[test]
fn broken_profile_reports_its_path() {
    let workspace = TestWorkspace::new();
    let path = workspace.write(
        "broken.yaml",
        "entity: x\nnatural_key: email\ncolumns:\n  - field: name\n",
    );
    let err = ImportProfile::load(&path).unwrap_err();
    assert!(format!("{err:#}").contains("broken.yaml"));
    assert!(format!("{err:#}").contains("Natural key 'email'"));
}

#[test]
fn vietnamese_and_english_headers_map_to_the_same_fields() {
    let profile = ImportProfile::from_yaml_str(CUSTOMERS_YAML).unwrap();
    let mapper = FieldMapper::new(&profile.columns);
    for headers in [
        vec!["Tên khách buôn", "Số điện thoại 1", "Năm thành lập"],
        vec!["ten_khach_buon", "SO DIEN THOAI 1", "year founded"],
        vec!["Name", "Phone", "founded"],
    ] {
        let headers: Vec<String> = headers.into_iter().map(String::from).collect();
        let map = mapper.map(&headers);
        let fields: Vec<&str> = map.mapped().map(|(_, field)| field).collect();
        assert_eq!(fields, vec!["name", "phone", "founded"], "{headers:?}");
    }
}

#[test]
fn typo_headers_are_matched_fuzzily_only_above_threshold() {
    let profile = ImportProfile::from_yaml_str(CUSTOMERS_YAML).unwrap();
    let headers = vec!["Phonee".to_string(), "Colour".to_string()];
    let map = FieldMapper::new(&profile.columns).map(&headers);
    assert_eq!(map.field_for("Phonee"), Some("phone"));
    assert_eq!(map.match_kind("Phonee"), Some(MatchKind::Fuzzy));
    assert_eq!(map.target("Colour"), &HeaderTarget::Unmapped);
}

#[test]
fn template_headers_map_back_onto_every_field() {
    let profile = ImportProfile::from_yaml_str(CUSTOMERS_YAML).unwrap();
    let template = generate_template(&profile).unwrap();
    let sheet = CsvSheetParser::default().parse(&template).unwrap();
    assert!(sheet.rows.is_empty());
    assert_eq!(
        sheet.headers,
        vec!["Tên khách buôn", "Số điện thoại 1", "Năm thành lập"]
    );
    let map = FieldMapper::new(&profile.columns).map(&sheet.headers);
    assert!(map.unmapped_headers().is_empty());
    assert!(map.missing_fields(&profile.columns).is_empty());
}
