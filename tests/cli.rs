mod common;

use std::fs;

use assert_cmd::Command;
use common::{TestWorkspace, fixture_path};
use predicates::str::contains;

fn bin() -> Command {
    Command::cargo_bin("fixture-seed").expect("binary exists")
}

#[test]
fn inspect_prints_tables_with_nulls() {
    bin()
        .args(["inspect", "--column-sensing"])
        .arg(fixture_path("users.xml"))
        .assert()
        .success()
        .stdout(contains("USERS [dataset 1] (2 row(s))"))
        .stdout(contains("ID   NAME   EMAIL"))
        .stdout(contains("[null]"));
}

#[test]
fn inspect_json_lists_members_in_order() {
    let output = bin()
        .args(["inspect", "--json", "--column-sensing"])
        .arg(fixture_path("users.xml"))
        .arg(fixture_path("orders.xml"))
        .output()
        .expect("run inspect");
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json output");
    assert_eq!(value[0]["tables"][0]["name"], "USERS");
    assert_eq!(value[1]["tables"][0]["name"], "ORDERS");
    assert_eq!(value[0]["tables"][0]["rows"][0][2], serde_json::Value::Null);
}

#[test]
fn plan_shows_reverse_teardown() {
    bin()
        .args(["plan", "--phase", "teardown", "--tear-down", "delete_all"])
        .arg(fixture_path("users.xml"))
        .assert()
        .success()
        .stdout(contains("TEARDOWN:"))
        .stdout(contains("DELETE_ALL [dataset 1]: ROLES, USERS"));
}

#[test]
fn plan_degrades_clean_insert_for_later_members() {
    bin()
        .args(["plan", "--phase", "setup"])
        .arg(fixture_path("users.xml"))
        .arg(fixture_path("orders.xml"))
        .assert()
        .success()
        .stdout(contains("DELETE_ALL [dataset 1]: ROLES, USERS"))
        .stdout(contains("INSERT [dataset 1]: USERS, ROLES"))
        .stdout(contains("INSERT [dataset 2]: ORDERS"));
}

#[test]
fn convert_to_csv_writes_one_file_per_table() {
    let workspace = TestWorkspace::new();
    let out_dir = workspace.path().join("csv");
    bin()
        .args(["convert", "--column-sensing", "--to", "csv", "-o"])
        .arg(&out_dir)
        .arg(fixture_path("users.xml"))
        .assert()
        .success();
    let users = fs::read_to_string(out_dir.join("USERS.csv")).expect("users csv");
    assert_eq!(users, "ID,NAME,EMAIL\n1,Alice,null\n2,Bob,bob@example.com\n");
    assert!(out_dir.join("ROLES.csv").is_file());
}

#[test]
fn convert_with_doctype_round_trips_through_dtd_metadata() {
    let workspace = TestWorkspace::new();
    let flat = workspace.path().join("users-flat.xml");
    bin()
        .args(["convert", "--column-sensing", "--to", "flat", "--doctype", "-o"])
        .arg(&flat)
        .arg(fixture_path("users.xml"))
        .assert()
        .success();
    assert!(fs::read_to_string(&flat).unwrap().contains("<!DOCTYPE dataset"));

    bin()
        .args(["inspect", "--dtd-metadata"])
        .arg(&flat)
        .assert()
        .success()
        .stdout(contains("ID   NAME   EMAIL"));
}

#[test]
fn schema_converts_dtd_to_yaml() {
    bin()
        .args(["schema", "--to", "yaml", "-i"])
        .arg(fixture_path("tables.dtd"))
        .assert()
        .success()
        .stdout(contains("name: USERS"))
        .stdout(contains("nullable: false"));
}

#[test]
fn malformed_input_fails_with_message() {
    let workspace = TestWorkspace::new();
    let broken = workspace.write("broken.xml", "<dataset><T ID=\"1\"></dataset>");
    bin()
        .arg("inspect")
        .arg(&broken)
        .assert()
        .failure()
        .stderr(contains("error:"));
}

#[test]
fn unknown_format_is_rejected() {
    bin()
        .args(["inspect", "--format", "excel"])
        .arg(fixture_path("users.xml"))
        .assert()
        .failure()
        .stderr(contains("excel"));
}

#[test]
fn schema_converts_yaml_to_dtd() {
    let workspace = TestWorkspace::new();
    let out = workspace.path().join("users.dtd");
    bin()
        .args(["schema", "--to", "dtd", "-i"])
        .arg(fixture_path("schema.yaml"))
        .arg("-o")
        .arg(&out)
        .assert()
        .success();
    let dtd = fs::read_to_string(&out).expect("dtd output");
    assert!(dtd.contains("<!ATTLIST USERS"));
    assert!(dtd.contains("ID CDATA #REQUIRED"));
}
