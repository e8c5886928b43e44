use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

mod common;

#[test]
fn test_malformed_scenario_handling() {
    let scenario = common::write_scenario(&[
        // Unknown action
        "0,refund,42,USD,a@b.com,https://shop.example/cb,,".to_string(),
        // Missing email for initialize
        "10,initialize,42,USD,,https://shop.example/cb,,".to_string(),
        // Verify without a reference
        "20,verify,,,,,,".to_string(),
        // Valid initialize
        common::initialize(30, ""),
    ])
    .unwrap();

    let mut cmd = Command::new(cargo_bin!("payment-coordinator"));
    cmd.arg(scenario.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error reading step"))
        .stderr(predicate::str::contains("Error processing step at 10ms"))
        .stderr(predicate::str::contains("Error processing step at 20ms"))
        .stdout(predicate::str::contains("30,initializing,awaiting_redirect,,,REF1,1,"));
}

#[test]
fn test_invalid_data_types() {
    let scenario = common::write_scenario(&[
        // Text in the time column
        "soon,initialize,42,USD,a@b.com,https://shop.example/cb,,".to_string(),
        // Non-integer order id
        "0,initialize,abc,USD,a@b.com,https://shop.example/cb,,".to_string(),
        // Outcome that does not exist
        "0,initialize,42,USD,a@b.com,https://shop.example/cb,,maybe".to_string(),
        // Outcome that does not apply to initialize
        "0,initialize,42,USD,a@b.com,https://shop.example/cb,,verified".to_string(),
        common::initialize(0, "fail"),
    ])
    .unwrap();

    let mut cmd = Command::new(cargo_bin!("payment-coordinator"));
    cmd.arg(scenario.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error reading step"))
        .stderr(predicate::str::contains("Error processing step at 0ms"))
        .stdout(predicate::str::contains(
            "0,initializing,failed,network,Gateway error: Unable to initialize payment for order 42,,0,",
        ));
}

#[test]
fn test_missing_scenario_file() {
    let mut cmd = Command::new(cargo_bin!("payment-coordinator"));
    cmd.arg("tests/fixtures/does-not-exist.csv");

    cmd.assert().failure();
}
