// CLI integration tests driving the built binary against the fake node.
mod common;

use std::process::Command;

use bookledger::api::{Address, Record};
use common::FakeNode;
use serde_json::Value;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_bookledger");
    Command::new(exe)
}

fn parse_json(value: &str) -> Value {
    serde_json::from_str(value).expect("valid json")
}

fn parse_json_line(output: &[u8]) -> Value {
    let text = String::from_utf8_lossy(output);
    let line = text.lines().next().expect("json line");
    parse_json(line)
}

// stderr may carry log lines ahead of the JSON error envelope.
fn parse_error(output: &[u8]) -> Value {
    let text = String::from_utf8_lossy(output);
    let line = text
        .lines()
        .filter(|line| line.starts_with('{'))
        .last()
        .expect("error json line");
    parse_json(line)
}

#[test]
fn list_json_partitions_books() {
    let node = FakeNode::start();
    let borrower: Address = "0x1111111111111111111111111111111111111111"
        .parse()
        .expect("address");
    node.ledger().push_record(Record::new(1, "A", Address::ZERO));
    node.ledger().push_record(Record::new(2, "B", borrower));
    node.ledger().push_record(Record::new(0, "Zero", Address::ZERO));

    let output = cmd()
        .args(["--rpc-url", node.url(), "list", "--json"])
        .output()
        .expect("list");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let value = parse_json_line(&output.stdout);
    assert_eq!(value["available"].as_array().expect("available").len(), 1);
    assert_eq!(value["available"][0]["uid"], 1);
    assert_eq!(value["available"][0]["title"], "A");
    assert_eq!(value["borrowed"][0]["uid"], 2);
    assert_eq!(
        value["borrowed"][0]["borrower"],
        "0x1111111111111111111111111111111111111111"
    );
    assert_eq!(value["account"], node.account().to_string());
}

#[test]
fn add_then_borrow_with_wait_prints_catalog() {
    let node = FakeNode::start();

    let add = cmd()
        .args(["--rpc-url", node.url(), "add", "12abc", "New Book"])
        .output()
        .expect("add");
    assert!(add.status.success(), "stderr: {}", String::from_utf8_lossy(&add.stderr));
    let receipt = parse_json_line(&add.stdout);
    assert_eq!(receipt["action"], "add");
    assert_eq!(receipt["uid"], 12);
    assert!(receipt["tx"].as_str().expect("tx").starts_with("0x"));
    assert!(receipt.get("submitted_at").is_some());

    let borrow = cmd()
        .args([
            "--rpc-url",
            node.url(),
            "borrow",
            "12",
            "--wait",
            "--settle-ms",
            "0",
        ])
        .output()
        .expect("borrow");
    assert!(borrow.status.success());
    let value = parse_json_line(&borrow.stdout);
    assert_eq!(value["receipt"]["action"], "borrow");
    assert_eq!(value["catalog"]["borrowed"][0]["uid"], 12);
    assert_eq!(
        value["catalog"]["borrowed"][0]["borrower"],
        node.account().to_string()
    );
}

#[test]
fn rejected_write_exits_with_rejected_code() {
    let node = FakeNode::start();
    let output = cmd()
        .args(["--rpc-url", node.url(), "return", "3"])
        .output()
        .expect("return");
    assert_eq!(output.status.code(), Some(5));
    let err = parse_error(&output.stderr);
    assert_eq!(err["error"]["kind"], "Rejected");
    assert_eq!(err["error"]["method"], "eth_sendTransaction");
}

#[test]
fn non_numeric_uid_is_usage_error() {
    let node = FakeNode::start();
    let before = node.request_count();
    let output = cmd()
        .args(["--rpc-url", node.url(), "add", "abc", "Title"])
        .output()
        .expect("add");
    assert_eq!(output.status.code(), Some(2));
    let err = parse_error(&output.stderr);
    assert_eq!(err["error"]["kind"], "Usage");
    assert_eq!(node.request_count(), before);
}

#[test]
fn unreachable_provider_exits_unavailable() {
    let output = cmd()
        .args(["--rpc-url", "http://127.0.0.1:1/", "--timeout-ms", "500", "list"])
        .output()
        .expect("list");
    assert_eq!(output.status.code(), Some(3));
    let err = parse_error(&output.stderr);
    assert_eq!(err["error"]["kind"], "Unavailable");
    assert!(err["error"]["hint"].is_string());
}

#[test]
fn bad_ledger_address_is_usage_error() {
    let output = cmd()
        .args(["--ledger", "0x1234", "list"])
        .output()
        .expect("list");
    assert_eq!(output.status.code(), Some(2));
    let err = parse_error(&output.stderr);
    assert_eq!(err["error"]["kind"], "Usage");
}

#[test]
fn missing_subcommand_argument_is_usage() {
    let output = cmd().args(["borrow"]).output().expect("borrow");
    assert_eq!(output.status.code(), Some(2));
    let err = parse_error(&output.stderr);
    assert_eq!(err["error"]["kind"], "Usage");
    assert!(
        err["error"]["hint"]
            .as_str()
            .unwrap_or_default()
            .contains("bookledger")
    );
}

#[test]
fn version_emits_json_when_piped() {
    let output = cmd().arg("version").output().expect("version");
    assert!(output.status.success());
    let value = parse_json_line(&output.stdout);
    assert_eq!(value["name"], "bookledger");
    assert_eq!(value["version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn completion_generates_script() {
    let output = cmd().args(["completion", "bash"]).output().expect("completion");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("bookledger"));
}
