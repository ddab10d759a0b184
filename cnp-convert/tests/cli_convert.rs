use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn fixture(path: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join(path)
}

fn cnp_convert() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("cnp-convert"));
    cmd.env("NO_COLOR", "1");
    cmd
}

#[test]
fn convert_prints_policy_and_summary_on_stderr() {
    cnp_convert()
        .arg("convert")
        .arg(fixture("fixtures/firewall_rules.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("kind: CiliumNetworkPolicy"))
        .stdout(predicate::str::contains("name: generated-policy"))
        .stdout(predicate::str::contains("fromEntities"))
        .stdout(predicate::str::contains("10.20.0.0/16"))
        .stdout(predicate::str::contains("endPort: 8080"))
        .stdout(predicate::str::contains("convert_summary").not())
        .stderr(predicate::str::contains(
            "convert_summary rules=3 policies=1 ingress=1 egress=0",
        ));
}

#[test]
fn convert_writes_output_file_that_validates() {
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("policy.yaml");

    cnp_convert()
        .arg("convert")
        .arg(fixture("fixtures/firewall_rules.json"))
        .arg("-o")
        .arg(&output)
        .arg("--name")
        .arg("web-policy")
        .assert()
        .success()
        .stdout(predicate::str::contains("convert_summary rules=3"));

    let written = fs::read_to_string(&output).expect("read output");
    assert!(written.contains("name: web-policy"));
    assert!(written.contains("namespace: default"));

    cnp_convert()
        .arg("validate")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("valid=true"));
}

#[test]
fn convert_refuses_to_overwrite_input() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("rules.json");
    fs::copy(fixture("fixtures/firewall_rules.json"), &input).expect("copy");
    let before = fs::read_to_string(&input).expect("read");

    cnp_convert()
        .arg("convert")
        .arg(&input)
        .arg("--output")
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("refusing to overwrite rule file"));

    assert_eq!(fs::read_to_string(&input).expect("read"), before);
}

#[test]
fn convert_rejects_deny_rules() {
    cnp_convert()
        .arg("convert")
        .arg(fixture("fixtures/deny_rules.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("block-telnet"))
        .stderr(predicate::str::contains("DENY rules are not supported"));
}

#[test]
fn convert_legacy_rules_needs_grouping() {
    cnp_convert()
        .arg("convert")
        .arg(fixture("fixtures/legacy_rules.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("convert with grouping"));

    cnp_convert()
        .arg("convert")
        .arg(fixture("fixtures/legacy_rules.json"))
        .arg("--grouped")
        .assert()
        .success()
        .stdout(predicate::str::contains("---"))
        .stdout(predicate::str::contains("name: generated-policy-backend"))
        .stdout(predicate::str::contains("name: generated-policy-database"))
        .stdout(predicate::str::contains("cnp-convert.io/ambiguous-direction"))
        .stderr(predicate::str::contains("policies=2"));
}

#[test]
fn convert_emits_json_when_asked() {
    let output = cnp_convert()
        .arg("convert")
        .arg(fixture("fixtures/firewall_rules.json"))
        .arg("--format")
        .arg("json")
        .output()
        .expect("run");
    assert!(output.status.success());

    let doc: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json policy");
    assert_eq!(doc["apiVersion"], "cilium.io/v2");
    assert_eq!(doc["spec"]["endpointSelector"]["matchLabels"]["app"], "web");
    let ingress = doc["spec"]["ingress"].as_array().expect("ingress");
    assert_eq!(ingress.len(), 1);
    assert_eq!(ingress[0]["fromEntities"][0], "all");
    assert_eq!(ingress[0]["fromCIDR"][0], "10.20.0.0/16");
}

#[test]
fn convert_check_validates_generated_policy() {
    cnp_convert()
        .arg("convert")
        .arg(fixture("fixtures/firewall_rules.json"))
        .arg("--check")
        .assert()
        .success()
        .stdout(predicate::str::contains("kind: CiliumNetworkPolicy"));
}

#[test]
fn convert_reports_unreadable_json() {
    let dir = tempdir().expect("tempdir");
    let input = dir.path().join("rules.json");
    fs::write(&input, "[{\"source\": ").expect("write");

    cnp_convert()
        .arg("convert")
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to parse rules"))
        .stderr(predicate::str::contains("not valid JSON"));
}
