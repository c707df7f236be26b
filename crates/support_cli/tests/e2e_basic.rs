use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

const EVA_QUESTION: &str = "What does the eligibility verification agent (EVA) do?";
const FALLBACK: &str = "I'm your Thoughtful AI support agent. You can ask me about our automation tools like EVA, CAM, or PHIL.";

fn bin() -> Command {
    let path = assert_cmd::cargo::cargo_bin!("support-agent");
    Command::new(path)
}

#[test]
fn exact_question_is_answered_by_keyword_tier() {
    let assert = bin()
        .args(["ask", "--question", EVA_QUESTION, "--format", "json"])
        .assert()
        .success();

    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let json: Value = serde_json::from_str(&output).unwrap();
    assert_eq!(json["source_tier"], "keyword");
    assert_eq!(json["entry"], 0);
    assert!(json["answer"].as_str().unwrap().starts_with("EVA automates"));
    assert!(json.get("error").is_none());
}

#[test]
fn unrelated_question_gets_fallback() {
    bin()
        .args(["ask", "--question", "what's the weather today"])
        .assert()
        .success()
        .stdout(format!("Agent: {FALLBACK}\n"));
}

#[test]
fn empty_question_gets_fallback() {
    bin()
        .args(["ask", "--question", ""])
        .assert()
        .success()
        .stdout(predicate::str::contains(FALLBACK));
}

#[test]
fn chat_answers_each_line() {
    let input = format!("{EVA_QUESTION}\n\nwhat's the weather today\n");
    let assert = bin().arg("chat").write_stdin(input).assert().success();

    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("Agent: EVA automates"));
    assert_eq!(lines[1], format!("Agent: {FALLBACK}"));
}

#[test]
fn custom_config_changes_fallback_message() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("agent.toml");
    std::fs::write(
        &config,
        "fallback_message = \"Please contact support.\"\nclassifier_timeout = \"2s\"\n",
    )
    .unwrap();

    bin()
        .args(["--config", config.to_str().unwrap()])
        .args(["ask", "--question", "what's the weather today"])
        .assert()
        .success()
        .stdout("Agent: Please contact support.\n");
}

#[test]
fn invalid_config_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("agent.toml");
    std::fs::write(&config, "[thresholds]\nclassifier = 3.0\n").unwrap();

    bin()
        .args(["--config", config.to_str().unwrap(), "ask", "--question", "hi"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("classifier threshold"));
}

#[test]
fn exported_kb_validates_and_answers() {
    let dir = tempfile::tempdir().unwrap();
    let kb = dir.path().join("kb.jsonl");

    bin()
        .args(["export-kb", "--output", kb.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("exported_entries=5"));

    bin()
        .args(["--kb", kb.to_str().unwrap(), "validate-kb"])
        .assert()
        .success()
        .stdout("valid entries=5\n");

    bin()
        .args(["--kb", kb.to_str().unwrap(), "ask", "--question", EVA_QUESTION])
        .assert()
        .success()
        .stdout(predicate::str::contains("EVA automates"));
}

#[test]
fn malformed_kb_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let kb = dir.path().join("kb.json");
    std::fs::write(&kb, r#"[{"question": "Q?", "answer": "A"}]"#).unwrap();

    bin()
        .args(["--kb", kb.to_str().unwrap(), "ask", "--question", "Q?"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid knowledge base"));
}

#[test]
fn eval_passes_and_fails_on_pass_rate() {
    let dir = tempfile::tempdir().unwrap();
    let cases = dir.path().join("cases.json");
    std::fs::write(
        &cases,
        serde_json::json!([
            {"case_id": "eva", "question": EVA_QUESTION, "expected_tier": "keyword",
             "expected_question": EVA_QUESTION},
            {"case_id": "weather", "question": "what's the weather today", "expected_tier": "none"}
        ])
        .to_string(),
    )
    .unwrap();

    bin()
        .args(["eval", "--cases", cases.to_str().unwrap(), "--min-pass-rate", "1.0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("passed=2 failed=0"));

    let failing = dir.path().join("failing.json");
    std::fs::write(
        &failing,
        serde_json::json!([
            {"case_id": "wrong", "question": "what's the weather today",
             "expected_tier": "classifier"}
        ])
        .to_string(),
    )
    .unwrap();

    bin()
        .args(["eval", "--cases", failing.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("below required"));
}

#[test]
fn model_path_without_tokenizer_is_rejected() {
    bin()
        .args(["--model-path", "missing.safetensors", "ask", "--question", "hi"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--tokenizer-path"));
}
