use assert_cmd::Command;
use predicates::prelude::*;

fn pdfscroll() -> Command {
    Command::cargo_bin("pdfscroll").expect("binary should be built")
}

#[test]
fn missing_file_argument_prints_usage() {
    pdfscroll()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn help_lists_overrides() {
    pdfscroll()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--batch-size"))
        .stdout(predicate::str::contains("--tps"));
}

#[test]
fn nonexistent_file_fails() {
    let temp = tempfile::tempdir().expect("temp dir should be created");

    pdfscroll()
        .arg(temp.path().join("missing.pdf"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("file does not exist"));
}

#[test]
fn invalid_override_fails_before_opening_the_document() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let document = temp.path().join("paper.pdf");
    let config = temp.path().join("config.toml");
    std::fs::write(&document, b"%PDF-1.4\n").expect("fixture should be written");
    std::fs::write(&config, "").expect("config should be written");

    pdfscroll()
        .arg(&document)
        .arg("--config")
        .arg(&config)
        .arg("--tps")
        .arg("0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("ticks_per_second"));
}

#[test]
fn unreadable_config_fails() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let document = temp.path().join("paper.pdf");
    std::fs::write(&document, b"%PDF-1.4\n").expect("fixture should be written");

    pdfscroll()
        .arg(&document)
        .arg("--config")
        .arg(temp.path().join("absent.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read config file"));
}
