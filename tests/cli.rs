use std::fs;

use predicates::prelude::*;

#[test]
fn help_lists_subcommands() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("hndigest");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("stories"))
        .stdout(predicate::str::contains("extract"));
}

#[test]
fn extract_file_prints_semantic_document() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let page = temp.path().join("page.html");
    fs::write(
        &page,
        "<html><body><nav>menu</nav><article><h1>T</h1><p>Body.</p></article></body></html>",
    )?;

    let output = assert_cmd::cargo::cargo_bin_cmd!("hndigest")
        .args(["extract", "--file", page.to_str().unwrap()])
        .output()?;
    assert!(output.status.success());

    let doc: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(doc["title"], "T");
    assert_eq!(
        doc["blocks"],
        serde_json::json!([
            {"kind": "heading", "level": 1, "text": "T"},
            {"kind": "paragraph", "text": "Body."}
        ])
    );
    Ok(())
}

#[test]
fn extract_of_script_only_page_fails_with_empty_content() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let page = temp.path().join("app.html");
    fs::write(
        &page,
        "<html><body><div id=\"root\"></div><script>render()</script></body></html>",
    )?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("hndigest");
    cmd.args(["extract", "--file", page.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("extract"));
    Ok(())
}

#[test]
fn extract_requires_a_source() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("hndigest");
    cmd.arg("extract").assert().failure();
}

#[test]
fn build_without_credentials_fails_before_network() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("hndigest");
    cmd.env_remove("GMAIL_ADDRESS")
        .env_remove("GMAIL_APP_PASSWORD")
        .env_remove("KINDLE_EMAILS")
        .env("HN_ALGOLIA_API", "http://127.0.0.1:9/unused")
        .args(["build", "--date", "2024-05-01"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("GMAIL_ADDRESS"));
}

#[test]
fn rust_log_debug_emits_parsed_cli() {
    let temp = tempfile::TempDir::new().unwrap();
    let page = temp.path().join("page.html");
    fs::write(&page, "<html><body><article><p>Body.</p></article></body></html>").unwrap();
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("hndigest");
    cmd.env("RUST_LOG", "debug")
        .args(["extract", "--file", page.to_str().unwrap()])
        .assert()
        .success()
        .stderr(predicate::str::contains("parsed cli"));
}
