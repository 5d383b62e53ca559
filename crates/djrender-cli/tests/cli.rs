use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// The binary with its config directory pointed into `home`.
fn djrender(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("djrender").unwrap();
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join(".config"));
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let home = TempDir::new().unwrap();
    djrender(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("info"))
        .stdout(predicate::str::contains("render"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_config_path_and_init() {
    let home = TempDir::new().unwrap();
    djrender(&home)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.json"))
        .stdout(predicate::str::contains("not created"));

    let target = home.path().join("custom.json");
    djrender(&home)
        .args(["config", "init", "--output"])
        .arg(&target)
        .assert()
        .success();
    assert!(target.exists());

    djrender(&home)
        .args(["config", "init", "--output"])
        .arg(&target)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_config_show_defaults() {
    let home = TempDir::new().unwrap();
    djrender(&home)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("built-in defaults"))
        .stdout(predicate::str::contains("\"max_dimension\": 10000"));
}

#[test]
fn test_config_check() {
    let home = TempDir::new().unwrap();
    let good = home.path().join("good.json");
    std::fs::write(&good, r#"{ "page_wait": { "max_attempts": 20 } }"#).unwrap();
    djrender(&home)
        .args(["config", "check"])
        .arg(&good)
        .assert()
        .success()
        .stdout(predicate::str::contains("2.0s for a page"));

    let bad = home.path().join("bad.json");
    std::fs::write(&bad, r#"{ "foreign_extensions": [".pdf"] }"#).unwrap();
    djrender(&home)
        .args(["config", "check"])
        .arg(&bad)
        .assert()
        .failure()
        .stdout(predicate::str::contains("without the dot"));
}

#[test]
fn test_info_on_pdf_reports_foreign() {
    let home = TempDir::new().unwrap();
    let pdf = home.path().join("slides.pdf");
    std::fs::write(&pdf, b"not really a pdf").unwrap();

    djrender(&home)
        .arg("info")
        .arg(&pdf)
        .assert()
        .success()
        .stdout(predicate::str::contains("foreign"))
        .stdout(predicate::str::contains("612 x 792"));

    djrender(&home)
        .args(["info", "--format", "json"])
        .arg(&pdf)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"format\": \"foreign\""))
        .stdout(predicate::str::contains("\"page_count\": 1"));
}

#[test]
fn test_render_pdf_is_delegated() {
    let home = TempDir::new().unwrap();
    let pdf = home.path().join("slides.pdf");
    std::fs::write(&pdf, b"not really a pdf").unwrap();

    djrender(&home)
        .arg("render")
        .arg(&pdf)
        .arg("--output-dir")
        .arg(home.path().join("out"))
        .assert()
        .success()
        .stdout(predicate::str::contains("foreign renderer"));
}

#[test]
fn test_missing_input_fails() {
    let home = TempDir::new().unwrap();
    djrender(&home)
        .args(["info", "/definitely/not/here.djvu"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("file not found"));
}

#[test]
fn test_explicit_config_file_is_used() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("strict.json");
    std::fs::write(&config, r#"{ "foreign_extensions": [] }"#).unwrap();
    let pdf = home.path().join("slides.pdf");
    std::fs::write(&pdf, b"tiny").unwrap();

    // No longer classified by extension, so the size check rejects it.
    djrender(&home)
        .arg("--config")
        .arg(&config)
        .arg("info")
        .arg(&pdf)
        .assert()
        .failure()
        .stderr(predicate::str::contains("too small"));
}
