//! CLI integration tests for the rebrand binary.
//!
//! These run the compiled binary. Nothing here touches the network: `run`
//! is exercised with `--offline` against local files.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

/// Get a Command instance for the rebrand binary
#[allow(deprecated)]
fn rebrand_cmd() -> Command {
    let mut cmd = Command::cargo_bin("rebrand").expect("Failed to find rebrand binary");
    cmd.env_remove("RUST_LOG").env_remove("OPENAI_API_KEY");
    cmd
}

const BRAND_GUIDE: &str = "Primary: Deep Navy (#1F3A5F)\nHeadings: Montserrat\nBody: Lato\n";

fn write_template(dir: &Path, elements: serde_json::Value) -> std::path::PathBuf {
    let path = dir.join("funnel.json");
    std::fs::write(&path, serde_json::to_string_pretty(&elements).unwrap()).unwrap();
    path
}

// ============================================================================
// --help and --version
// ============================================================================

#[test]
fn test_help_lists_subcommands() {
    rebrand_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Regenerate template images to match a brand guide",
        ))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("prompt"))
        .stdout(predicate::str::contains("run"));
}

#[test]
fn test_version_flag() {
    rebrand_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_missing_subcommand_fails() {
    rebrand_cmd().assert().failure();
}

// ============================================================================
// plan
// ============================================================================

#[test]
fn test_plan_prints_tasks_with_sizes() {
    let dir = tempfile::tempdir().unwrap();
    let template = write_template(
        dir.path(),
        serde_json::json!([
            {"element_id": "headline", "type": "text"},
            {"element_id": "hero_image", "type": "image", "url": "https://cdn.example.com/hero.png", "width": 1600, "height": 900},
            {"element_id": "logo", "type": "image", "url": "https://cdn.example.com/logo.png", "width": 400, "height": 400, "transparent_bg": "true"}
        ]),
    );

    let output = rebrand_cmd()
        .args(["plan", "--template"])
        .arg(&template)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let plan: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let entries = plan.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["task"]["elementId"], "hero_image");
    assert_eq!(entries[0]["size"], "1536x1024");
    assert_eq!(entries[1]["size"], "1024x1024");
    assert_eq!(entries[1]["task"]["transparentBackground"], true);
}

#[test]
fn test_plan_rejects_malformed_template() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();

    rebrand_cmd()
        .args(["plan", "--template"])
        .arg(&path)
        .assert()
        .failure();
}

#[test]
fn test_plan_missing_file_names_path() {
    rebrand_cmd()
        .args(["plan", "--template", "/nonexistent/funnel.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("/nonexistent/funnel.json"));
}

// ============================================================================
// prompt
// ============================================================================

#[test]
fn test_prompt_for_logo() {
    let dir = tempfile::tempdir().unwrap();
    let guide = dir.path().join("brand.md");
    std::fs::write(&guide, BRAND_GUIDE).unwrap();

    rebrand_cmd()
        .args(["prompt", "--element-id", "logo", "--transparent", "--brand-guide"])
        .arg(&guide)
        .assert()
        .success()
        .stdout(predicate::str::starts_with(
            "Redesign this logo to match CourseCreator360 brand.",
        ))
        .stdout(predicate::str::contains("Use transparent background."))
        .stdout(predicate::str::contains("#1F3A5F"));
}

#[test]
fn test_prompt_uses_configured_brand_name() {
    let dir = tempfile::tempdir().unwrap();
    let guide = dir.path().join("brand.md");
    std::fs::write(&guide, BRAND_GUIDE).unwrap();
    let config = dir.path().join("rebrand.toml");
    std::fs::write(&config, "[generation]\nbrand_name = \"Acme\"\n").unwrap();

    rebrand_cmd()
        .args(["prompt", "--element-id", "feature_photo", "--alt-text", "a laptop"])
        .arg("--brand-guide")
        .arg(&guide)
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Redesign this image to match Acme brand guidelines.",
        ))
        .stdout(predicate::str::contains("The image should depict: a laptop."));
}

// ============================================================================
// config
// ============================================================================

#[test]
fn test_config_prints_effective_settings() {
    rebrand_cmd()
        .arg("config")
        .env("REBRAND__BATCH__CONCURRENCY_LIMIT", "5")
        .assert()
        .success()
        .stdout(predicate::str::contains("concurrency_limit = 5"))
        .stdout(predicate::str::contains("image_model = \"gpt-image-1\""));
}

// ============================================================================
// run
// ============================================================================

#[test]
fn test_run_requires_api_key_unless_offline() {
    let dir = tempfile::tempdir().unwrap();
    let guide = dir.path().join("brand.md");
    std::fs::write(&guide, BRAND_GUIDE).unwrap();
    let template = write_template(dir.path(), serde_json::json!([]));

    rebrand_cmd()
        .args(["run", "--brand-guide"])
        .arg(&guide)
        .arg("--template")
        .arg(&template)
        .assert()
        .failure()
        .stderr(predicate::str::contains("OPENAI_API_KEY"));
}

#[test]
fn test_offline_run_writes_images() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("hero.png");
    let source_bytes = b"\x89PNG\r\n\x1a\nhero";
    std::fs::write(&source, source_bytes).unwrap();
    let guide = dir.path().join("brand.md");
    std::fs::write(&guide, BRAND_GUIDE).unwrap();
    let template = write_template(
        dir.path(),
        serde_json::json!([
            {"element_id": "hero_image", "type": "image", "url": source.to_str().unwrap(), "width": 1200, "height": 800}
        ]),
    );
    let out = dir.path().join("out");

    let output = rebrand_cmd()
        .args(["--quiet", "run", "--offline", "--brand-guide"])
        .arg(&guide)
        .arg("--template")
        .arg(&template)
        .arg("--out")
        .arg(&out)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let report: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(report["batch"]["succeeded"], 1);
    assert_eq!(report["batch"]["failed"], 0);
    assert_eq!(report["cost"]["images"]["imagesGenerated"], 1);

    let key = report["batch"]["items"][0]["objectKey"].as_str().unwrap();
    assert_eq!(std::fs::read(out.join(key)).unwrap(), source_bytes);
}

#[test]
fn test_offline_run_with_failures_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let guide = dir.path().join("brand.md");
    std::fs::write(&guide, BRAND_GUIDE).unwrap();
    let missing = dir.path().join("missing.png");
    let template = write_template(
        dir.path(),
        serde_json::json!([
            {"element_id": "hero_image", "type": "image", "url": missing.to_str().unwrap()}
        ]),
    );

    rebrand_cmd()
        .args(["run", "--offline", "--brand-guide"])
        .arg(&guide)
        .arg("--template")
        .arg(&template)
        .arg("--out")
        .arg(dir.path().join("out"))
        .assert()
        .code(2)
        .stdout(predicate::str::contains("\"failedStage\": \"download\""));
}
