use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

const ARTIFACTS: &[(&str, &str)] = &[
    ("pipeline/p1.json", r#"{"name":"p1","env":"dev"}"#),
    ("notebook/nb1.json", r#"{"name":"nb1"}"#),
    ("linkedService/ls1.json", r#"{"name":"ls1"}"#),
];

fn write_zip(path: &Path, files: &[(&str, &str)]) {
    let mut writer = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
    for (name, content) in files {
        writer
            .start_file(*name, zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
}

/// Write `artifacts.zip` and a `deploy.toml` whose `[target]` and later tables are `rest`.
fn write_project(dir: &Path, rest: &str) -> PathBuf {
    write_zip(&dir.join("artifacts.zip"), ARTIFACTS);
    let manifest_path = dir.join("deploy.toml");
    std::fs::write(
        &manifest_path,
        format!("[source]\nzip = \"artifacts.zip\"\n\n{rest}"),
    )
    .unwrap();
    manifest_path
}

fn deploy_cmd() -> Command {
    let mut cmd = Command::cargo_bin("workspace-deploy").unwrap();
    cmd.env_remove("WORKSPACE_DEPLOY_LOG");
    cmd
}

#[test]
fn test_help_command_succeeds() {
    let mut cmd = deploy_cmd();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Deploy workspace artifacts"));
}

#[test]
fn test_version_command_succeeds() {
    let mut cmd = deploy_cmd();
    cmd.arg("--version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("workspace-deploy"));
}

#[test]
fn test_invalid_subcommand() {
    let mut cmd = deploy_cmd();
    cmd.arg("invalid-command");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_list_command_with_missing_manifest() {
    let mut cmd = deploy_cmd();
    cmd.args(["list", "--manifest", "nonexistent.toml"]);
    cmd.assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Failed to read manifest file"));
}

#[test]
fn test_list_command_with_missing_manifest_in_cwd() {
    let temp_dir = tempdir().unwrap();

    let mut cmd = deploy_cmd();
    cmd.current_dir(temp_dir.path());
    cmd.arg("list");
    cmd.assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("could not find 'deploy.toml'"));
}

#[test]
fn test_list_command_with_invalid_manifest() {
    let temp_dir = tempdir().unwrap();
    let manifest_path = temp_dir.path().join("deploy.toml");
    std::fs::write(
        &manifest_path,
        "[source]\nftp = \"x\"\n[target]\nworkspace = \"ws\"\n",
    )
    .unwrap();

    let mut cmd = deploy_cmd();
    cmd.args(["list", "--manifest", manifest_path.to_str().unwrap()]);
    cmd.assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Failed to parse manifest file"));
}

#[test]
fn test_list_command_prints_plan_in_dependency_order() {
    let temp_dir = tempdir().unwrap();
    let manifest_path = write_project(temp_dir.path(), "[target]\nworkspace = \"ws\"\n");

    let mut cmd = deploy_cmd();
    cmd.args(["list", "--manifest", manifest_path.to_str().unwrap()]);
    let output = cmd.assert().success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();

    let ls1 = stdout.find("linkedService 'ls1'").unwrap();
    let nb1 = stdout.find("notebook 'nb1'").unwrap();
    let p1 = stdout.find("pipeline 'p1'").unwrap();
    assert!(ls1 < nb1 && nb1 < p1, "unexpected order:\n{stdout}");
}

#[test]
fn test_list_command_with_json_format() {
    let temp_dir = tempdir().unwrap();
    let manifest_path = write_project(
        temp_dir.path(),
        "[target]\nworkspace = \"ws\"\ntypes = [\"linkedService\", \"notebook\"]\n",
    );

    let mut cmd = deploy_cmd();
    cmd.args([
        "list",
        "--manifest",
        manifest_path.to_str().unwrap(),
        "--format",
        "json",
    ]);
    let output = cmd.assert().success();

    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let plan: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(plan["artifacts"].as_array().unwrap().len(), 2);
    assert_eq!(plan["artifacts"][0]["type"], "linkedService");
    assert_eq!(plan["artifacts"][0]["name"], "ls1");
    assert_eq!(plan["skipped"][0]["path"], "pipeline/p1.json");
}

#[test]
fn test_list_command_with_toml_format() {
    let temp_dir = tempdir().unwrap();
    let manifest_path = write_project(temp_dir.path(), "[target]\nworkspace = \"ws\"\n");

    let mut cmd = deploy_cmd();
    cmd.args([
        "list",
        "--manifest",
        manifest_path.to_str().unwrap(),
        "--format",
        "toml",
    ]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("[[artifacts]]"))
        .stdout(predicate::str::contains("notebook/nb1.json"));
}

#[test]
fn test_manifest_discovery_walks_up_directory_tree() {
    let temp_dir = tempdir().unwrap();
    write_project(temp_dir.path(), "[target]\nworkspace = \"ws\"\n");

    let sub_dir = temp_dir.path().join("subdir");
    std::fs::create_dir(&sub_dir).unwrap();

    // Run command from subdirectory - should find the manifest in parent
    let mut cmd = deploy_cmd();
    cmd.current_dir(&sub_dir);
    cmd.arg("list");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("pipeline 'p1'"));
}

#[test]
fn test_publish_without_error_policy_is_refused() {
    let temp_dir = tempdir().unwrap();
    let manifest_path = write_project(temp_dir.path(), "[target]\nworkspace = \"ws\"\n");

    let mut cmd = deploy_cmd();
    cmd.args([
        "publish",
        "--manifest",
        manifest_path.to_str().unwrap(),
        "--dry-run",
    ]);
    cmd.assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("no error policy chosen"));
}

#[test]
fn test_publish_dry_run() {
    let temp_dir = tempdir().unwrap();
    let manifest_path = write_project(temp_dir.path(), "[target]\nworkspace = \"ws\"\n");

    let mut cmd = deploy_cmd();
    cmd.args([
        "publish",
        "--manifest",
        manifest_path.to_str().unwrap(),
        "--on-error",
        "fail-fast",
        "--dry-run",
    ]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Successfully published 3 artifact(s)"));
}

#[test]
fn test_publish_dry_run_json_report() {
    let temp_dir = tempdir().unwrap();
    let manifest_path = write_project(
        temp_dir.path(),
        "[target]\nworkspace = \"ws\"\ntypes = [\"linkedService\", \"notebook\"]\n\n[publish]\non-error = \"continue\"\nparallel = true\n",
    );

    let mut cmd = deploy_cmd();
    cmd.args([
        "publish",
        "--manifest",
        manifest_path.to_str().unwrap(),
        "--dry-run",
        "--format",
        "json",
    ]);
    let output = cmd.assert().success();

    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["succeeded"], 2);
    assert_eq!(report["failed"], 0);
    assert_eq!(report["skipped"], 1);
}

#[test]
fn test_publish_with_invalid_replace_pair() {
    let temp_dir = tempdir().unwrap();
    let manifest_path = write_project(temp_dir.path(), "[target]\nworkspace = \"ws\"\n");

    let mut cmd = deploy_cmd();
    cmd.args([
        "publish",
        "--manifest",
        manifest_path.to_str().unwrap(),
        "--on-error",
        "continue",
        "--replace",
        "missing-separator",
    ]);
    cmd.assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("invalid --replace"));
}

#[test]
fn test_publish_with_missing_archive() {
    let temp_dir = tempdir().unwrap();
    let manifest_path = temp_dir.path().join("deploy.toml");
    std::fs::write(
        &manifest_path,
        "[source]\nzip = \"missing.zip\"\n[target]\nworkspace = \"ws\"\n[publish]\non-error = \"continue\"\n",
    )
    .unwrap();

    let mut cmd = deploy_cmd();
    cmd.args([
        "publish",
        "--manifest",
        manifest_path.to_str().unwrap(),
        "--dry-run",
    ]);
    cmd.assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Failed to acquire artifacts"));
}

#[test]
fn test_publish_with_endpoint_missing_scheme() {
    let temp_dir = tempdir().unwrap();
    let manifest_path = write_project(
        temp_dir.path(),
        "[target]\nendpoint = \"localhost:8080\"\n\n[publish]\non-error = \"continue\"\n",
    );

    let mut cmd = deploy_cmd();
    cmd.args(["publish", "--manifest", manifest_path.to_str().unwrap()]);
    cmd.assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Failed to parse manifest file"))
        .stderr(predicate::str::contains("must be an absolute http or https URL"));
}

#[test]
fn test_publish_to_endpoint_reports_failures() {
    use httptest::{Expectation, Server, all_of, matchers::*, responders::*};

    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("PUT", "/linkedServices/ls1"),
            request::headers(contains(("authorization", "Bearer cli-token"))),
        ])
        .respond_with(status_code(200)),
    );
    server.expect(
        Expectation::matching(request::method_path("PUT", "/notebooks/nb1"))
            .respond_with(status_code(409).body("conflict")),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method_path("PUT", "/pipelines/p1"),
            request::body(matches("\"env\":\"prod\"")),
        ])
        .respond_with(status_code(201)),
    );

    let temp_dir = tempdir().unwrap();
    let manifest_path = write_project(
        temp_dir.path(),
        &format!(
            "[target]\nendpoint = \"{}\"\n\n[auth]\nmethod = \"token-env\"\n\n[publish]\non-error = \"continue\"\n",
            server.url_str("")
        ),
    );

    let mut cmd = deploy_cmd();
    cmd.env("WORKSPACE_DEPLOY_TOKEN", "cli-token");
    cmd.args([
        "publish",
        "--manifest",
        manifest_path.to_str().unwrap(),
        "--replace",
        "\"env\":\"dev\"=\"env\":\"prod\"",
    ]);
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("notebook 'nb1'"))
        .stderr(predicate::str::contains("1 artifact(s) failed to publish"));
}

#[test]
fn test_token_command_with_missing_variable() {
    let temp_dir = tempdir().unwrap();
    let manifest_path = write_project(
        temp_dir.path(),
        "[target]\nworkspace = \"ws\"\n[auth]\nmethod = \"token-env\"\n",
    );

    let mut cmd = deploy_cmd();
    cmd.env_remove("WORKSPACE_DEPLOY_TOKEN");
    cmd.args(["token", "--manifest", manifest_path.to_str().unwrap()]);
    cmd.assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("WORKSPACE_DEPLOY_TOKEN"));
}

#[test]
fn test_token_command_hides_the_token_unless_asked() {
    let temp_dir = tempdir().unwrap();
    let manifest_path = write_project(
        temp_dir.path(),
        "[target]\nworkspace = \"ws\"\n[auth]\nmethod = \"token-env\"\nvariable = \"MY_DEPLOY_TOKEN\"\n",
    );

    let mut cmd = deploy_cmd();
    cmd.env("MY_DEPLOY_TOKEN", "s3cr3t");
    cmd.args(["token", "--manifest", manifest_path.to_str().unwrap()]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Acquired an access token"))
        .stdout(predicate::str::contains("s3cr3t").not());

    let mut cmd = deploy_cmd();
    cmd.env("MY_DEPLOY_TOKEN", "s3cr3t");
    cmd.args([
        "token",
        "--manifest",
        manifest_path.to_str().unwrap(),
        "--show",
    ]);
    cmd.assert().success().stdout("s3cr3t\n");
}
