//! End-to-end tests running the `anyappctl` binary against the mock daemon

use anyappctl::test_utils::{MockServer, MOCK_ZONE};
use anyhow::Result;
use serde_json::Value;
use std::process::Output;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tokio::time::timeout;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

const MANIFEST: &str = r#"apiVersion: dcp.hiro.io/v1
kind: AnyApplication
metadata:
  name: web
spec:
  application:
    helm:
      repository: https://charts.example.com
      chart: nginx
      version: 1.0.0
  placement-strategy:
    strategy: Global
"#;

struct Harness {
    server_url: String,
    _server: MockServer,
    dir: TempDir,
}

impl Harness {
    async fn start() -> Result<Self> {
        let (server, server_url) = MockServer::new().start().await?;
        Ok(Self {
            server_url,
            _server: server,
            dir: TempDir::new()?,
        })
    }

    fn write_manifest(&self) -> Result<String> {
        let path = self.dir.path().join("web.yaml");
        std::fs::write(&path, MANIFEST)?;
        Ok(path.to_string_lossy().into_owned())
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        let mut command = Command::new(env!("CARGO_BIN_EXE_anyappctl"));
        command
            .args(["--server", &self.server_url, "--no-config"])
            .args(args)
            .env_remove("ANYAPP_SERVER")
            .env_remove("ANYAPP_FORMAT")
            .env_remove("ANYAPP_TIMEOUT")
            .env_remove("ANYAPP_VERBOSE")
            .env("NO_COLOR", "1");
        Ok(timeout(COMMAND_TIMEOUT, command.output()).await??)
    }

    async fn run_success(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args).await?;
        if !output.status.success() {
            anyhow::bail!(
                "anyappctl {:?} failed with {}: stderr: {}, stdout: {}",
                args,
                output.status,
                String::from_utf8_lossy(&output.stderr),
                String::from_utf8_lossy(&output.stdout)
            );
        }
        Ok(String::from_utf8(output.stdout)?)
    }

    async fn run_failure(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args).await?;
        if output.status.success() {
            anyhow::bail!(
                "expected anyappctl {:?} to fail: {}",
                args,
                String::from_utf8_lossy(&output.stdout)
            );
        }
        Ok(String::from_utf8(output.stderr)?)
    }
}

#[tokio::test]
async fn test_info_table_and_json() -> Result<()> {
    let harness = Harness::start().await?;

    let output = harness.run_success(&["info"]).await?;
    assert!(output.contains(MOCK_ZONE), "{}", output);

    let output = harness.run_success(&["--format", "json", "info"]).await?;
    let json: Value = serde_json::from_str(&output)?;
    assert_eq!(json["zone"], MOCK_ZONE);
    Ok(())
}

#[tokio::test]
async fn test_apply_place_get_delete() -> Result<()> {
    let harness = Harness::start().await?;
    let manifest = harness.write_manifest()?;

    let output = harness.run_success(&["apply", "-f", &manifest]).await?;
    assert!(output.contains("default/web created"), "{}", output);
    let output = harness.run_success(&["apply", "-f", &manifest]).await?;
    assert!(output.contains("default/web configured"), "{}", output);

    let output = harness
        .run_success(&["place", "web", "--zones", "zone-a,zone-b"])
        .await?;
    assert!(output.contains("zone-a, zone-b"), "{}", output);

    let output = harness.run_success(&["list"]).await?;
    assert!(output.contains("web"), "{}", output);
    assert!(output.contains("nginx:1.0.0"), "{}", output);

    let output = harness.run_success(&["-f", "json", "get", "default/web"]).await?;
    let json: Value = serde_json::from_str(&output)?;
    assert_eq!(json["status"]["owner"], MOCK_ZONE);

    harness.run_success(&["delete", "default/web"]).await?;
    let stderr = harness.run_failure(&["get", "default/web"]).await?;
    assert!(stderr.contains("not found"), "{}", stderr);
    Ok(())
}

#[tokio::test]
async fn test_events_and_reports() -> Result<()> {
    let harness = Harness::start().await?;
    let manifest = harness.write_manifest()?;
    harness.run_success(&["apply", "-f", &manifest]).await?;

    let output = harness.run_success(&["events", "default/web"]).await?;
    assert!(output.contains("Created"), "{}", output);

    let output = harness.run_success(&["status", "default/web"]).await?;
    assert!(output.contains("No workloads deployed"), "{}", output);

    let output = harness.run_success(&["spec", "default/web"]).await?;
    assert!(output.contains("No resources declared"), "{}", output);
    Ok(())
}

#[tokio::test]
async fn test_error_handling() -> Result<()> {
    let harness = Harness::start().await?;

    let stderr = harness.run_failure(&["get", "a/b/c"]).await?;
    assert!(stderr.contains("expected <namespace>/<name>"), "{}", stderr);

    let missing = harness.dir.path().join("missing.yaml");
    let stderr = harness
        .run_failure(&["apply", "-f", &missing.to_string_lossy()])
        .await?;
    assert!(stderr.contains("missing.yaml"), "{}", stderr);

    let output = Command::new(env!("CARGO_BIN_EXE_anyappctl"))
        .args(["--server", "zone-a", "--no-config", "info"])
        .output()
        .await?;
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Configuration error"), "{}", stderr);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_server() -> Result<()> {
    let output = Command::new(env!("CARGO_BIN_EXE_anyappctl"))
        .args(["--server", "http://127.0.0.1:9", "--no-config", "health"])
        .env("NO_COLOR", "1")
        .output()
        .await?;
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("unreachable"), "{}", stdout);
    Ok(())
}

#[tokio::test]
async fn test_completion_needs_no_server() -> Result<()> {
    let output = Command::new(env!("CARGO_BIN_EXE_anyappctl"))
        .args(["completion", "bash"])
        .output()
        .await?;
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("anyappctl"));
    Ok(())
}
