//! Production gateway backed by the `kubectl` binary.
//!
//! Each verb is one `kubectl` invocation with JSON output. A non-zero exit
//! is classified from stderr by [`classify_failure`].

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{GatewayError, GatewayResult, classify_failure};
use crate::gateway::{ClusterGateway, ExecOutput, ProbeOutcome, RolloutState};
use crate::manifest;
use crate::probe::http_probe;

/// How to reach the cluster.
#[derive(Debug, Clone)]
pub struct KubectlConfig {
    /// Path or name of the kubectl binary.
    pub binary: String,
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
    /// `--request-timeout` for every call except `rollout status`.
    pub request_timeout: Duration,
}

impl Default for KubectlConfig {
    fn default() -> Self {
        Self {
            binary: "kubectl".to_string(),
            kubeconfig: None,
            context: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Captured output of a kubectl run.
struct Captured {
    stdout: Vec<u8>,
    stderr: String,
    exit_code: i32,
}

pub struct KubectlGateway {
    config: KubectlConfig,
}

impl KubectlGateway {
    pub fn new(config: KubectlConfig) -> Self {
        Self { config }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        if let Some(path) = &self.config.kubeconfig {
            cmd.arg("--kubeconfig").arg(path);
        }
        if let Some(context) = &self.config.context {
            cmd.arg("--context").arg(context);
        }
        cmd.args(args);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run kubectl without judging the exit code.
    async fn capture(&self, args: &[&str], stdin: Option<&[u8]>) -> GatewayResult<Captured> {
        debug!(args = ?args, "kubectl");
        let mut cmd = self.command(args);
        if stdin.is_some() {
            cmd.stdin(Stdio::piped());
        }
        let mut child = cmd
            .spawn()
            .map_err(|e| GatewayError::Permanent(format!("spawn {}: {e}", self.config.binary)))?;

        if let Some(input) = stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            pipe.write_all(input)
                .await
                .map_err(|e| GatewayError::Transient(format!("write kubectl stdin: {e}")))?;
            drop(pipe);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| GatewayError::Transient(format!("wait for kubectl: {e}")))?;

        Ok(Captured {
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    /// Run kubectl and classify a non-zero exit as an error.
    async fn run(
        &self,
        args: &[&str],
        stdin: Option<&[u8]>,
        kind: &str,
        name: &str,
    ) -> GatewayResult<Vec<u8>> {
        let captured = self.capture(args, stdin).await?;
        if captured.exit_code != 0 {
            return Err(classify_failure(&captured.stderr, kind, name));
        }
        Ok(captured.stdout)
    }

    fn request_timeout_arg(&self) -> String {
        format!("--request-timeout={}s", self.config.request_timeout.as_secs().max(1))
    }
}

fn parse_json(bytes: &[u8]) -> GatewayResult<Value> {
    serde_json::from_slice(bytes)
        .map_err(|e| GatewayError::Permanent(format!("decode kubectl output: {e}")))
}

/// Whether `rollout status` failed because its deadline passed.
fn is_rollout_timeout(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("timed out waiting") || lower.contains("exceeded its progress deadline")
}

#[async_trait]
impl ClusterGateway for KubectlGateway {
    async fn get(&self, kind: &str, name: &str, namespace: &str) -> GatewayResult<Value> {
        let kind = manifest::normalize_kind(kind);
        let timeout = self.request_timeout_arg();
        let out = self
            .run(
                &["get", kind.as_str(), name, "-n", namespace, "-o", "json", timeout.as_str()],
                None,
                &kind,
                name,
            )
            .await?;
        parse_json(&out)
    }

    async fn list(
        &self,
        kind: &str,
        namespace: &str,
        selector: Option<&str>,
    ) -> GatewayResult<Vec<Value>> {
        let kind = manifest::normalize_kind(kind);
        let timeout = self.request_timeout_arg();
        let mut args = vec!["get", kind.as_str(), "-n", namespace, "-o", "json", timeout.as_str()];
        if let Some(selector) = selector {
            args.push("-l");
            args.push(selector);
        }
        let out = self.run(&args, None, &kind, "*").await?;
        let list = parse_json(&out)?;
        Ok(list
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn apply(&self, object: &Value) -> GatewayResult<()> {
        let kind = manifest::kind(object).unwrap_or_default();
        let name = manifest::name(object).unwrap_or_default().to_string();
        let body = serde_json::to_vec(object)
            .map_err(|e| GatewayError::InvalidManifest(e.to_string()))?;
        let timeout = self.request_timeout_arg();
        self.run(&["apply", "-f", "-", timeout.as_str()], Some(body.as_slice()), &kind, &name)
            .await?;
        Ok(())
    }

    async fn patch(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        patch: &Value,
    ) -> GatewayResult<()> {
        let kind = manifest::normalize_kind(kind);
        let body = patch.to_string();
        let timeout = self.request_timeout_arg();
        self.run(
            &[
                "patch", kind.as_str(), name, "-n", namespace, "--type", "merge", "-p", body.as_str(), timeout.as_str(),
            ],
            None,
            &kind,
            name,
        )
        .await?;
        Ok(())
    }

    async fn set_image(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        container: &str,
        image: &str,
    ) -> GatewayResult<()> {
        let kind = manifest::normalize_kind(kind);
        let target = format!("{kind}/{name}");
        let assignment = format!("{container}={image}");
        let timeout = self.request_timeout_arg();
        self.run(
            &["set", "image", target.as_str(), assignment.as_str(), "-n", namespace, timeout.as_str()],
            None,
            &kind,
            name,
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, kind: &str, name: &str, namespace: &str) -> GatewayResult<()> {
        let kind = manifest::normalize_kind(kind);
        let timeout = self.request_timeout_arg();
        self.run(
            &["delete", kind.as_str(), name, "-n", namespace, "--wait=false", timeout.as_str()],
            None,
            &kind,
            name,
        )
        .await?;
        Ok(())
    }

    async fn rollout_status(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        timeout: Duration,
    ) -> GatewayResult<RolloutState> {
        let kind = manifest::normalize_kind(kind);
        let target = format!("{kind}/{name}");
        let deadline = format!("--timeout={}s", timeout.as_secs().max(1));
        let captured = self
            .capture(&["rollout", "status", target.as_str(), "-n", namespace, deadline.as_str()], None)
            .await?;
        if captured.exit_code == 0 {
            return Ok(RolloutState::Ready);
        }
        if is_rollout_timeout(&captured.stderr) {
            return Ok(RolloutState::Timeout);
        }
        Err(classify_failure(&captured.stderr, &kind, name))
    }

    async fn rollout_undo(
        &self,
        kind: &str,
        name: &str,
        namespace: &str,
        revision: Option<u32>,
    ) -> GatewayResult<()> {
        let kind = manifest::normalize_kind(kind);
        let target = format!("{kind}/{name}");
        let to_revision = revision.map(|r| format!("--to-revision={r}"));
        let mut args = vec!["rollout", "undo", target.as_str(), "-n", namespace];
        if let Some(flag) = &to_revision {
            args.push(flag.as_str());
        }
        self.run(&args, None, &kind, name).await?;
        Ok(())
    }

    async fn exec(
        &self,
        pod: &str,
        namespace: &str,
        command: &[String],
    ) -> GatewayResult<ExecOutput> {
        let mut args = vec!["exec", pod, "-n", namespace, "--"];
        args.extend(command.iter().map(String::as_str));
        let captured = self.capture(&args, None).await?;

        // kubectl passes the remote exit code through; only its own
        // failures are errors.
        if captured.exit_code != 0
            && (captured.stderr.contains("Error from server")
                || captured.stderr.starts_with("error:"))
        {
            return Err(classify_failure(&captured.stderr, "pod", pod));
        }
        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&captured.stdout).into_owned(),
            stderr: captured.stderr,
            exit_code: captured.exit_code,
        })
    }

    async fn logs(&self, pod: &str, namespace: &str, since: Duration) -> GatewayResult<String> {
        let since = format!("--since={}s", since.as_secs().max(1));
        let timeout = self.request_timeout_arg();
        let out = self
            .run(&["logs", pod, "-n", namespace, since.as_str(), timeout.as_str()], None, "pod", pod)
            .await?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    async fn probe_http(&self, url: &str, timeout: Duration) -> GatewayResult<ProbeOutcome> {
        http_probe(url, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_rollout_deadline() {
        assert!(is_rollout_timeout(
            "error: timed out waiting for the condition"
        ));
        assert!(is_rollout_timeout(
            "error: deployment \"api\" exceeded its progress deadline"
        ));
        assert!(!is_rollout_timeout("Error from server (NotFound)"));
    }

    #[tokio::test]
    async fn missing_binary_is_permanent() {
        let gateway = KubectlGateway::new(KubectlConfig {
            binary: "/nonexistent/kubectl-rollguard".to_string(),
            ..Default::default()
        });
        let err = gateway.get("deployment", "api", "default").await.unwrap_err();
        assert!(matches!(err, GatewayError::Permanent(_)));
    }

    #[test]
    fn command_includes_context_and_kubeconfig() {
        let gateway = KubectlGateway::new(KubectlConfig {
            kubeconfig: Some(PathBuf::from("/tmp/kubeconfig")),
            context: Some("staging".to_string()),
            ..Default::default()
        });
        let cmd = gateway.command(&["get", "pods"]);
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec!["--kubeconfig", "/tmp/kubeconfig", "--context", "staging", "get", "pods"]
        );
    }
}
