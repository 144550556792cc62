//! Database reversal through the app's migration tool.
//!
//! The tool runs inside an app pod: `version_command` prints the current
//! migration version, `migrate_command <N>` moves to version N. Reverting
//! to the version the database is already at runs nothing.

use async_trait::async_trait;
use rollguard_cluster::manifest;
use rollguard_core::config::DatabaseSettings;
use rollguard_core::{BackupContents, Component};
use tracing::{info, warn};

use crate::error::RevertError;
use crate::reverter::{ComponentReverter, RevertContext, RevertTo, Reversal};

pub struct DatabaseReverter {
    pod_selector: String,
    version_command: Vec<String>,
    migrate_command: Vec<String>,
}

impl DatabaseReverter {
    pub fn new(settings: &DatabaseSettings, app_selector: &str) -> Self {
        Self {
            pod_selector: settings
                .pod_selector
                .clone()
                .unwrap_or_else(|| app_selector.to_string()),
            version_command: settings.version_command.clone(),
            migrate_command: settings.migrate_command.clone(),
        }
    }

    async fn pod(&self, ctx: &RevertContext<'_>) -> Result<String, RevertError> {
        let gateway = ctx.gateway;
        let pods = ctx
            .call("list", || gateway.list("pod", ctx.namespace, Some(&self.pod_selector)))
            .await?;
        pods.iter()
            .find_map(|p| manifest::name(p).map(str::to_string))
            .ok_or_else(|| {
                RevertError::Target(format!("no pod matches {} to run migrations", self.pod_selector))
            })
    }

    async fn run(
        &self,
        ctx: &RevertContext<'_>,
        pod: &str,
        command: &[String],
    ) -> Result<String, RevertError> {
        let gateway = ctx.gateway;
        let output = ctx
            .call("exec", || gateway.exec(pod, ctx.namespace, command))
            .await?;
        if !output.success() {
            return Err(RevertError::Command {
                command: command.join(" "),
                detail: format!("exit {}: {}", output.exit_code, output.stderr.trim()),
            });
        }
        Ok(output.stdout)
    }

    /// Current migration version.
    pub async fn version(&self, ctx: &RevertContext<'_>) -> Result<u64, RevertError> {
        let pod = self.pod(ctx).await?;
        let stdout = self.run(ctx, &pod, &self.version_command).await?;
        // Tools print banners; the version is the last number printed.
        stdout
            .split(|c: char| !c.is_ascii_digit())
            .rev()
            .find(|s| !s.is_empty())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| RevertError::Command {
                command: self.version_command.join(" "),
                detail: format!("no version in output {:?}", stdout.trim()),
            })
    }

    fn target_version(&self, to: RevertTo<'_>, current: u64) -> Result<u64, RevertError> {
        match to {
            RevertTo::Previous => current
                .checked_sub(1)
                .ok_or_else(|| RevertError::Target("database is at version 0".to_string())),
            RevertTo::Revision(n) => Ok(u64::from(n)),
            RevertTo::Snapshot { name, contents } => contents.database_version.ok_or_else(|| {
                RevertError::Target(format!("backup {name} has no database version"))
            }),
        }
    }
}

#[async_trait]
impl ComponentReverter for DatabaseReverter {
    fn component(&self) -> Component {
        Component::Database
    }

    fn accepts_revision(&self) -> bool {
        true
    }

    fn restorable_from(&self, contents: &BackupContents) -> bool {
        contents.database_version.is_some()
    }

    /// A database that cannot report its version is backed up without one.
    async fn snapshot(
        &self,
        ctx: &RevertContext<'_>,
        contents: &mut BackupContents,
    ) -> Result<(), RevertError> {
        match self.version(ctx).await {
            Ok(version) => contents.database_version = Some(version),
            Err(e) => warn!(error = %e, "database version unavailable for backup"),
        }
        Ok(())
    }

    async fn revert(
        &self,
        ctx: &RevertContext<'_>,
        to: RevertTo<'_>,
    ) -> Result<Reversal, RevertError> {
        let current = self.version(ctx).await?;
        let target = self.target_version(to, current)?;
        if current == target {
            return Ok(Reversal::already_at_target(format!(
                "database already at version {target}"
            )));
        }

        let pod = self.pod(ctx).await?;
        let mut command = self.migrate_command.clone();
        command.push(target.to_string());
        self.run(ctx, &pod, &command).await?;
        info!(from = current, to = target, "database migrated");
        Ok(Reversal::reverted(format!(
            "migrated from version {current} to {target}"
        )))
    }

    async fn validate(&self, ctx: &RevertContext<'_>, to: RevertTo<'_>) -> Result<(), RevertError> {
        let version = self.version(ctx).await?;
        let expected = match to {
            // One step back from wherever it was; the version alone says
            // nothing more.
            RevertTo::Previous => return Ok(()),
            other => self.target_version(other, version)?,
        };
        if version == expected {
            Ok(())
        } else {
            Err(RevertError::Validation(format!(
                "database at version {version}, expected {expected}"
            )))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use rollguard_cluster::{ExecOutput, FakeCluster, FakeOp, deployment_manifest};
    use rollguard_core::ComponentStatus;
    use rollguard_health::{GateSettings, HealthGate};

    use super::*;

    /// Answer `migrate version` / `migrate goto N` from a shared counter.
    pub(crate) fn install_migrator(fake: &FakeCluster, start: u64) -> Arc<AtomicU64> {
        let version = Arc::new(AtomicU64::new(start));
        let v = version.clone();
        fake.on_exec(Arc::new(move |_pod: &str, command: &[String]| {
            let stdout = match command {
                [tool, verb] if tool == "migrate" && verb == "version" => {
                    format!("{}\n", v.load(Ordering::SeqCst))
                }
                [tool, verb, n] if tool == "migrate" && verb == "goto" => {
                    v.store(n.parse().unwrap(), Ordering::SeqCst);
                    String::new()
                }
                _ => {
                    return Ok(ExecOutput {
                        stdout: String::new(),
                        stderr: "unknown command".to_string(),
                        exit_code: 2,
                    });
                }
            };
            Ok(ExecOutput {
                stdout,
                stderr: String::new(),
                exit_code: 0,
            })
        }));
        version
    }

    fn setup() -> (Arc<FakeCluster>, HealthGate, DatabaseReverter) {
        let fake = Arc::new(FakeCluster::new());
        fake.seed(deployment_manifest("prod", "api", "api", "api:v2", 1, &[("app", "api")]));
        let gate = HealthGate::new(fake.clone(), GateSettings::default());
        let reverter = DatabaseReverter::new(&DatabaseSettings::default(), "app=api");
        (fake, gate, reverter)
    }

    fn ctx<'a>(fake: &'a FakeCluster, gate: &'a HealthGate) -> RevertContext<'a> {
        RevertContext {
            gateway: fake,
            gate,
            namespace: "prod",
            retry_budget: 0,
            retry_backoff: Duration::from_millis(10),
            gate_attempts: 1,
            gate_interval: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn previous_steps_down_one_version() {
        let (fake, gate, reverter) = setup();
        let version = install_migrator(&fake, 42);
        let ctx = ctx(&fake, &gate);

        let reversal = reverter.revert(&ctx, RevertTo::Previous).await.unwrap();
        assert_eq!(reversal.status, ComponentStatus::Reverted);
        assert_eq!(version.load(Ordering::SeqCst), 41);
        reverter.validate(&ctx, RevertTo::Previous).await.unwrap();
    }

    #[tokio::test]
    async fn same_revision_twice_is_a_noop() {
        let (fake, gate, reverter) = setup();
        let version = install_migrator(&fake, 42);
        let ctx = ctx(&fake, &gate);

        let first = reverter.revert(&ctx, RevertTo::Revision(40)).await.unwrap();
        assert_eq!(first.status, ComponentStatus::Reverted);
        let second = reverter.revert(&ctx, RevertTo::Revision(40)).await.unwrap();
        assert_eq!(second.status, ComponentStatus::AlreadyAtTarget);
        assert_eq!(version.load(Ordering::SeqCst), 40);
        reverter.validate(&ctx, RevertTo::Revision(40)).await.unwrap();

        let migrations = fake
            .ops()
            .into_iter()
            .filter(|op| matches!(op, FakeOp::Exec { command, .. } if command[1] == "goto"))
            .count();
        assert_eq!(migrations, 1);
    }

    #[tokio::test]
    async fn snapshot_records_version() {
        let (fake, gate, reverter) = setup();
        install_migrator(&fake, 7);
        let mut contents = BackupContents::default();
        reverter.snapshot(&ctx(&fake, &gate), &mut contents).await.unwrap();
        assert_eq!(contents.database_version, Some(7));
    }

    #[tokio::test]
    async fn missing_tool_is_reported() {
        let (fake, gate, reverter) = setup();
        let ctx = ctx(&fake, &gate);
        let err = reverter.revert(&ctx, RevertTo::Previous).await.unwrap_err();
        assert!(matches!(err, RevertError::Command { .. }));

        // Snapshots tolerate it.
        let mut contents = BackupContents::default();
        reverter.snapshot(&ctx, &mut contents).await.unwrap();
        assert_eq!(contents.database_version, None);
    }
}
