//! Application reversal: the app workload and its worker.
//!
//! With blue-green the app runs as `{app}-blue` or `{app}-green` and the
//! service's `color` selector says which one is live. Snapshots record
//! the live color's workload together with the service; restoring one
//! brings that workload back, points the service at it again and removes
//! any other color the backup does not hold.

use async_trait::async_trait;
use rollguard_cluster::{RolloutState, manifest};
use rollguard_core::config::ComponentScope;
use rollguard_core::{BackupContents, Component};
use rollguard_health::GateTarget;
use serde_json::{Map, Value, json};
use tracing::info;

use crate::error::RevertError;
use crate::objects::{backed_up, describe, restore, verify};
use crate::reverter::{ComponentReverter, RevertContext, RevertTo, Reversal};

/// Service label and selector key naming the live blue-green color.
const COLOR_LABEL: &str = "color";
const COLORS: [&str; 2] = ["blue", "green"];

pub struct ApplicationReverter {
    app: String,
    worker: Option<String>,
    service: String,
    app_selector: String,
    scope: ComponentScope,
}

/// The app workload serving traffic right now.
struct LiveApp {
    workload: String,
    color: Option<String>,
}

fn color_of(service: &Value) -> Option<&str> {
    manifest::label(service, COLOR_LABEL).or_else(|| {
        service
            .pointer("/spec/selector")
            .and_then(|s| s.get(COLOR_LABEL))
            .and_then(Value::as_str)
    })
}

fn selector_of(service: &Value) -> Map<String, Value> {
    service
        .pointer("/spec/selector")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Whether `live` routes the way `backup` did.
fn same_route(live: &Value, backup: &Value) -> bool {
    selector_of(live) == selector_of(backup)
        && manifest::label(live, COLOR_LABEL) == manifest::label(backup, COLOR_LABEL)
}

fn is_kind(object: &Value, kind: &str) -> bool {
    manifest::kind(object).as_deref() == Some(kind)
}

impl ApplicationReverter {
    pub fn new(app: &str, worker: Option<&str>, app_selector: &str, scope: ComponentScope) -> Self {
        Self {
            app: app.to_string(),
            worker: worker.map(str::to_string),
            service: app.to_string(),
            app_selector: app_selector.to_string(),
            scope,
        }
    }

    /// Service carrying the blue-green color; defaults to the app's name.
    pub fn with_service(mut self, service: &str) -> Self {
        self.service = service.to_string();
        self
    }

    async fn service(&self, ctx: &RevertContext<'_>) -> Result<Option<Value>, RevertError> {
        let gateway = ctx.gateway;
        match ctx
            .call("get", || gateway.get("service", &self.service, ctx.namespace))
            .await
        {
            Ok(service) => Ok(Some(service)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// `{app}-{color}` when the service routes by a color whose workload
    /// exists, the plain app workload otherwise.
    async fn live_app(
        &self,
        ctx: &RevertContext<'_>,
        service: Option<&Value>,
    ) -> Result<LiveApp, RevertError> {
        if let Some(color) = service.and_then(color_of) {
            let name = format!("{}-{color}", self.app);
            let gateway = ctx.gateway;
            match ctx
                .call("get", || gateway.get("deployment", &name, ctx.namespace))
                .await
            {
                Ok(_) => {
                    return Ok(LiveApp {
                        workload: name,
                        color: Some(color.to_string()),
                    });
                }
                Err(e) if !e.is_not_found() => return Err(e.into()),
                Err(_) => {}
            }
        }
        Ok(LiveApp {
            workload: self.app.clone(),
            color: None,
        })
    }

    /// The live workloads to undo. A blue-green rollout only touches the
    /// app, so the worker stays put.
    fn undo_targets<'a>(&'a self, live: &'a LiveApp) -> Vec<&'a str> {
        let mut targets = vec![live.workload.as_str()];
        if live.color.is_none() {
            targets.extend(self.worker.as_deref());
        }
        targets
    }

    async fn undo(
        &self,
        ctx: &RevertContext<'_>,
        revision: Option<u32>,
    ) -> Result<String, RevertError> {
        let service = self.service(ctx).await?;
        let live = self.live_app(ctx, service.as_ref()).await?;
        let gateway = ctx.gateway;
        let targets = self.undo_targets(&live);
        for workload in &targets {
            ctx.call("rollout_undo", || {
                gateway.rollout_undo("deployment", workload, ctx.namespace, revision)
            })
            .await?;
            info!(%workload, ?revision, "rollout undone");
        }
        Ok(targets.join(", "))
    }

    async fn await_rollout(
        &self,
        ctx: &RevertContext<'_>,
        workload: &str,
    ) -> Result<(), RevertError> {
        let gateway = ctx.gateway;
        let timeout = ctx.gate_interval * ctx.gate_attempts.max(1);
        let state = ctx
            .call("rollout_status", || {
                gateway.rollout_status("deployment", workload, ctx.namespace, timeout)
            })
            .await?;
        if state == RolloutState::Ready {
            Ok(())
        } else {
            Err(RevertError::Validation(format!(
                "{workload} did not finish rolling out"
            )))
        }
    }

    /// Point the service back the way the backup had it. Keys the backup
    /// lacks are removed from the live selector.
    async fn route(&self, ctx: &RevertContext<'_>, backup: &Value) -> Result<bool, RevertError> {
        let gateway = ctx.gateway;
        let Some(live) = self.service(ctx).await? else {
            let mut desired = manifest::normalized(backup);
            desired["metadata"]["namespace"] = Value::String(ctx.namespace.to_string());
            ctx.call("apply", || gateway.apply(&desired)).await?;
            info!(service = %self.service, "service recreated from backup");
            return Ok(true);
        };
        if same_route(&live, backup) {
            return Ok(false);
        }

        let wanted = selector_of(backup);
        let mut selector: Map<String, Value> = selector_of(&live)
            .keys()
            .filter(|k| !wanted.contains_key(*k))
            .map(|k| (k.clone(), Value::Null))
            .collect();
        selector.extend(wanted);
        let color = manifest::label(backup, COLOR_LABEL).map_or(Value::Null, |c| json!(c));
        let patch = json!({
            "metadata": {"labels": {COLOR_LABEL: color}},
            "spec": {"selector": selector},
        });
        ctx.call("patch", || {
            gateway.patch("service", &self.service, ctx.namespace, &patch)
        })
        .await?;
        info!(service = %self.service, color = ?color_of(backup), "traffic restored");
        Ok(true)
    }

    /// Delete colored workloads the backup does not hold.
    async fn prune_colors(
        &self,
        ctx: &RevertContext<'_>,
        objects: &[Value],
    ) -> Result<usize, RevertError> {
        let gateway = ctx.gateway;
        let mut removed = 0;
        for color in COLORS {
            let name = format!("{}-{color}", self.app);
            let kept = objects
                .iter()
                .any(|o| is_kind(o, "deployment") && manifest::name(o) == Some(name.as_str()));
            if kept {
                continue;
            }
            match ctx
                .call("delete", || gateway.delete("deployment", &name, ctx.namespace))
                .await
            {
                Ok(()) => {
                    info!(workload = %name, "workload not in backup removed");
                    removed += 1;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    fn is_service(&self, object: &Value) -> bool {
        is_kind(object, "service") && manifest::name(object) == Some(self.service.as_str())
    }

    async fn restore_snapshot(
        &self,
        ctx: &RevertContext<'_>,
        objects: &[Value],
    ) -> Result<usize, RevertError> {
        let service = objects.iter().find(|o| self.is_service(o));
        let (deployments, others): (Vec<Value>, Vec<Value>) = objects
            .iter()
            .filter(|o| !self.is_service(o))
            .cloned()
            .partition(|o| is_kind(o, "deployment"));

        // Workloads first, so the service never routes to pods that are
        // not there yet.
        let mut changed = restore(ctx, &deployments).await?;
        for deployment in &deployments {
            if let Some(name) = manifest::name(deployment) {
                self.await_rollout(ctx, name).await?;
            }
        }
        changed += restore(ctx, &others).await?;
        if let Some(service) = service {
            if self.route(ctx, service).await? {
                changed += 1;
            }
            changed += self.prune_colors(ctx, objects).await?;
        }
        Ok(changed)
    }
}

#[async_trait]
impl ComponentReverter for ApplicationReverter {
    fn component(&self) -> Component {
        Component::Application
    }

    fn accepts_revision(&self) -> bool {
        true
    }

    /// The live app workload, the worker, the service, and anything else
    /// labelled as application.
    async fn snapshot(
        &self,
        ctx: &RevertContext<'_>,
        contents: &mut BackupContents,
    ) -> Result<(), RevertError> {
        let gateway = ctx.gateway;
        let service = self.service(ctx).await?;
        let live = self.live_app(ctx, service.as_ref()).await?;
        let mut objects: Vec<Value> = Vec::new();
        for workload in std::iter::once(live.workload.as_str()).chain(self.worker.as_deref()) {
            let object = ctx
                .call("get", || gateway.get("deployment", workload, ctx.namespace))
                .await?;
            objects.push(manifest::normalized(&object));
        }
        objects.extend(service.as_ref().map(manifest::normalized));
        for kind in &self.scope.kinds {
            let listed = ctx
                .call("list", || {
                    gateway.list(kind, ctx.namespace, Some(&self.scope.selector))
                })
                .await?;
            for object in listed {
                let seen = objects.iter().any(|o| {
                    manifest::kind(o) == manifest::kind(&object)
                        && manifest::name(o) == manifest::name(&object)
                });
                if !seen {
                    objects.push(manifest::normalized(&object));
                }
            }
        }
        info!(live = %live.workload, objects = objects.len(), "application snapshot taken");
        contents.objects.insert(Component::Application, objects);
        Ok(())
    }

    async fn revert(
        &self,
        ctx: &RevertContext<'_>,
        to: RevertTo<'_>,
    ) -> Result<Reversal, RevertError> {
        match to {
            RevertTo::Previous => {
                let undone = self.undo(ctx, None).await?;
                Ok(Reversal::reverted(format!(
                    "rolled {undone} back to the previous revision"
                )))
            }
            RevertTo::Revision(n) => {
                let undone = self.undo(ctx, Some(n)).await?;
                Ok(Reversal::reverted(format!("rolled {undone} back to revision {n}")))
            }
            RevertTo::Snapshot { name, contents } => {
                let objects = backed_up(Component::Application, name, contents)?;
                let changed = self.restore_snapshot(ctx, objects).await?;
                if changed == 0 {
                    Ok(Reversal::already_at_target(format!(
                        "workloads already match backup {name}"
                    )))
                } else {
                    Ok(Reversal::reverted(format!(
                        "restored {changed} objects from backup {name}"
                    )))
                }
            }
        }
    }

    /// Wait for the live workload's rollout, then require a passing
    /// health gate on its pods.
    async fn validate(&self, ctx: &RevertContext<'_>, to: RevertTo<'_>) -> Result<(), RevertError> {
        if let RevertTo::Snapshot { name, contents } = to {
            let objects = backed_up(Component::Application, name, contents)?;
            let (services, rest): (Vec<Value>, Vec<Value>) =
                objects.iter().cloned().partition(|o| self.is_service(o));
            verify(ctx, &rest).await?;
            if let Some(backup) = services.first() {
                let live = self.service(ctx).await?;
                if !live.as_ref().is_some_and(|live| same_route(live, backup)) {
                    return Err(RevertError::Validation(format!(
                        "{} does not route as in backup {name}",
                        describe(backup)
                    )));
                }
            }
        }

        let service = self.service(ctx).await?;
        let live = self.live_app(ctx, service.as_ref()).await?;
        self.await_rollout(ctx, &live.workload).await?;

        let selector = match &live.color {
            Some(color) => format!("{},{COLOR_LABEL}={color}", self.app_selector),
            None => self.app_selector.clone(),
        };
        let target = GateTarget::deployment(ctx.namespace, &live.workload, &selector);
        let verdict = ctx
            .gate
            .await_ready(&target, ctx.gate_attempts, ctx.gate_interval)
            .await;
        if verdict.ready {
            Ok(())
        } else {
            Err(RevertError::Validation(format!(
                "{} not ready after {} health checks",
                verdict.target, verdict.attempts
            )))
        }
    }
}
