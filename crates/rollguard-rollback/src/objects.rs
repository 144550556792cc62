//! Object-set reversal for infrastructure and monitoring.
//!
//! A component is the set of objects of its kinds that match its
//! selector. Reverting restores the backed-up objects one by one; an
//! object whose live copy already equals the backup is left alone.

use async_trait::async_trait;
use rollguard_cluster::{GatewayError, manifest};
use rollguard_core::config::ComponentScope;
use rollguard_core::{BackupContents, Component};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::RevertError;
use crate::reverter::{ComponentReverter, RevertContext, RevertTo, Reversal};

pub struct ObjectReverter {
    component: Component,
    scope: ComponentScope,
}

impl ObjectReverter {
    pub fn new(component: Component, scope: ComponentScope) -> Self {
        Self { component, scope }
    }
}

/// `kind/name` for logs and details.
pub(crate) fn describe(object: &Value) -> String {
    format!(
        "{}/{}",
        manifest::kind(object).unwrap_or_default(),
        manifest::name(object).unwrap_or_default()
    )
}

/// Whether the live copy of `object` already matches it.
async fn matches_live(ctx: &RevertContext<'_>, object: &Value) -> Result<bool, GatewayError> {
    let kind = manifest::kind(object).unwrap_or_default();
    let name = manifest::name(object).unwrap_or_default();
    let gateway = ctx.gateway;
    match ctx
        .call("get", || gateway.get(&kind, name, ctx.namespace))
        .await
    {
        Ok(live) => Ok(manifest::normalized(&live) == manifest::normalized(object)),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Re-apply every object that differs from its live copy.
///
/// Returns how many objects were applied.
pub(crate) async fn restore(ctx: &RevertContext<'_>, objects: &[Value]) -> Result<usize, RevertError> {
    let gateway = ctx.gateway;
    let mut applied = 0;
    for object in objects {
        if matches_live(ctx, object).await? {
            debug!(object = %describe(object), "already matches backup");
            continue;
        }
        let mut desired = manifest::normalized(object);
        desired["metadata"]["namespace"] = Value::String(ctx.namespace.to_string());
        ctx.call("apply", || gateway.apply(&desired)).await?;
        info!(object = %describe(object), "object restored from backup");
        applied += 1;
    }
    Ok(applied)
}

/// Fail with the objects whose live copy does not match.
pub(crate) async fn verify(ctx: &RevertContext<'_>, objects: &[Value]) -> Result<(), RevertError> {
    let mut drifted = Vec::new();
    for object in objects {
        if !matches_live(ctx, object).await? {
            drifted.push(describe(object));
        }
    }
    if drifted.is_empty() {
        Ok(())
    } else {
        Err(RevertError::Validation(format!(
            "live objects differ from backup: {}",
            drifted.join(", ")
        )))
    }
}

/// The objects a backup holds for `component`.
pub(crate) fn backed_up<'a>(
    component: Component,
    name: &str,
    contents: &'a BackupContents,
) -> Result<&'a [Value], RevertError> {
    contents
        .objects
        .get(&component)
        .map(Vec::as_slice)
        .ok_or_else(|| RevertError::Target(format!("backup {name} does not cover {component}")))
}

#[async_trait]
impl ComponentReverter for ObjectReverter {
    fn component(&self) -> Component {
        self.component
    }

    async fn snapshot(
        &self,
        ctx: &RevertContext<'_>,
        contents: &mut BackupContents,
    ) -> Result<(), RevertError> {
        let gateway = ctx.gateway;
        let mut objects = Vec::new();
        for kind in &self.scope.kinds {
            let listed = ctx
                .call("list", || {
                    gateway.list(kind, ctx.namespace, Some(&self.scope.selector))
                })
                .await?;
            objects.extend(listed.iter().map(manifest::normalized));
        }
        contents.objects.insert(self.component, objects);
        Ok(())
    }

    async fn revert(
        &self,
        ctx: &RevertContext<'_>,
        to: RevertTo<'_>,
    ) -> Result<Reversal, RevertError> {
        let RevertTo::Snapshot { name, contents } = to else {
            return Err(RevertError::Target(format!(
                "{} can only be restored from a backup",
                self.component
            )));
        };
        let objects = backed_up(self.component, name, contents)?;
        let applied = restore(ctx, objects).await?;
        if applied == 0 {
            Ok(Reversal::already_at_target(format!(
                "{} objects already match backup {name}",
                objects.len()
            )))
        } else {
            Ok(Reversal::reverted(format!(
                "restored {applied} of {} objects from backup {name}",
                objects.len()
            )))
        }
    }

    async fn validate(&self, ctx: &RevertContext<'_>, to: RevertTo<'_>) -> Result<(), RevertError> {
        match to {
            RevertTo::Snapshot { name, contents } => {
                verify(ctx, backed_up(self.component, name, contents)?).await
            }
            _ => Ok(()),
        }
    }
}
