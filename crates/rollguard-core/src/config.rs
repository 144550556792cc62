//! rollguard.toml configuration parser.
//!
//! Durations are kept as the strings the operator wrote ("30s", "5m") and
//! parsed on access; `validate()` rejects any that do not parse so the
//! accessors can fall back to defaults without hiding typos.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::ConfigError;
use crate::types::StrategyKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RollguardConfig {
    /// Environment name; "production"/"prod" enables rollback confirmation.
    pub environment: String,
    pub namespace: String,
    /// Directory for the history database and backups.
    pub data_dir: String,
    pub workload: WorkloadConfig,
    pub rollout: RolloutSettings,
    pub health: HealthSettings,
    pub blue_green: BlueGreenSettings,
    pub canary: CanarySettings,
    pub triggers: TriggerSettings,
    pub rollback: RollbackSettings,
    pub database: DatabaseSettings,
    pub components: ComponentScopes,
}

impl Default for RollguardConfig {
    fn default() -> Self {
        Self {
            environment: "staging".to_string(),
            namespace: String::new(),
            data_dir: ".rollguard".to_string(),
            workload: WorkloadConfig::default(),
            rollout: RolloutSettings::default(),
            health: HealthSettings::default(),
            blue_green: BlueGreenSettings::default(),
            canary: CanarySettings::default(),
            triggers: TriggerSettings::default(),
            rollback: RollbackSettings::default(),
            database: DatabaseSettings::default(),
            components: ComponentScopes::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Name of the primary Deployment (and its Service).
    pub app: String,
    /// Optional background worker Deployment updated alongside the app.
    pub worker: Option<String>,
    /// Container to update in the app pod; defaults to `app`.
    pub container: Option<String>,
    /// Container to update in the worker pod; defaults to `worker`.
    pub worker_container: Option<String>,
    /// Port the pods serve `/health` and `/ready` on.
    pub port: u16,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            app: String::new(),
            worker: None,
            container: None,
            worker_container: None,
            port: 8080,
        }
    }
}

impl WorkloadConfig {
    pub fn container_name(&self) -> &str {
        self.container.as_deref().unwrap_or(&self.app)
    }

    pub fn worker_container_name(&self) -> Option<&str> {
        let worker = self.worker.as_deref()?;
        Some(self.worker_container.as_deref().unwrap_or(worker))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutSettings {
    pub strategy: StrategyKind,
    /// Wait for `rollout status` per workload (e.g., "300s").
    pub rollout_timeout: String,
    /// Retries for transient cluster errors within one phase.
    pub retry_budget: u32,
    pub retry_backoff: String,
    pub rollback_on_failure: bool,
    /// Attempts to take the workload lease before giving up.
    pub lease_attempts: u32,
    pub lease_backoff: String,
    /// Also claim the lease as a `coordination.k8s.io` Lease object so
    /// runs on other machines see it.
    pub cluster_lease: bool,
    /// How long a cluster lease outlives its last renewal.
    pub lease_ttl: String,
}

impl Default for RolloutSettings {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Rolling,
            rollout_timeout: "300s".to_string(),
            retry_budget: 3,
            retry_backoff: "2s".to_string(),
            rollback_on_failure: true,
            lease_attempts: 5,
            lease_backoff: "5s".to_string(),
            cluster_lease: true,
            lease_ttl: "5m".to_string(),
        }
    }
}

impl RolloutSettings {
    pub fn rollout_timeout(&self) -> Duration {
        parse_duration(&self.rollout_timeout).unwrap_or(Duration::from_secs(300))
    }

    pub fn retry_backoff(&self) -> Duration {
        parse_duration(&self.retry_backoff).unwrap_or(Duration::from_secs(2))
    }

    pub fn lease_backoff(&self) -> Duration {
        parse_duration(&self.lease_backoff).unwrap_or(Duration::from_secs(5))
    }

    pub fn lease_ttl(&self) -> Duration {
        parse_duration(&self.lease_ttl).unwrap_or(Duration::from_secs(300))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub max_attempts: u32,
    /// Fixed sleep between attempts.
    pub interval: String,
    /// Path probed on every replica.
    pub probe_path: String,
    /// Per-probe timeout.
    pub probe_timeout: String,
    /// A probe slower than this counts as failed even if it returned 2xx.
    pub max_response_time: String,
    /// Probe each replica over HTTP in addition to replica counts.
    pub probe_replicas: bool,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval: "10s".to_string(),
            probe_path: "/health".to_string(),
            probe_timeout: "5s".to_string(),
            max_response_time: "2s".to_string(),
            probe_replicas: true,
        }
    }
}

impl HealthSettings {
    pub fn interval(&self) -> Duration {
        parse_duration(&self.interval).unwrap_or(Duration::from_secs(10))
    }

    pub fn probe_timeout(&self) -> Duration {
        parse_duration(&self.probe_timeout).unwrap_or(Duration::from_secs(5))
    }

    pub fn max_response_time(&self) -> Duration {
        parse_duration(&self.max_response_time).unwrap_or(Duration::from_secs(2))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlueGreenSettings {
    /// Grace period between switching traffic and deleting the old color.
    pub drain_delay: String,
    /// Service whose selector carries the color; defaults to the app name.
    pub service: Option<String>,
}

impl Default for BlueGreenSettings {
    fn default() -> Self {
        Self {
            drain_delay: "30s".to_string(),
            service: None,
        }
    }
}

impl BlueGreenSettings {
    pub fn drain_delay(&self) -> Duration {
        parse_duration(&self.drain_delay).unwrap_or(Duration::from_secs(30))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CanarySettings {
    /// Total observation window.
    pub duration: String,
    /// Interval between checks within the window.
    pub interval: String,
    pub replicas: u32,
}

impl Default for CanarySettings {
    fn default() -> Self {
        Self {
            duration: "300s".to_string(),
            interval: "30s".to_string(),
            replicas: 1,
        }
    }
}

impl CanarySettings {
    pub fn duration(&self) -> Duration {
        parse_duration(&self.duration).unwrap_or(Duration::from_secs(300))
    }

    pub fn interval(&self) -> Duration {
        parse_duration(&self.interval).unwrap_or(Duration::from_secs(30))
    }
}

/// Threshold and dwell window for one trigger signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalSettings {
    pub enabled: bool,
    pub threshold: f64,
    pub window: String,
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.1,
            window: "300s".to_string(),
        }
    }
}

impl SignalSettings {
    fn with(threshold: f64, window: &str) -> Self {
        Self {
            enabled: true,
            threshold,
            window: window.to_string(),
        }
    }

    pub fn window(&self) -> Duration {
        parse_duration(&self.window).unwrap_or(Duration::from_secs(300))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerSettings {
    pub monitoring_interval: String,
    /// Stop monitoring after this long without a breach.
    pub max_duration: Option<String>,
    /// Ratio of replicas failing `/health`.
    pub error_rate: SignalSettings,
    /// Ratio of pods restarted more than `restart_limit` times.
    pub restart_ratio: SignalSettings,
    pub restart_limit: u32,
    /// Ratio of available worker replicas; fires when *below* threshold.
    pub worker_availability: SignalSettings,
    /// Quota/429 log lines per minute.
    pub quota_exhaustion: SignalSettings,
    pub quota_pattern: String,
    /// How far back to read logs for the quota signal.
    pub log_lookback: String,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            monitoring_interval: "30s".to_string(),
            max_duration: None,
            error_rate: SignalSettings::with(0.1, "300s"),
            restart_ratio: SignalSettings::with(0.2, "120s"),
            restart_limit: 3,
            worker_availability: SignalSettings::with(0.5, "180s"),
            quota_exhaustion: SignalSettings::with(10.0, "60s"),
            quota_pattern: r"(?i)\b429\b|quota exceeded|rate limit".to_string(),
            log_lookback: "2m".to_string(),
        }
    }
}

impl TriggerSettings {
    pub fn monitoring_interval(&self) -> Duration {
        parse_duration(&self.monitoring_interval).unwrap_or(Duration::from_secs(30))
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration.as_deref().and_then(parse_duration)
    }

    pub fn log_lookback(&self) -> Duration {
        parse_duration(&self.log_lookback).unwrap_or(Duration::from_secs(120))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackSettings {
    /// Skip the pre-rollback safety backup.
    pub skip_backup: bool,
    /// Ask an operator before non-approved rollbacks in production.
    pub require_confirmation: bool,
}

impl Default for RollbackSettings {
    fn default() -> Self {
        Self {
            skip_backup: false,
            require_confirmation: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Off unless the app ships a migration tool; an enabled database is
    /// part of every full rollback.
    pub enabled: bool,
    /// Label selector for the pod that runs migrations; defaults to `app=<app>`.
    pub pod_selector: Option<String>,
    /// Prints the current migration version as an integer.
    pub version_command: Vec<String>,
    /// Migrates to a version; the version is appended as the last argument.
    pub migrate_command: Vec<String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            pod_selector: None,
            version_command: vec!["migrate".to_string(), "version".to_string()],
            migrate_command: vec!["migrate".to_string(), "goto".to_string()],
        }
    }
}

/// Which cluster objects belong to a component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentScope {
    pub kinds: Vec<String>,
    pub selector: String,
}

impl ComponentScope {
    fn new(kinds: &[&str], component: &str) -> Self {
        Self {
            kinds: kinds.iter().map(|k| k.to_string()).collect(),
            selector: format!("rollguard.io/component={component}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentScopes {
    pub application: ComponentScope,
    pub infrastructure: ComponentScope,
    pub monitoring: ComponentScope,
}

impl Default for ComponentScopes {
    fn default() -> Self {
        Self {
            application: ComponentScope::new(&["deployment"], "application"),
            infrastructure: ComponentScope::new(
                &["service", "configmap", "horizontalpodautoscaler"],
                "infrastructure",
            ),
            monitoring: ComponentScope::new(&["configmap", "servicemonitor"], "monitoring"),
        }
    }
}

impl RollguardConfig {
    /// Load and validate.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse without validating, so CLI overrides can fill gaps first.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    pub fn is_production(&self) -> bool {
        matches!(
            self.environment.to_ascii_lowercase().as_str(),
            "production" | "prod"
        )
    }

    /// Selector for the app's primary pods. Canary pods carry the app
    /// label too and are excluded.
    pub fn app_selector(&self) -> String {
        format!("app={},track!=canary", self.workload.app)
    }

    /// Selector for the app's canary pods.
    pub fn canary_selector(&self) -> String {
        format!("app={},track=canary", self.workload.app)
    }

    /// Check required fields, ranges, and every duration string.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::Invalid("namespace must be set".to_string()));
        }
        if self.workload.app.trim().is_empty() {
            return Err(ConfigError::Invalid("workload.app must be set".to_string()));
        }
        if self.health.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "health.max_attempts must be at least 1".to_string(),
            ));
        }

        let durations = [
            ("rollout.rollout_timeout", &self.rollout.rollout_timeout),
            ("rollout.retry_backoff", &self.rollout.retry_backoff),
            ("rollout.lease_backoff", &self.rollout.lease_backoff),
            ("rollout.lease_ttl", &self.rollout.lease_ttl),
            ("health.interval", &self.health.interval),
            ("health.probe_timeout", &self.health.probe_timeout),
            ("health.max_response_time", &self.health.max_response_time),
            ("blue_green.drain_delay", &self.blue_green.drain_delay),
            ("canary.duration", &self.canary.duration),
            ("canary.interval", &self.canary.interval),
            ("triggers.monitoring_interval", &self.triggers.monitoring_interval),
            ("triggers.log_lookback", &self.triggers.log_lookback),
            ("triggers.error_rate.window", &self.triggers.error_rate.window),
            ("triggers.restart_ratio.window", &self.triggers.restart_ratio.window),
            (
                "triggers.worker_availability.window",
                &self.triggers.worker_availability.window,
            ),
            (
                "triggers.quota_exhaustion.window",
                &self.triggers.quota_exhaustion.window,
            ),
        ];
        for (field, value) in durations {
            if parse_duration(value).is_none() {
                return Err(ConfigError::Duration {
                    field: field.to_string(),
                    value: value.clone(),
                });
            }
        }
        if let Some(max) = &self.triggers.max_duration
            && parse_duration(max).is_none()
        {
            return Err(ConfigError::Duration {
                field: "triggers.max_duration".to_string(),
                value: max.clone(),
            });
        }

        if self.triggers.monitoring_interval().is_zero() {
            return Err(ConfigError::Invalid(
                "triggers.monitoring_interval must be positive".to_string(),
            ));
        }
        if self.canary.interval().is_zero() || self.canary.interval() > self.canary.duration() {
            return Err(ConfigError::Invalid(
                "canary.interval must be positive and no longer than canary.duration".to_string(),
            ));
        }
        for (name, signal) in [
            ("error_rate", &self.triggers.error_rate),
            ("restart_ratio", &self.triggers.restart_ratio),
            ("worker_availability", &self.triggers.worker_availability),
        ] {
            if !(0.0..=1.0).contains(&signal.threshold) {
                return Err(ConfigError::Invalid(format!(
                    "triggers.{name}.threshold must be a ratio in [0, 1]"
                )));
            }
        }
        if self.triggers.quota_exhaustion.threshold < 0.0 {
            return Err(ConfigError::Invalid(
                "triggers.quota_exhaustion.threshold must not be negative".to_string(),
            ));
        }
        if self.database.enabled
            && (self.database.version_command.is_empty() || self.database.migrate_command.is_empty())
        {
            return Err(ConfigError::Invalid(
                "database commands must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
