//! Trigger monitor loop.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use rollguard_cluster::ClusterGateway;
use rollguard_core::{RollbackRequest, RollguardConfig};
use rollguard_health::{GateTarget, HealthGate};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::condition::{
    ErrorRate, QuotaExhaustion, RestartRatio, SignalCondition, WorkerAvailability,
};
use crate::signal::TriggerSignal;

/// Why [`TriggerMonitor::run`] returned.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorExit {
    /// A signal exceeded its window; the request is ready to execute.
    Triggered(RollbackRequest),
    /// Shutdown was requested.
    Cancelled,
    /// `max_duration` passed without a breach.
    Completed,
}

pub struct TriggerMonitor {
    /// Evaluated in order; the first to fire wins a tie.
    signals: Vec<(TriggerSignal, Box<dyn SignalCondition>)>,
    interval: Duration,
    max_duration: Option<Duration>,
}

impl TriggerMonitor {
    pub fn new(interval: Duration, max_duration: Option<Duration>) -> Self {
        Self {
            signals: Vec::new(),
            interval,
            max_duration,
        }
    }

    pub fn with_signal(mut self, window: Duration, condition: Box<dyn SignalCondition>) -> Self {
        let signal = TriggerSignal::new(condition.name(), window);
        self.signals.push((signal, condition));
        self
    }

    /// Override the overall monitoring budget.
    pub fn with_max_duration(mut self, max_duration: Option<Duration>) -> Self {
        self.max_duration = max_duration;
        self
    }

    /// Build the enabled signals in priority order: error rate, restart
    /// ratio, worker availability (only with a worker), quota exhaustion.
    pub fn from_config(
        config: &RollguardConfig,
        gateway: Arc<dyn ClusterGateway>,
        gate: HealthGate,
    ) -> Result<Self, regex::Error> {
        let t = &config.triggers;
        let ns = config.namespace.clone();
        let selector = config.app_selector();
        let mut monitor = Self::new(t.monitoring_interval(), t.max_duration());

        if t.error_rate.enabled {
            monitor = monitor.with_signal(
                t.error_rate.window(),
                Box::new(ErrorRate {
                    gate,
                    target: GateTarget::deployment(&ns, &config.workload.app, &selector),
                    threshold: t.error_rate.threshold,
                }),
            );
        }
        if t.restart_ratio.enabled {
            monitor = monitor.with_signal(
                t.restart_ratio.window(),
                Box::new(RestartRatio {
                    gateway: gateway.clone(),
                    namespace: ns.clone(),
                    selector: selector.clone(),
                    restart_limit: t.restart_limit,
                    threshold: t.restart_ratio.threshold,
                }),
            );
        }
        if t.worker_availability.enabled
            && let Some(worker) = &config.workload.worker
        {
            monitor = monitor.with_signal(
                t.worker_availability.window(),
                Box::new(WorkerAvailability {
                    gateway: gateway.clone(),
                    namespace: ns.clone(),
                    worker: worker.clone(),
                    threshold: t.worker_availability.threshold,
                }),
            );
        }
        if t.quota_exhaustion.enabled {
            monitor = monitor.with_signal(
                t.quota_exhaustion.window(),
                Box::new(QuotaExhaustion {
                    gateway,
                    namespace: ns,
                    selector,
                    pattern: Regex::new(&t.quota_pattern)?,
                    lookback: t.log_lookback(),
                    threshold: t.quota_exhaustion.threshold,
                }),
            );
        }
        Ok(monitor)
    }

    pub fn signals(&self) -> impl Iterator<Item = &TriggerSignal> {
        self.signals.iter().map(|(s, _)| s)
    }

    /// Sample every signal now and every `interval` after, until one fires,
    /// shutdown is requested, or `max_duration` passes.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> MonitorExit {
        if *shutdown.borrow_and_update() {
            return MonitorExit::Cancelled;
        }
        info!(
            signals = self.signals.len(),
            interval_secs = self.interval.as_secs(),
            "trigger monitor started"
        );

        let started = Instant::now();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watching = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed(), if watching => {
                    // A dropped sender can no longer cancel us.
                    if changed.is_err() {
                        watching = false;
                    } else if *shutdown.borrow_and_update() {
                        info!("trigger monitor cancelled");
                        return MonitorExit::Cancelled;
                    }
                    continue;
                }
            }

            let now = Instant::now();
            if let Some(max) = self.max_duration
                && now.duration_since(started) > max
            {
                info!(elapsed_secs = max.as_secs(), "trigger monitor completed without a breach");
                return MonitorExit::Completed;
            }
            if let Some(request) = self.sample(now).await {
                return MonitorExit::Triggered(request);
            }
        }
    }

    /// Evaluate every signal once and return the first that fired.
    async fn sample(&mut self, now: Instant) -> Option<RollbackRequest> {
        let mut fired: Option<RollbackRequest> = None;
        for (signal, condition) in &mut self.signals {
            match condition.evaluate().await {
                Ok(eval) => {
                    debug!(
                        signal = %signal.name(),
                        value = eval.value,
                        threshold = eval.threshold,
                        breached = eval.breached,
                        "signal sampled"
                    );
                    if signal.observe(eval.breached, now) && fired.is_none() {
                        let reason = format!(
                            "{} at {:.3} against threshold {:.3} for {}s",
                            signal.name(),
                            eval.value,
                            eval.threshold,
                            signal.window().as_secs()
                        );
                        warn!(signal = %signal.name(), %reason, "rollback triggered");
                        fired = Some(RollbackRequest::automatic(signal.name(), &reason));
                    }
                }
                Err(e) => {
                    warn!(signal = %signal.name(), error = %e, "signal evaluation failed, state held");
                }
            }
        }
        fired
    }
}
