//! rollguard-health: the health gate.
//!
//! Decides whether a workload revision is safe to receive traffic. One
//! check reads replica counts through the cluster gateway and probes every
//! replica over HTTP; the gate repeats the check at a fixed interval until
//! it passes or attempts run out.
//!
//! # Architecture
//!
//! ```text
//! HealthGate::await_ready(target, max_attempts, interval)
//!   └── loop
//!       ├── check(): get workload → replica counts
//!       │            list pods    → probe_http per replica
//!       └── sleep(interval) between attempts
//! ```
//!
//! Running out of attempts is a verdict (`ready = false`), not an error.
//! The caller decides whether that fails its phase.

pub mod check;
pub mod gate;

pub use check::{CheckReport, GateSettings, GateTarget, ReplicaProbe};
pub use gate::HealthGate;
