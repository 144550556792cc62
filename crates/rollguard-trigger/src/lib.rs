//! rollguard-trigger: the trigger monitor.
//!
//! Watches independent health signals and requests an automatic rollback
//! when one of them stays bad for its whole dwell window.
//!
//! # Architecture
//!
//! ```text
//! TriggerMonitor::run(shutdown)
//!   └── every monitoring_interval
//!       ├── SignalCondition::evaluate()   (one per signal, fixed order)
//!       ├── TriggerSignal::observe()      Idle → Detected(since) → Exceeded
//!       └── first Exceeded → RollbackRequest{full, previous, auto_approved}
//! ```
//!
//! A single false sample resets a signal to `Idle`, so a blip shorter
//! than the window never fires. An evaluation error leaves the signal's
//! state as it was.

pub mod condition;
pub mod monitor;
pub mod signal;

pub use condition::{
    ErrorRate, Evaluation, QuotaExhaustion, RestartRatio, SignalCondition, WorkerAvailability,
};
pub use monitor::{MonitorExit, TriggerMonitor};
pub use signal::{DwellState, TriggerSignal};
