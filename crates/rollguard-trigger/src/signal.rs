//! Per-signal dwell state.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

/// Where a signal is in its debounce window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DwellState {
    Idle,
    /// The condition has been true continuously since this instant.
    Detected { since: Instant },
    /// The condition stayed true for the whole window.
    Exceeded,
}

/// A named condition with its own hysteresis window.
#[derive(Debug, Clone)]
pub struct TriggerSignal {
    name: String,
    window: Duration,
    state: DwellState,
}

impl TriggerSignal {
    /// A signal that starts `Idle`. A zero `window` fires on the first
    /// true sample.
    pub fn new(name: &str, window: Duration) -> Self {
        Self {
            name: name.to_string(),
            window,
            state: DwellState::Idle,
        }
    }

    /// Condition name, used in trigger reasons and logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// How long the condition must hold before the signal fires.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Current dwell state.
    pub fn state(&self) -> DwellState {
        self.state
    }

    /// Advance with one sample taken at `now`.
    ///
    /// Returns true exactly when this sample moves the signal into
    /// `Exceeded`. Further true samples keep it there without firing
    /// again; any false sample resets it to `Idle`.
    pub fn observe(&mut self, condition: bool, now: Instant) -> bool {
        let next = match (self.state, condition) {
            (_, false) => DwellState::Idle,
            (DwellState::Exceeded, true) => DwellState::Exceeded,
            (DwellState::Idle, true) if self.window.is_zero() => DwellState::Exceeded,
            (DwellState::Idle, true) => DwellState::Detected { since: now },
            (DwellState::Detected { since }, true) => {
                if now.saturating_duration_since(since) >= self.window {
                    DwellState::Exceeded
                } else {
                    DwellState::Detected { since }
                }
            }
        };

        let fired = next == DwellState::Exceeded && self.state != DwellState::Exceeded;
        if next != self.state {
            match next {
                DwellState::Idle => debug!(signal = %self.name, "signal cleared"),
                DwellState::Detected { .. } => {
                    debug!(signal = %self.name, window = ?self.window, "signal detected")
                }
                DwellState::Exceeded => {
                    info!(signal = %self.name, window = ?self.window, "signal window exceeded")
                }
            }
        }
        self.state = next;
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(300);

    #[tokio::test(start_paused = true)]
    async fn fires_once_at_window_end() {
        let t0 = Instant::now();
        let mut signal = TriggerSignal::new("error_rate", WINDOW);

        assert!(!signal.observe(true, t0));
        assert_eq!(signal.state(), DwellState::Detected { since: t0 });
        for secs in [60, 120, 180, 240] {
            assert!(!signal.observe(true, t0 + Duration::from_secs(secs)));
        }
        assert!(signal.observe(true, t0 + WINDOW));
        assert_eq!(signal.state(), DwellState::Exceeded);
        assert!(!signal.observe(true, t0 + WINDOW + Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn blip_shorter_than_window_never_fires() {
        let t0 = Instant::now();
        let mut signal = TriggerSignal::new("error_rate", WINDOW);
        assert!(!signal.observe(true, t0));
        assert!(!signal.observe(true, t0 + Duration::from_secs(240)));
        assert!(!signal.observe(false, t0 + Duration::from_secs(299)));
        assert_eq!(signal.state(), DwellState::Idle);
        // The window restarts from the next true sample.
        let t1 = t0 + Duration::from_secs(300);
        assert!(!signal.observe(true, t1));
        assert!(!signal.observe(true, t1 + Duration::from_secs(299)));
        assert!(signal.observe(true, t1 + WINDOW + Duration::from_millis(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_after_exceeded_allows_refire() {
        let t0 = Instant::now();
        let mut signal = TriggerSignal::new("restarts", Duration::from_secs(10));
        signal.observe(true, t0);
        assert!(signal.observe(true, t0 + Duration::from_secs(10)));
        signal.observe(false, t0 + Duration::from_secs(20));
        signal.observe(true, t0 + Duration::from_secs(30));
        assert!(signal.observe(true, t0 + Duration::from_secs(40)));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_window_fires_on_first_true_sample() {
        let t0 = Instant::now();
        let mut signal = TriggerSignal::new("quota", Duration::ZERO);
        assert!(!signal.observe(false, t0));
        assert!(signal.observe(true, t0));
        assert!(!signal.observe(true, t0));
    }
}
