//! Per-session countdown.
//!
//! The countdown is a tokio task that wakes once per second, publishes the
//! remaining seconds to everyone, and decrements. It stops after publishing
//! zero. Restarting aborts the running task; every run also carries a
//! generation number so a superseded task can never publish another tick,
//! even if it was already past its sleep when the restart happened.

use crate::audience::AudienceKind;
use crate::session::Session;
use huddle_protocol::ServerFrame;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Time between ticks.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Countdown lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownPhase {
    /// Never started.
    Idle,
    /// Ticking.
    Running,
    /// Stopped by a session end.
    Cancelled,
    /// Published zero and stopped.
    Expired,
}

/// Countdown state held inside the session lock.
#[derive(Debug)]
pub struct Countdown {
    remaining: u32,
    phase: CountdownPhase,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl Countdown {
    /// Create an idle countdown showing `seconds`.
    #[must_use]
    pub fn new(seconds: u32) -> Self {
        Self {
            remaining: seconds,
            phase: CountdownPhase::Idle,
            generation: 0,
            task: None,
        }
    }

    /// Seconds left.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> CountdownPhase {
        self.phase
    }

    /// Identifier of the current run.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a run is in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.phase == CountdownPhase::Running
    }

    /// Stop any current run and arm a new one at `seconds`.
    ///
    /// Returns the generation the new task must present on every tick.
    pub fn restart(&mut self, seconds: u32) -> u64 {
        self.abort_task();
        self.generation += 1;
        self.remaining = seconds;
        self.phase = CountdownPhase::Running;
        self.generation
    }

    /// Attach the task driving the current generation.
    pub fn attach(&mut self, task: JoinHandle<()>) {
        self.task = Some(task);
    }

    /// Stop the current run, if any.
    pub fn cancel(&mut self) {
        self.abort_task();
        self.generation += 1;
        if self.phase == CountdownPhase::Running {
            self.phase = CountdownPhase::Cancelled;
        }
    }

    /// Advance one tick for `generation`.
    ///
    /// Returns the value to publish, or `None` if this generation has been
    /// superseded or the countdown is not running.
    pub fn tick(&mut self, generation: u64) -> Option<u32> {
        if generation != self.generation || self.phase != CountdownPhase::Running {
            return None;
        }
        let value = self.remaining;
        if value == 0 {
            self.phase = CountdownPhase::Expired;
            // The finishing task is the caller; detach instead of aborting it.
            self.task = None;
        } else {
            self.remaining -= 1;
        }
        Some(value)
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.abort_task();
    }
}

/// Drive one countdown run for `session`.
pub(crate) async fn run(session: Arc<Session>, generation: u64) {
    loop {
        tokio::time::sleep(TICK_INTERVAL).await;

        let mut state = session.lock().await;
        let Some(value) = state.countdown.tick(generation) else {
            trace!(session = %session.key(), generation, "Countdown superseded");
            return;
        };
        state
            .audiences
            .publish_frame(AudienceKind::Everyone, ServerFrame::Timer(value));
        trace!(session = %session.key(), remaining = value, "Countdown tick");

        if value == 0 {
            debug!(session = %session.key(), "Countdown expired");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_down_to_zero() {
        let mut countdown = Countdown::new(2);
        assert_eq!(countdown.phase(), CountdownPhase::Idle);

        let generation = countdown.restart(2);
        assert!(countdown.is_running());

        assert_eq!(countdown.tick(generation), Some(2));
        assert_eq!(countdown.tick(generation), Some(1));
        assert_eq!(countdown.tick(generation), Some(0));
        assert_eq!(countdown.phase(), CountdownPhase::Expired);
        assert_eq!(countdown.tick(generation), None);
    }

    #[test]
    fn test_restart_supersedes_previous_run() {
        let mut countdown = Countdown::new(5);
        let first = countdown.restart(5);
        assert_eq!(countdown.tick(first), Some(5));

        let second = countdown.restart(5);
        assert_ne!(first, second);
        assert_eq!(countdown.tick(first), None);
        assert_eq!(countdown.tick(second), Some(5));
        assert_eq!(countdown.remaining(), 4);
    }

    #[test]
    fn test_cancel() {
        let mut countdown = Countdown::new(3);
        let generation = countdown.restart(3);
        countdown.cancel();

        assert_eq!(countdown.phase(), CountdownPhase::Cancelled);
        assert_eq!(countdown.tick(generation), None);
    }

    #[test]
    fn test_cancel_idle_stays_idle() {
        let mut countdown = Countdown::new(3);
        countdown.cancel();
        assert_eq!(countdown.phase(), CountdownPhase::Idle);
    }
}
