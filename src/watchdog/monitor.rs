//! Probe bookkeeping and the staged-backoff restart decision. Pure
//! state machine over a caller-supplied monotonic clock, so restart
//! timing is immune to wall-clock jumps and fully testable.

use crate::settings::WatchdogSettings;
use log::{info, warn};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success { pid: Option<u32> },
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do.
    None,
    /// Failure limit crossed and the cooldown has passed: restart now.
    /// The restart is already recorded in the monitor state.
    Restart,
    /// Still within the startup grace window, keep waiting.
    Grace,
    /// Cooldown still running.
    Cooldown { remaining: Duration },
}

pub struct Monitor {
    failure_limit: u32,
    restart_cooldown: Duration,
    startup_grace: Duration,
    backoff_max: Duration,
    ready_check_interval: Duration,
    consecutive_failures: u32,
    restart_count: u32,
    last_restart: Option<Instant>,
    last_success: Option<Instant>,
    last_ready_check: Option<Instant>,
    last_api_pid: Option<u32>,
}

impl Monitor {
    pub fn new(settings: &WatchdogSettings) -> Self {
        Self {
            failure_limit: settings.failure_limit.max(1),
            restart_cooldown: settings.restart_cooldown,
            startup_grace: settings.startup_grace,
            backoff_max: settings.backoff_max,
            ready_check_interval: settings.ready_check_interval,
            consecutive_failures: 0,
            restart_count: 0,
            last_restart: None,
            last_success: None,
            last_ready_check: None,
            last_api_pid: None,
        }
    }

    /// Feeds one liveness probe outcome into the state machine.
    pub fn observe(&mut self, outcome: ProbeOutcome, now: Instant) -> Action {
        match outcome {
            ProbeOutcome::Success { pid } => {
                self.consecutive_failures = 0;
                // the service is stable again
                self.restart_count = 0;
                self.last_success = Some(now);
                if let Some(pid) = pid {
                    if let Some(last) = self.last_api_pid {
                        if last != pid {
                            // worker PID can legitimately differ from the
                            // spawned PID under multi-worker modes
                            info!("API worker PID changed: {} -> {}", last, pid);
                        }
                    }
                    self.last_api_pid = Some(pid);
                }
                Action::None
            }
            ProbeOutcome::Failure => {
                self.consecutive_failures += 1;
                warn!(
                    "health check failure count: {}/{}",
                    self.consecutive_failures, self.failure_limit
                );
                if self.consecutive_failures >= self.failure_limit {
                    self.restart_decision(now)
                } else {
                    Action::None
                }
            }
        }
    }

    fn restart_decision(&mut self, now: Instant) -> Action {
        let cooldown = self.current_cooldown();
        if let Some(last_restart) = self.last_restart {
            let elapsed = now.duration_since(last_restart);
            if elapsed < self.startup_grace {
                info!(
                    "within startup grace period ({:?} < {:?}), waiting (failures={})",
                    elapsed, self.startup_grace, self.consecutive_failures
                );
                return Action::Grace;
            }
            if elapsed < cooldown {
                let remaining = cooldown - elapsed;
                warn!(
                    "restart delayed: remaining={}s (stage={}, failures={})",
                    remaining.as_secs(),
                    self.restart_count,
                    self.consecutive_failures
                );
                return Action::Cooldown { remaining };
            }
        }
        info!(
            "initiating API server restart (restart_count={}, cooldown={}s)",
            self.restart_count,
            cooldown.as_secs()
        );
        self.last_restart = Some(now);
        self.restart_count += 1;
        // consecutive_failures stays: only a successful probe clears it
        Action::Restart
    }

    /// Staged backoff, indexed by the consecutive restart count and
    /// capped by the configured maximum.
    pub fn current_cooldown(&self) -> Duration {
        let stages = [
            self.restart_cooldown,
            Duration::from_secs(300),
            Duration::from_secs(900),
            Duration::from_secs(1800),
        ];
        let stage = (self.restart_count as usize).min(stages.len() - 1);
        stages[stage].min(self.backoff_max)
    }

    /// True when a periodic readiness probe is due; records the check
    /// time. Interval 0 disables readiness probing.
    pub fn ready_check_due(&mut self, now: Instant) -> bool {
        if self.ready_check_interval.is_zero() {
            return false;
        }
        match self.last_ready_check {
            Some(last) if now.duration_since(last) < self.ready_check_interval => false,
            _ => {
                self.last_ready_check = Some(now);
                true
            }
        }
    }

    /// Called after a successful (re)start: the child came up and
    /// answered its first probe.
    pub fn record_startup_success(&mut self) {
        self.consecutive_failures = 0;
    }

    #[inline]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    #[inline]
    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    #[inline]
    pub fn last_success(&self) -> Option<Instant> {
        self.last_success
    }

    #[inline]
    pub fn last_api_pid(&self) -> Option<u32> {
        self.last_api_pid
    }
}
