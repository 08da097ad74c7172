//! Out-of-process supervisor: owns the API process group, probes its
//! liveness and readiness over HTTP and stages restarts with backoff.

use crate::interval::Loop;
use crate::settings::WatchdogSettings;
use log::{error, info, warn};
use std::thread;
use std::time::{Duration, Instant};

pub mod child;
pub mod monitor;
pub mod probe;

use child::ApiChild;
use monitor::{Action, Monitor, ProbeOutcome};
use probe::Prober;

/// Pause between stopping a failed child and starting the next one.
const RESTART_PAUSE: Duration = Duration::from_secs(2);
/// Granularity of the signal-aware interval sleep.
const SLEEP_STEP: Duration = Duration::from_millis(500);

pub struct Watchdog {
    settings: WatchdogSettings,
    monitor: Monitor,
    prober: Prober,
    child: Option<ApiChild>,
}

impl Watchdog {
    pub fn new(settings: WatchdogSettings) -> Self {
        info!(
            "watchdog initialized (interval={}s, failure_limit={}, initial_cooldown={}s, \
             backoff_max={}s, api_startup_timeout={}s)",
            settings.interval.as_secs(),
            settings.failure_limit,
            settings.restart_cooldown.as_secs(),
            settings.backoff_max.as_secs(),
            settings.api_startup_timeout.as_secs()
        );
        let monitor = Monitor::new(&settings);
        let prober = Prober::new(settings.health_url(), settings.ready_url());
        Self {
            settings,
            monitor,
            prober,
            child: None,
        }
    }

    /// Runs until SIGTERM/SIGINT. Returns the process exit code:
    /// 0 for a clean shutdown, 1 when initial bring-up failed.
    pub fn run(&mut self) -> i32 {
        info!("watchdog starting");
        if !self.start_api() {
            error!("initial API server startup failed");
            self.stop_api();
            return 1;
        }
        while !crate::sigterm_received() {
            if !self.sleep_interval() {
                break;
            }
            self.check_health();
        }
        info!("watchdog stopping");
        self.stop_api();
        info!("watchdog stopped");
        0
    }

    /// Sleeps one monitoring interval in small steps so shutdown
    /// signals are picked up promptly. False when interrupted.
    fn sleep_interval(&self) -> bool {
        let deadline = Instant::now() + self.settings.interval;
        loop {
            if crate::sigterm_received() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(SLEEP_STEP.min(deadline - now));
        }
    }

    fn check_health(&mut self) {
        let outcome = self.prober.health();
        if let Action::Restart = self.monitor.observe(outcome, Instant::now()) {
            self.restart_api();
        }
        // readiness is observed on its own schedule and logged only:
        // a degraded PLC link is not a reason to bounce the API
        if self.monitor.ready_check_due(Instant::now()) {
            if let Some(status) = self.prober.ready() {
                if status == "ok" {
                    info!("readiness OK");
                }
            }
        }
    }

    fn start_api(&mut self) -> bool {
        info!("starting API server");
        let child = match ApiChild::spawn(&self.settings.api_command) {
            Ok(child) => child,
            Err(e) => {
                error!("failed to start API server: {}", e);
                return false;
            }
        };
        self.child = Some(child);
        if !self.wait_for_api_ready() {
            error!("API server did not become ready in time");
            self.stop_api();
            return false;
        }
        info!("API server is ready");
        self.monitor.record_startup_success();
        true
    }

    /// Polls /health until it answers or the startup timeout elapses,
    /// watching for a child that dies while coming up.
    fn wait_for_api_ready(&mut self) -> bool {
        info!(
            "waiting for API server to be ready (max {}s)",
            self.settings.api_startup_timeout.as_secs()
        );
        let deadline = Instant::now() + self.settings.api_startup_timeout;
        let mut int = Loop::prepare(self.settings.api_startup_check_interval);
        while Instant::now() < deadline {
            if crate::sigterm_received() {
                return false;
            }
            if matches!(self.prober.health(), ProbeOutcome::Success { .. }) {
                return true;
            }
            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.poll() {
                    error!("API server process died during startup ({})", status);
                    return false;
                }
            }
            int.tick();
        }
        false
    }

    fn restart_api(&mut self) {
        // discard sockets of the old process before spawning a new one
        self.prober.reset();
        self.stop_api();
        thread::sleep(RESTART_PAUSE);
        if !self.start_api() {
            warn!(
                "API server restart failed (restart_count={})",
                self.monitor.restart_count()
            );
        }
    }

    fn stop_api(&mut self) {
        if let Some(child) = self.child.take() {
            child.stop();
        }
    }
}
