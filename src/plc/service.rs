//! Process-wide serialization point for PLC access. Every externally
//! callable operation takes the access lock, then runs the transport
//! call on a single-worker executor bounded by a deadline, so a hung
//! socket can never pile up concurrent transport calls.

use super::fetcher;
use super::transport::{PlcTransport, PING_DEVICE};
use super::{PlcError, PlcResult, TransportHandle};
use crate::master::{Master, ProductionTypeConfig};
use crate::settings::{DeviceMap, Settings};
use crate::snapshot::{remain_pallet, Snapshot};
use crate::sysutil;
use chrono::{Local, NaiveDateTime};
use log::{error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use threadpool::ThreadPool;

const SHUTDOWN_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Consecutive-failure counter. Resets on any success; `failure()`
/// returns true exactly when the counter crosses the limit.
pub struct FailureTracker {
    count: AtomicU32,
    limit: u32,
}

impl FailureTracker {
    pub fn new(limit: u32) -> Self {
        Self {
            count: AtomicU32::new(0),
            limit: limit.max(1),
        }
    }
    #[inline]
    pub fn success(&self) {
        self.count.store(0, Ordering::SeqCst);
    }
    pub fn failure(&self) -> bool {
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        warn!("PLC failure count: {}/{}", count, self.limit);
        count == self.limit
    }
    #[inline]
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Serialize)]
pub struct ServiceStatus {
    pub plc_connected: bool,
    pub use_plc: bool,
    pub line_name: String,
    pub last_update: Option<String>,
}

pub struct PlcService {
    access: Mutex<()>,
    transport: Mutex<Option<TransportHandle>>,
    executor: ThreadPool,
    master: Arc<Master>,
    devices: DeviceMap,
    use_plc: bool,
    line_name: String,
    fetch_timeout: Duration,
    ping_timeout: Duration,
    failures: FailureTracker,
    last_update: Mutex<Option<NaiveDateTime>>,
}

impl PlcService {
    /// Creates the service and, when the PLC is enabled, its transport.
    /// The initial connect runs on the executor worker: the HTTP
    /// surface must bind immediately even when the PLC is still
    /// booting, and a connect failure is not fatal since reads go
    /// through the auto-reconnect path.
    pub fn new(settings: &Settings, devices: DeviceMap, master: Arc<Master>) -> Self {
        if settings.use_plc {
            let transport = Arc::new(PlcTransport::new(settings));
            let connector = Arc::clone(&transport);
            let service = Self::with_transport(settings, devices, master, Some(transport));
            service.executor.execute(move || {
                if !connector.connect() {
                    error!("initial PLC connection failed");
                }
            });
            service
        } else {
            Self::with_transport(settings, devices, master, None)
        }
    }

    /// Wires the service onto an already built transport (tests inject
    /// doubles here).
    pub fn with_transport(
        settings: &Settings,
        devices: DeviceMap,
        master: Arc<Master>,
        transport: Option<TransportHandle>,
    ) -> Self {
        info!("PLC service initialized (USE_PLC={})", settings.use_plc);
        Self {
            access: Mutex::new(()),
            transport: Mutex::new(transport),
            executor: ThreadPool::with_name("plc-exec".to_owned(), 1),
            master,
            devices,
            use_plc: settings.use_plc,
            line_name: settings.line_name.clone(),
            fetch_timeout: settings.fetch_timeout,
            ping_timeout: settings.ping_timeout,
            failures: FailureTracker::new(settings.fetch_failure_limit),
            last_update: Mutex::new(None),
        }
    }

    /// Dispatches a job to the single-worker executor and waits up to
    /// `timeout`. A timed-out job may keep the worker busy; queued jobs
    /// run after it, so at most one transport call is ever in flight.
    fn run_bounded<T, F>(&self, timeout: Duration, job: F) -> PlcResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> PlcResult<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.executor.execute(move || {
            let _ = tx.send(job());
        });
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(_) => Err(PlcError::Timeout),
        }
    }

    /// Counts a non-success; at the limit disconnects and hands control
    /// back to the supervisor via SIGTERM to self.
    fn note_failure(&self) {
        if self.failures.failure() {
            error!("PLC failure limit reached, handing control to the supervisor");
            if let Some(transport) = self.transport.lock().clone() {
                transport.disconnect();
            }
            sysutil::terminate_self();
        }
    }

    fn transport(&self) -> Option<TransportHandle> {
        self.transport.lock().clone()
    }

    pub fn production_data(&self) -> PlcResult<Snapshot> {
        let _access = self.access.lock();
        self.last_update.lock().replace(Local::now().naive_local());
        if !self.use_plc {
            return Ok(self.generate_dummy());
        }
        let Some(transport) = self.transport() else {
            self.note_failure();
            return Err(PlcError::Disconnected);
        };
        let devices = self.devices.clone();
        let master = Arc::clone(&self.master);
        let result = self.run_bounded(self.fetch_timeout, move || {
            // reconcile a socket left behind by an abandoned call; if the
            // link stays down the field reads fall back to their defaults
            transport.ensure_connected();
            Ok(fetcher::fetch_snapshot(transport.as_ref(), &devices, &master))
        });
        match result {
            Ok(fetched) => {
                if fetched.read_failures > 0 {
                    self.note_failure();
                } else {
                    self.failures.success();
                }
                Ok(fetched.snapshot)
            }
            Err(e) => {
                self.note_failure();
                Err(e)
            }
        }
    }

    /// Reads the PLC clock. `Ok(None)` when the PLC is disabled or the
    /// clock device is not configured.
    pub fn plc_timestamp(&self) -> PlcResult<Option<NaiveDateTime>> {
        if !self.use_plc || self.devices.time.is_empty() {
            return Ok(None);
        }
        let _access = self.access.lock();
        let Some(transport) = self.transport() else {
            return Ok(None);
        };
        let device = self.devices.time.clone();
        let result = self.run_bounded(self.fetch_timeout, move || {
            fetcher::read_timestamp(transport.as_ref(), &device)
        });
        match result {
            Ok(ts) => {
                self.failures.success();
                Ok(Some(ts))
            }
            Err(e) => {
                self.note_failure();
                Err(e)
            }
        }
    }

    /// Cheap 1-word liveness read used by the readiness probe. Shares
    /// the serialization and failure accounting of the data path but
    /// runs under the shorter ping deadline.
    pub fn ping(&self) -> bool {
        if !self.use_plc {
            return true;
        }
        let _access = self.access.lock();
        let Some(transport) = self.transport() else {
            return false;
        };
        let result = self.run_bounded(self.ping_timeout, move || {
            transport.read_words(PING_DEVICE, 1)
        });
        match result {
            Ok(_) => {
                self.failures.success();
                true
            }
            Err(e) => {
                warn!("PLC ping failed: {}", e);
                self.note_failure();
                false
            }
        }
    }

    /// True when the executor worker answers a no-op job within the
    /// deadline; false means the worker is wedged in a transport call.
    pub fn executor_alive(&self, timeout: Duration) -> bool {
        let (tx, rx) = mpsc::channel();
        self.executor.execute(move || {
            let _ = tx.send(());
        });
        rx.recv_timeout(timeout).is_ok()
    }

    /// The service can answer requests (dummy mode counts as ready).
    pub fn ready(&self) -> bool {
        !self.use_plc || self.transport.lock().is_some()
    }

    pub fn status(&self) -> ServiceStatus {
        let plc_connected = self.use_plc
            && self
                .transport
                .lock()
                .as_ref()
                .map_or(false, |t| t.connected());
        ServiceStatus {
            plc_connected,
            use_plc: self.use_plc,
            line_name: self.line_name.clone(),
            last_update: (*self.last_update.lock())
                .map(|ts| ts.format("%Y-%m-%dT%H:%M:%S").to_string()),
        }
    }

    #[inline]
    pub fn failure_count(&self) -> u32 {
        self.failures.count()
    }

    /// Bounded teardown: waits up to 5 s for the access lock, then
    /// clears the transport either way; teardown must never hang.
    pub fn shutdown(&self) {
        let guard = self.access.try_lock_for(SHUTDOWN_LOCK_TIMEOUT);
        if guard.is_none() {
            warn!("could not acquire PLC access lock for shutdown (timeout)");
        }
        if let Some(transport) = self.transport.lock().take() {
            transport.disconnect();
            info!("PLC connection closed");
        }
    }

    fn generate_dummy(&self) -> Snapshot {
        use rand::Rng;
        const SECONDS_PER_PRODUCT: f64 = 1.2;
        const ALARM_THRESHOLD: u32 = 8000;
        const MAX_DUMMY_TYPE: u16 = 2;
        let mut rng = rand::thread_rng();
        let requested = rng.gen_range(0..=MAX_DUMMY_TYPE);
        let (production_type, config) = match self.master.get(requested) {
            Ok(config) => (requested, config.clone()),
            Err(_) => match self.master.get(0) {
                Ok(config) => (0, config.clone()),
                Err(_) => (
                    0,
                    ProductionTypeConfig {
                        name: "UNKNOWN".to_owned(),
                        fully: 1,
                        seconds_per_product: SECONDS_PER_PRODUCT,
                    },
                ),
            },
        };
        let plan: u32 = 45000;
        let actual: u32 = rng.gen_range(0..=plan);
        let remaining = plan - actual;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let remain_min = (f64::from(remaining) * SECONDS_PER_PRODUCT / 60.0) as u32;
        let alarm = actual > ALARM_THRESHOLD && rng.gen_bool(0.5);
        Snapshot {
            line_name: self.line_name.clone(),
            production_type,
            production_name: config.name.clone(),
            plan,
            actual,
            in_operating: true,
            alarm,
            alarm_msg: if alarm {
                "[TEST] alarm active".to_owned()
            } else {
                String::new()
            },
            remain_min,
            remain_pallet: remain_pallet(plan, actual, &config),
            fully: config.fully,
            timestamp: Local::now().naive_local(),
        }
    }
}
