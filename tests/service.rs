//! Service-layer behavior against scripted transports: deadline
//! enforcement, failure accounting and the single-in-flight guarantee.

use plcwatch::master::Master;
use plcwatch::plc::{PlcError, PlcResult, PlcService, Transport};
use plcwatch::settings::{DeviceMap, Settings};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn settings(fetch_timeout: Duration, failure_limit: u32) -> Settings {
    Settings {
        plc_ip: "127.0.0.1".parse().unwrap(),
        plc_port: 5007,
        auto_reconnect: false,
        reconnect_retry: 1,
        reconnect_delay: Duration::from_millis(10),
        reconnect_restart: false,
        debug_dummy_read: false,
        use_plc: true,
        line_name: "LINE_1".to_owned(),
        fetch_timeout,
        ping_timeout: Duration::from_secs(1),
        fetch_failure_limit: failure_limit,
        allow_frontend_restart: false,
        api_host: "127.0.0.1".to_owned(),
        api_port: 0,
    }
}

fn devices() -> DeviceMap {
    DeviceMap {
        time: "SD210".to_owned(),
        production_type: "D200".to_owned(),
        plan: "D300".to_owned(),
        actual: "D400".to_owned(),
        alarm_flag: "M600".to_owned(),
        alarm_msg: "D700".to_owned(),
        in_operating: "M100".to_owned(),
    }
}

fn master() -> Arc<Master> {
    Arc::new(
        Master::from_yaml(
            "LINE_1",
            "0:\n  name: TYPE-A\n  fully: 2800\n  seconds_per_product: 1.2\n",
        )
        .unwrap(),
    )
}

/// Transport double: optionally slow, optionally failing, counts
/// concurrent readers.
struct ScriptedTransport {
    delay: Duration,
    slow: AtomicBool,
    fail: AtomicBool,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
}

impl ScriptedTransport {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            slow: AtomicBool::new(false),
            fail: AtomicBool::new(false),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
        }
    }

    fn enter(&self) -> PlcResult<()> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if self.slow.load(Ordering::SeqCst) {
            thread::sleep(self.delay);
        }
        let result = if self.fail.load(Ordering::SeqCst) {
            Err(PlcError::Disconnected)
        } else {
            Ok(())
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl Transport for ScriptedTransport {
    fn read_words(&self, device: &str, count: u16) -> PlcResult<Vec<u16>> {
        self.enter()?;
        if device == "SD210" && count == 3 {
            return Ok(vec![0x2511, 0x1314, 0x3045]);
        }
        Ok(vec![0; usize::from(count)])
    }
    fn read_bits(&self, _device: &str, count: u16) -> PlcResult<Vec<bool>> {
        self.enter()?;
        Ok(vec![false; usize::from(count)])
    }
    fn read_dwords(&self, _device: &str, count: u16) -> PlcResult<Vec<i32>> {
        self.enter()?;
        Ok(vec![0; usize::from(count)])
    }
    fn ensure_connected(&self) -> bool {
        self.enter().is_ok()
    }
    fn connected(&self) -> bool {
        true
    }
    fn disconnect(&self) -> bool {
        true
    }
}

#[test]
fn timeout_is_enforced_and_counted_once() {
    let transport = Arc::new(ScriptedTransport::new(Duration::from_secs(5)));
    transport.slow.store(true, Ordering::SeqCst);
    let service = PlcService::with_transport(
        &settings(Duration::from_secs(1), 20),
        devices(),
        master(),
        Some(transport),
    );
    let started = Instant::now();
    match service.production_data() {
        Err(PlcError::Timeout) => {}
        other => panic!("expected timeout, got {:?}", other.map(|_| ())),
    }
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(1));
    // deadline plus scheduling slack, nowhere near the 5 s sleep
    assert!(elapsed < Duration::from_secs(2));
    assert_eq!(service.failure_count(), 1);
}

#[test]
fn success_resets_the_failure_counter() {
    let transport = Arc::new(ScriptedTransport::new(Duration::from_millis(1500)));
    transport.slow.store(true, Ordering::SeqCst);
    let service = PlcService::with_transport(
        &settings(Duration::from_secs(1), 20),
        devices(),
        master(),
        Some(Arc::clone(&transport) as Arc<dyn Transport>),
    );
    assert!(matches!(
        service.production_data(),
        Err(PlcError::Timeout)
    ));
    assert_eq!(service.failure_count(), 1);
    // the worker drains the abandoned call, then fast reads succeed
    transport.slow.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_secs(2));
    let snapshot = service.production_data().unwrap();
    assert_eq!(snapshot.production_name, "TYPE-A");
    assert_eq!(service.failure_count(), 0);
}

#[test]
fn failing_reads_return_defaults_and_count() {
    let transport = Arc::new(ScriptedTransport::new(Duration::ZERO));
    transport.fail.store(true, Ordering::SeqCst);
    let service = PlcService::with_transport(
        &settings(Duration::from_secs(1), 20),
        devices(),
        master(),
        Some(transport),
    );
    // a dead transport still yields a (defaulted) snapshot but the
    // consecutive-failure counter moves
    let snapshot = service.production_data().unwrap();
    assert_eq!(snapshot.plan, 0);
    assert_eq!(snapshot.actual, 0);
    assert_eq!(service.failure_count(), 1);
    assert!(!service.ping());
    assert_eq!(service.failure_count(), 2);
}

#[test]
fn transport_calls_never_overlap() {
    let transport = Arc::new(ScriptedTransport::new(Duration::from_millis(20)));
    transport.slow.store(true, Ordering::SeqCst);
    let service = Arc::new(PlcService::with_transport(
        &settings(Duration::from_secs(10), 20),
        devices(),
        master(),
        Some(Arc::clone(&transport) as Arc<dyn Transport>),
    ));
    let mut handles = Vec::new();
    for _ in 0..4 {
        let service = Arc::clone(&service);
        handles.push(thread::spawn(move || {
            service.production_data().unwrap();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 1);
}

#[test]
fn ping_shares_the_deadline_but_not_the_data_path() {
    let transport = Arc::new(ScriptedTransport::new(Duration::from_secs(5)));
    let service = PlcService::with_transport(
        &settings(Duration::from_secs(1), 20),
        devices(),
        master(),
        Some(Arc::clone(&transport) as Arc<dyn Transport>),
    );
    assert!(service.ping());
    assert_eq!(service.failure_count(), 0);
    // a wedged worker turns pings into bounded failures
    transport.slow.store(true, Ordering::SeqCst);
    let started = Instant::now();
    assert!(!service.ping());
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(service.failure_count(), 1);
}

#[test]
fn executor_liveness_reflects_a_wedged_worker() {
    let transport = Arc::new(ScriptedTransport::new(Duration::from_secs(3)));
    transport.slow.store(true, Ordering::SeqCst);
    let service = Arc::new(PlcService::with_transport(
        &settings(Duration::from_secs(1), 20),
        devices(),
        master(),
        Some(transport),
    ));
    assert!(service.executor_alive(Duration::from_millis(500)));
    // occupy the single worker with a hung fetch
    let background = {
        let service = Arc::clone(&service);
        thread::spawn(move || {
            let _ = service.production_data();
        })
    };
    thread::sleep(Duration::from_millis(300));
    assert!(!service.executor_alive(Duration::from_millis(500)));
    background.join().unwrap();
}
