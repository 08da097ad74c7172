use log::{debug, info};
use once_cell::sync::{Lazy, OnceCell};
use std::env;
use std::fs;
use std::panic;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod api;
pub mod interval;
pub mod master;
pub mod plc;
pub mod settings;
pub mod snapshot;
pub mod sysutil;
pub mod watchdog;

pub mod prelude {
    pub use super::{init, sigterm_received, var_dir};
    pub use log::{debug, error, info, trace, warn};
}

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

pub static COMPONENT: OnceCell<String> = OnceCell::new();

static HOSTNAME: OnceCell<String> = OnceCell::new();
static STARTUP_TIME: OnceCell<Instant> = OnceCell::new();

static TERM_FLAG: Lazy<Arc<atomic::AtomicBool>> =
    Lazy::new(|| Arc::new(atomic::AtomicBool::new(false)));

#[inline]
pub fn sigterm_received() -> bool {
    TERM_FLAG.load(atomic::Ordering::SeqCst)
}

/// # Panics
///
/// Will panic if the process is not initialized
#[inline]
pub fn hostname() -> &'static str {
    HOSTNAME.get().unwrap()
}

/// # Panics
///
/// Will panic if the process is not initialized
#[inline]
pub fn uptime() -> Duration {
    STARTUP_TIME.get().unwrap().elapsed()
}

/// Initializes the process: panic hook, logging and identity.
///
/// Logging goes to stdout via env_logger, or to syslog when SYSLOG=1.
/// VERBOSE=1 raises the level to trace.
///
/// # Panics
///
/// Will panic if called twice or if syslog is selected but can not be
/// connected
pub fn init(component: &str) {
    panic::set_hook(Box::new(|s| {
        println!("PANIC: {}", s);
        std::process::exit(1);
    }));
    HOSTNAME
        .set(hostname::get().unwrap().to_string_lossy().to_string())
        .unwrap();
    STARTUP_TIME.set(Instant::now()).unwrap();
    COMPONENT.set(component.to_owned()).unwrap();
    let verbose: bool = env::var("VERBOSE").ok().map_or(false, |v| v == "1");
    let syslog: bool = env::var("SYSLOG").ok().map_or(false, |v| v == "1");
    if syslog {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_USER,
            hostname: None,
            process: format!("plcwatch-{}", component),
            pid: std::process::id(),
        };
        log::set_boxed_logger(Box::new(syslog::BasicLogger::new(
            syslog::unix(formatter).unwrap(),
        )))
        .unwrap();
        log::set_max_level(if verbose {
            log::LevelFilter::Trace
        } else {
            log::LevelFilter::Info
        });
    } else {
        env_logger::Builder::new()
            .target(env_logger::Target::Stdout)
            .filter_level(if verbose {
                log::LevelFilter::Trace
            } else {
                log::LevelFilter::Info
            })
            .init();
    }
    debug!("log initialization completed");
    info!(
        "plcwatch-{} {} on {}",
        component,
        env!("CARGO_PKG_VERSION"),
        HOSTNAME.get().unwrap()
    );
}

/// # Panics
///
/// Will panic if unable to register SIGTERM/SIGINT handler
pub fn register_signals() {
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&TERM_FLAG)).unwrap();
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&TERM_FLAG)).unwrap();
}

pub fn var_dir() -> PathBuf {
    env::var("PLCWATCH_VAR_DIR").map_or_else(|_| env::temp_dir(), |p| Path::new(&p).to_owned())
}

pub(crate) fn component() -> &'static str {
    COMPONENT.get().map(String::as_str).unwrap_or("main")
}

/// Writes the component pid file, returning its path for removal at exit.
///
/// # Panics
///
/// Will panic if the var dir is not writable
pub fn write_pid_file() -> PathBuf {
    let mut pid_file = var_dir();
    pid_file.push(format!("plcwatch-{}.pid", component()));
    fs::write(&pid_file, process::id().to_string()).unwrap();
    pid_file
}

/// Refreshes the boot marker: the previous one (if any) is cleared and a
/// new one is written. Informational only, nothing reads it back.
pub fn refresh_boot_marker() {
    let mut marker = var_dir();
    marker.push(format!("plcwatch-{}.boot", component()));
    let _ = fs::remove_file(&marker);
    if let Err(e) = fs::write(&marker, chrono::Local::now().to_rfc3339()) {
        log::warn!("unable to write boot marker {}: {}", marker.display(), e);
    }
}
