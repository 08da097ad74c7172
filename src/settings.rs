use log::warn;
use std::env;
use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key).ok().map_or(default, |v| {
        matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
    })
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Parses a numeric env var, clamping it into the documented range. A
/// malformed value falls back to the default, an out-of-range value is
/// clamped, both with a warning: unattended kiosks must come up with
/// whatever configuration they have.
fn env_ranged<T>(key: &str, default: T, min: T, max: T) -> T
where
    T: FromStr + PartialOrd + Display + Copy,
{
    let val = match env::var(key) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!("{}: unparseable value {:?}, using {}", key, raw, default);
                return default;
            }
        },
        Err(_) => return default,
    };
    if val < min {
        warn!("{}={} below minimum, clamping to {}", key, val, min);
        min
    } else if val > max {
        warn!("{}={} above maximum, clamping to {}", key, val, max);
        max
    } else {
        val
    }
}

/// PLC transport and service configuration, read once at process start.
#[derive(Debug, Clone)]
pub struct Settings {
    pub plc_ip: IpAddr,
    pub plc_port: u16,
    pub auto_reconnect: bool,
    pub reconnect_retry: u32,
    pub reconnect_delay: Duration,
    pub reconnect_restart: bool,
    pub debug_dummy_read: bool,
    pub use_plc: bool,
    pub line_name: String,
    pub fetch_timeout: Duration,
    pub ping_timeout: Duration,
    pub fetch_failure_limit: u32,
    pub allow_frontend_restart: bool,
    pub api_host: String,
    pub api_port: u16,
}

impl Settings {
    pub fn from_env() -> Self {
        let plc_ip = env_string("PLC_IP", "127.0.0.1").parse().unwrap_or_else(|e| {
            warn!("PLC_IP: {}, using 127.0.0.1", e);
            IpAddr::from([127, 0, 0, 1])
        });
        Self {
            plc_ip,
            plc_port: env_ranged("PLC_PORT", 5007u32, 1, 65535) as u16,
            auto_reconnect: env_flag("AUTO_RECONNECT", true),
            reconnect_retry: env_ranged("RECONNECT_RETRY", 3u32, 0, 10),
            reconnect_delay: Duration::from_secs_f64(env_ranged(
                "RECONNECT_DELAY",
                5.0f64,
                0.0,
                60.0,
            )),
            reconnect_restart: env_flag("RECONNECT_RESTART", false),
            debug_dummy_read: env_flag("DEBUG_DUMMY_READ", false),
            use_plc: env_flag("USE_PLC", true),
            line_name: env_string("LINE_NAME", "NONAME"),
            fetch_timeout: Duration::from_secs_f64(env_ranged(
                "PLC_FETCH_TIMEOUT",
                3.0f64,
                1.0,
                30.0,
            )),
            ping_timeout: Duration::from_secs_f64(env_ranged(
                "PLC_PING_TIMEOUT",
                2.0f64,
                0.5,
                10.0,
            )),
            fetch_failure_limit: env_ranged("PLC_FETCH_FAILURE_LIMIT", 5u32, 1, 20),
            allow_frontend_restart: env_flag("ALLOW_FRONTEND_RESTART", false),
            api_host: env_string("API_HOST", "127.0.0.1"),
            api_port: env_ranged("API_PORT", 8000u32, 1, 65535) as u16,
        }
    }
    #[inline]
    pub fn plc_addr(&self) -> SocketAddr {
        SocketAddr::new(self.plc_ip, self.plc_port)
    }
}

/// PLC device addresses for every snapshot field, passed to the PLC
/// verbatim ("D100", "M100", "SD210", ...).
#[derive(Debug, Clone)]
pub struct DeviceMap {
    pub time: String,
    pub production_type: String,
    pub plan: String,
    pub actual: String,
    pub alarm_flag: String,
    pub alarm_msg: String,
    pub in_operating: String,
}

impl DeviceMap {
    pub fn from_env() -> Self {
        Self {
            time: env_string("TIME_DEVICE", "SD210"),
            production_type: env_string("PRODUCTION_TYPE_DEVICE", "D200"),
            plan: env_string("PLAN_DEVICE", "D300"),
            actual: env_string("ACTUAL_DEVICE", "D400"),
            alarm_flag: env_string("ALARM_FLAG_DEVICE", "M600"),
            alarm_msg: env_string("ALARM_MSG_DEVICE", "D700"),
            in_operating: env_string("IN_OPERATING_DEVICE", "M100"),
        }
    }
}

/// Watchdog (supervisor) configuration.
#[derive(Debug, Clone)]
pub struct WatchdogSettings {
    pub interval: Duration,
    pub failure_limit: u32,
    pub restart_cooldown: Duration,
    pub startup_grace: Duration,
    pub backoff_max: Duration,
    pub api_startup_timeout: Duration,
    pub api_startup_check_interval: Duration,
    /// 0 disables periodic readiness probing.
    pub ready_check_interval: Duration,
    pub api_host: String,
    pub api_port: u16,
    /// Command line used to spawn the API server process.
    pub api_command: Vec<String>,
}

impl WatchdogSettings {
    pub fn from_env() -> Self {
        let api_command: Vec<String> = env_string("WATCHDOG_API_COMMAND", "plcwatch-api")
            .split_whitespace()
            .map(ToOwned::to_owned)
            .collect();
        Self {
            interval: Duration::from_secs(env_ranged("WATCHDOG_INTERVAL", 10u64, 5, 60)),
            failure_limit: env_ranged("WATCHDOG_FAILURE_LIMIT", 3u32, 1, 10),
            restart_cooldown: Duration::from_secs(env_ranged(
                "WATCHDOG_RESTART_COOLDOWN",
                60u64,
                30,
                300,
            )),
            startup_grace: Duration::from_secs(env_ranged(
                "WATCHDOG_STARTUP_GRACE",
                60u64,
                30,
                180,
            )),
            backoff_max: Duration::from_secs(env_ranged(
                "WATCHDOG_BACKOFF_MAX",
                1800u64,
                30,
                86_400,
            )),
            api_startup_timeout: Duration::from_secs(env_ranged(
                "WATCHDOG_API_STARTUP_TIMEOUT",
                15u64,
                1,
                300,
            )),
            api_startup_check_interval: Duration::from_secs_f64(env_ranged(
                "WATCHDOG_API_STARTUP_CHECK_INTERVAL",
                1.0f64,
                0.1,
                10.0,
            )),
            ready_check_interval: Duration::from_secs(env_ranged(
                "WATCHDOG_READY_CHECK_INTERVAL",
                60u64,
                0,
                3600,
            )),
            api_host: env_string("API_HOST", "127.0.0.1"),
            api_port: env_ranged("API_PORT", 8000u32, 1, 65535) as u16,
            api_command,
        }
    }
    #[inline]
    pub fn health_url(&self) -> String {
        format!("http://{}:{}/health", self.api_host, self.api_port)
    }
    #[inline]
    pub fn ready_url(&self) -> String {
        format!("http://{}:{}/ready", self.api_host, self.api_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranged_clamps_and_defaults() {
        env::set_var("PLCWATCH_TEST_RANGED_A", "99");
        assert_eq!(env_ranged("PLCWATCH_TEST_RANGED_A", 5u32, 1, 20), 20);
        env::set_var("PLCWATCH_TEST_RANGED_A", "0");
        assert_eq!(env_ranged("PLCWATCH_TEST_RANGED_A", 5u32, 1, 20), 1);
        env::set_var("PLCWATCH_TEST_RANGED_A", "7");
        assert_eq!(env_ranged("PLCWATCH_TEST_RANGED_A", 5u32, 1, 20), 7);
        env::set_var("PLCWATCH_TEST_RANGED_A", "junk");
        assert_eq!(env_ranged("PLCWATCH_TEST_RANGED_A", 5u32, 1, 20), 5);
        env::remove_var("PLCWATCH_TEST_RANGED_A");
        assert_eq!(env_ranged("PLCWATCH_TEST_RANGED_A", 5u32, 1, 20), 5);
    }

    #[test]
    fn flag_parsing() {
        env::set_var("PLCWATCH_TEST_FLAG_B", "true");
        assert!(env_flag("PLCWATCH_TEST_FLAG_B", false));
        env::set_var("PLCWATCH_TEST_FLAG_B", "0");
        assert!(!env_flag("PLCWATCH_TEST_FLAG_B", true));
        env::remove_var("PLCWATCH_TEST_FLAG_B");
        assert!(env_flag("PLCWATCH_TEST_FLAG_B", true));
    }
}
