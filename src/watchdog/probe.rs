//! Blocking HTTP prober with a reusable client. Connection errors,
//! non-200 responses and payload decode problems all map to a probe
//! failure; nothing in here may take the watchdog down.

use super::monitor::ProbeOutcome;
use log::{debug, warn};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Deserialize)]
struct HealthPayload {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    pid: Option<u32>,
}

#[derive(Deserialize)]
struct ReadyPayload {
    status: String,
    #[serde(default)]
    thread_pool_ok: bool,
    #[serde(default)]
    plc_service_ready: bool,
    #[serde(default)]
    plc_alive: bool,
}

pub struct Prober {
    client: Option<Client>,
    health_url: String,
    ready_url: String,
}

impl Prober {
    pub fn new(health_url: String, ready_url: String) -> Self {
        Self {
            client: None,
            health_url,
            ready_url,
        }
    }

    /// The client is reused across probes; it is cheap to hand out, a
    /// `reqwest` client clone shares the connection pool.
    fn client(&mut self) -> Option<Client> {
        if self.client.is_none() {
            match Client::builder().timeout(PROBE_TIMEOUT).build() {
                Ok(client) => self.client = Some(client),
                Err(e) => {
                    warn!("unable to build probe client: {}", e);
                    return None;
                }
            }
        }
        self.client.clone()
    }

    /// Drops the HTTP client so the next probe builds a fresh one,
    /// discarding sockets of a stopped API process.
    pub fn reset(&mut self) {
        self.client = None;
    }

    pub fn health(&mut self) -> ProbeOutcome {
        let Some(client) = self.client() else {
            return ProbeOutcome::Failure;
        };
        match client.get(&self.health_url).send() {
            Ok(resp) if resp.status().is_success() => match resp.json::<HealthPayload>() {
                Ok(payload) => {
                    debug!(
                        "health check OK: status={:?} pid={:?}",
                        payload.status, payload.pid
                    );
                    ProbeOutcome::Success { pid: payload.pid }
                }
                Err(e) => {
                    warn!("health check failed (payload decode): {}", e);
                    ProbeOutcome::Failure
                }
            },
            Ok(resp) => {
                warn!("health check failed: status={}", resp.status());
                ProbeOutcome::Failure
            }
            Err(e) => {
                warn!("health check failed (request error): {}", e);
                ProbeOutcome::Failure
            }
        }
    }

    /// Readiness probe: informational only, never drives restarts.
    /// Returns the reported status string when one was obtained.
    pub fn ready(&mut self) -> Option<String> {
        let client = self.client()?;
        match client.get(&self.ready_url).send() {
            Ok(resp) => match resp.json::<ReadyPayload>() {
                Ok(payload) => {
                    if payload.status != "ok" {
                        warn!(
                            "readiness {}: thread_pool_ok={} plc_service_ready={} plc_alive={}",
                            payload.status,
                            payload.thread_pool_ok,
                            payload.plc_service_ready,
                            payload.plc_alive
                        );
                    }
                    Some(payload.status)
                }
                Err(e) => {
                    warn!("readiness check failed (payload decode): {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("readiness check failed (request error): {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// One-shot HTTP double answering with a canned response.
    fn spawn_http_stub(response: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(response);
            }
        });
        format!("http://{}", addr)
    }

    #[test]
    fn healthy_payload_parses_pid() {
        let base = spawn_http_stub(
            b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 28\r\n\r\n{\"status\":\"ok\",\"pid\":12345}\n",
        );
        let mut prober = Prober::new(format!("{}/health", base), String::new());
        assert_eq!(
            prober.health(),
            ProbeOutcome::Success { pid: Some(12345) }
        );
    }

    #[test]
    fn unreachable_api_is_a_probe_failure() {
        // bind then drop to get a port nothing listens on
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let mut prober = Prober::new(
            format!("http://{}/health", addr),
            format!("http://{}/ready", addr),
        );
        assert_eq!(prober.health(), ProbeOutcome::Failure);
        assert_eq!(prober.ready(), None);
    }

    #[test]
    fn garbage_payload_is_a_probe_failure() {
        let base = spawn_http_stub(
            b"HTTP/1.1 200 OK\r\ncontent-length: 9\r\n\r\nnot json!",
        );
        let mut prober = Prober::new(format!("{}/health", base), String::new());
        assert_eq!(prober.health(), ProbeOutcome::Failure);
    }

    #[test]
    fn http_error_status_is_a_probe_failure() {
        let base = spawn_http_stub(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\n\r\n");
        let mut prober = Prober::new(format!("{}/health", base), String::new());
        assert_eq!(prober.health(), ProbeOutcome::Failure);
    }
}
