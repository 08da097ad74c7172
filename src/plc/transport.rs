use super::proto;
use super::{PlcError, PlcResult, Transport};
use crate::settings::Settings;
use crate::sysutil;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
/// Pause between refused connect attempts (the PLC may be booting).
const CONNECT_REFUSED_PAUSE: Duration = Duration::from_secs(5);
/// Longer pause between refused reconnect attempts.
const RECONNECT_REFUSED_PAUSE: Duration = Duration::from_secs(15);

const KEEPALIVE_IDLE: libc::c_int = 60;
const KEEPALIVE_INTERVAL: libc::c_int = 10;
const KEEPALIVE_PROBES: libc::c_int = 3;

/// Always-valid register used for stale-connection probes (CPU
/// diagnostics area).
pub const PING_DEVICE: &str = "SD0";

/// The process-wide PLC connection: owns the socket, reconnects on
/// failure and exposes the typed read surface. At most one instance per
/// process; all request-path access goes through the service layer.
pub struct PlcTransport {
    addr: SocketAddr,
    stream: Mutex<Option<TcpStream>>,
    connected: AtomicBool,
    busy: Mutex<()>,
    auto_reconnect: bool,
    reconnect_retry: u32,
    reconnect_delay: Duration,
    reconnect_restart: bool,
    debug_dummy_read: bool,
}

fn sockopt(fd: libc::c_int, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> bool {
    let res = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            std::ptr::addr_of!(value).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    res == 0
}

/// OS keepalive detects half-open connections without application
/// traffic: idle 60 s, probe every 10 s, drop after 3 misses.
fn enable_keepalive(stream: &TcpStream) {
    let fd = stream.as_raw_fd();
    let ok = sockopt(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, 1)
        && sockopt(fd, libc::IPPROTO_TCP, libc::TCP_KEEPIDLE, KEEPALIVE_IDLE)
        && sockopt(fd, libc::IPPROTO_TCP, libc::TCP_KEEPINTVL, KEEPALIVE_INTERVAL)
        && sockopt(fd, libc::IPPROTO_TCP, libc::TCP_KEEPCNT, KEEPALIVE_PROBES);
    if ok {
        debug!("TCP keepalive enabled");
    } else {
        warn!(
            "failed to enable TCP keepalive: {}",
            std::io::Error::last_os_error()
        );
    }
}

impl PlcTransport {
    pub fn new(settings: &Settings) -> Self {
        Self {
            addr: settings.plc_addr(),
            stream: <_>::default(),
            connected: AtomicBool::new(false),
            busy: <_>::default(),
            auto_reconnect: settings.auto_reconnect,
            reconnect_retry: settings.reconnect_retry.max(1),
            reconnect_delay: settings.reconnect_delay,
            reconnect_restart: settings.reconnect_restart,
            debug_dummy_read: settings.debug_dummy_read,
        }
    }

    fn open_stream(&self) -> Result<TcpStream, std::io::Error> {
        let stream = TcpStream::connect_timeout(&self.addr, CONNECT_TIMEOUT)?;
        stream.set_read_timeout(Some(SOCKET_TIMEOUT))?;
        stream.set_write_timeout(Some(SOCKET_TIMEOUT))?;
        stream.set_nodelay(true)?;
        enable_keepalive(&stream);
        Ok(stream)
    }

    /// Opens the connection. Connection-refused outcomes are retried
    /// with a pause (the PLC may still be booting); any other error
    /// fails fast.
    pub fn connect(&self) -> bool {
        for attempt in 0..self.reconnect_retry {
            match self.open_stream() {
                Ok(stream) => {
                    self.stream.lock().replace(stream);
                    self.connected.store(true, Ordering::SeqCst);
                    info!("connected to PLC at {}", self.addr);
                    return true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    if attempt + 1 < self.reconnect_retry {
                        warn!(
                            "connection refused (attempt {}/{}): {}, retrying in {:?}",
                            attempt + 1,
                            self.reconnect_retry,
                            e,
                            CONNECT_REFUSED_PAUSE
                        );
                        thread::sleep(CONNECT_REFUSED_PAUSE);
                    } else {
                        error!(
                            "failed to connect to PLC after {} attempt(s): {}",
                            self.reconnect_retry, e
                        );
                    }
                }
                Err(e) => {
                    error!("failed to connect to PLC: {}", e);
                    self.connected.store(false, Ordering::SeqCst);
                    return false;
                }
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        false
    }

    /// Bounded retry loop: disconnect, connect, pause. Refused
    /// connections wait longer than other failures.
    pub fn reconnect(&self) -> bool {
        for attempt in 0..self.reconnect_retry {
            info!("reconnect attempt {}/{}", attempt + 1, self.reconnect_retry);
            self.close_stream();
            match self.open_stream() {
                Ok(stream) => {
                    self.stream.lock().replace(stream);
                    self.connected.store(true, Ordering::SeqCst);
                    info!("reconnect succeeded");
                    return true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    warn!(
                        "reconnect attempt {} port refused: {}, waiting longer",
                        attempt + 1,
                        e
                    );
                    thread::sleep(RECONNECT_REFUSED_PAUSE);
                }
                Err(e) => {
                    warn!("reconnect attempt {} failed: {}", attempt + 1, e);
                    thread::sleep(self.reconnect_delay);
                }
            }
        }
        error!("failed to reconnect after {} attempt(s)", self.reconnect_retry);
        false
    }

    fn close_stream(&self) {
        if let Some(stream) = self.stream.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    fn exchange(stream: &mut TcpStream, frame: &[u8]) -> PlcResult<Vec<u8>> {
        stream.write_all(frame).map_err(|e| PlcError::from_io(&e))?;
        let mut header = [0u8; proto::RESP_HEADER_LEN];
        stream
            .read_exact(&mut header)
            .map_err(|e| PlcError::from_io(&e))?;
        let len = proto::parse_response_header(&header)?;
        let mut body = vec![0u8; len];
        stream
            .read_exact(&mut body)
            .map_err(|e| PlcError::from_io(&e))?;
        Ok(body)
    }

    fn request(&self, frame: &[u8]) -> PlcResult<Vec<u8>> {
        let _busy = self.busy.lock();
        let mut lock = self.stream.lock();
        let Some(stream) = lock.as_mut() else {
            return Err(PlcError::Disconnected);
        };
        let result = Self::exchange(stream, frame);
        if let Err(ref e) = result {
            if e.is_transport() {
                lock.take();
                self.connected.store(false, Ordering::SeqCst);
            }
        }
        result
    }

    fn read_words_raw(&self, device: &str, count: u16) -> PlcResult<Vec<u16>> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(PlcError::Disconnected);
        }
        let dev = proto::parse_device(device)?;
        let body = self.request(&proto::build_batch_read(dev, count, false))?;
        let payload = proto::parse_response_body(&body)?;
        proto::words_from_payload(payload, count)
    }

    fn read_bits_raw(&self, device: &str, count: u16) -> PlcResult<Vec<bool>> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(PlcError::Disconnected);
        }
        let dev = proto::parse_device(device)?;
        let body = self.request(&proto::build_batch_read(dev, count, true))?;
        let payload = proto::parse_response_body(&body)?;
        proto::bits_from_payload(payload, count)
    }

    /// Typed-read pipeline: the debug stub short-circuits with zeroed
    /// data, otherwise the raw call runs under the auto-reconnect
    /// wrapper (one reconnect, one retry).
    fn dispatch<T, F>(&self, op: &str, zero: T, raw: F) -> PlcResult<T>
    where
        F: Fn() -> PlcResult<T>,
    {
        if self.debug_dummy_read {
            debug!("dummy read for {}", op);
            return Ok(zero);
        }
        match raw() {
            Ok(v) => Ok(v),
            Err(e) if e.is_transport() && self.auto_reconnect => {
                error!("{} failed: {}", op, e);
                info!("attempting to reconnect");
                let err = if self.reconnect() {
                    match raw() {
                        Ok(v) => return Ok(v),
                        Err(retry_err) => retry_err,
                    }
                } else {
                    e
                };
                error!("{} failed after reconnect attempts: {}", op, err);
                if self.reconnect_restart {
                    error!("reconnection exhausted, requesting process restart");
                    sysutil::terminate_self();
                }
                Err(err)
            }
            Err(e) => Err(e),
        }
    }
}

impl Transport for PlcTransport {
    fn read_words(&self, device: &str, count: u16) -> PlcResult<Vec<u16>> {
        let result = self.dispatch("read_words", vec![0; usize::from(count)], || {
            self.read_words_raw(device, count)
        });
        if let Ok(ref data) = result {
            debug!("read words {}: {:?}", device, data);
        }
        result
    }

    fn read_bits(&self, device: &str, count: u16) -> PlcResult<Vec<bool>> {
        let result = self.dispatch("read_bits", vec![false; usize::from(count)], || {
            self.read_bits_raw(device, count)
        });
        if let Ok(ref data) = result {
            debug!("read bits {}: {:?}", device, data);
        }
        result
    }

    fn read_dwords(&self, device: &str, count: u16) -> PlcResult<Vec<i32>> {
        let result = self.dispatch("read_dwords", vec![0; usize::from(count)], || {
            let words = self.read_words_raw(device, count * 2)?;
            Ok(proto::dwords_from_words(&words))
        });
        if let Ok(ref data) = result {
            debug!("read dwords {}: {:?}", device, data);
        }
        result
    }

    /// Stale-connection probe: when marked connected, verify the link
    /// with a 1-word read of a diagnostics register; any failure marks
    /// the transport disconnected and triggers a reconnect.
    fn ensure_connected(&self) -> bool {
        if self.debug_dummy_read {
            return true;
        }
        if !self.connected.load(Ordering::SeqCst) {
            warn!("PLC not connected, attempting to reconnect");
            return self.reconnect();
        }
        match self.read_words_raw(PING_DEVICE, 1) {
            Ok(_) => true,
            Err(e) => {
                warn!("PLC connection stale, reconnecting: {}", e);
                self.connected.store(false, Ordering::SeqCst);
                self.reconnect()
            }
        }
    }

    #[inline]
    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Idempotent close; always clears the connected flag.
    fn disconnect(&self) -> bool {
        self.close_stream();
        info!("disconnected from PLC");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn test_settings(addr: SocketAddr) -> Settings {
        Settings {
            plc_ip: addr.ip(),
            plc_port: addr.port(),
            auto_reconnect: false,
            reconnect_retry: 1,
            reconnect_delay: Duration::from_millis(10),
            reconnect_restart: false,
            debug_dummy_read: false,
            use_plc: true,
            line_name: "LINE_1".to_owned(),
            fetch_timeout: Duration::from_secs(3),
            ping_timeout: Duration::from_secs(2),
            fetch_failure_limit: 5,
            allow_frontend_restart: false,
            api_host: "127.0.0.1".to_owned(),
            api_port: 0,
        }
    }

    /// One-shot PLC double: accepts a single connection, answers one
    /// batch read with the given payload words.
    fn spawn_plc_stub(words: Vec<u16>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut req = [0u8; 21];
            stream.read_exact(&mut req).unwrap();
            let mut payload = Vec::new();
            for w in &words {
                payload.extend_from_slice(&w.to_le_bytes());
            }
            let mut resp = vec![0xD0, 0x00, 0x00, 0xFF, 0xFF, 0x03, 0x00];
            resp.extend_from_slice(&((payload.len() as u16 + 2).to_le_bytes()));
            resp.extend_from_slice(&[0x00, 0x00]);
            resp.extend_from_slice(&payload);
            stream.write_all(&resp).unwrap();
        });
        addr
    }

    #[test]
    fn reads_words_from_stub_plc() {
        let addr = spawn_plc_stub(vec![0x1234, 0x5678]);
        let transport = PlcTransport::new(&test_settings(addr));
        assert!(transport.connect());
        assert!(transport.connected());
        let words = transport.read_words("D100", 2).unwrap();
        assert_eq!(words, vec![0x1234, 0x5678]);
        assert!(transport.disconnect());
        assert!(!transport.connected());
    }

    #[test]
    fn refused_connect_reports_false() {
        // bind then drop to get a port nothing listens on
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let transport = PlcTransport::new(&test_settings(addr));
        assert!(!transport.connect());
        assert!(!transport.connected());
    }

    #[test]
    fn read_without_connection_is_disconnected() {
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let transport = PlcTransport::new(&test_settings(addr));
        match transport.read_words("D100", 1) {
            Err(PlcError::Disconnected) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn dummy_read_returns_zeroes_without_network() {
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let mut settings = test_settings(addr);
        settings.debug_dummy_read = true;
        let transport = PlcTransport::new(&settings);
        assert_eq!(transport.read_words("D100", 3).unwrap(), vec![0, 0, 0]);
        assert_eq!(transport.read_dwords("D100", 2).unwrap(), vec![0, 0]);
        assert_eq!(transport.read_bits("M100", 1).unwrap(), vec![false]);
    }
}
