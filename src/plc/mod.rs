use std::io;
use std::sync::Arc;
use thiserror::Error;

pub mod fetcher;
pub mod proto;
pub mod service;
pub mod transport;

pub use service::PlcService;
pub use transport::PlcTransport;

/// Transport failure taxonomy surfaced to the service layer.
#[derive(Debug, Error)]
pub enum PlcError {
    /// Not connected and reconnect failed.
    #[error("not connected to PLC")]
    Disconnected,
    /// Read/write/executor deadline exceeded.
    #[error("PLC operation timed out")]
    Timeout,
    /// The PLC endpoint refused the connection (device down or booting).
    #[error("PLC connection refused")]
    ConnectionRefused,
    /// Malformed response or a device error code.
    #[error("PLC protocol error: {0}")]
    Protocol(String),
}

pub type PlcResult<T> = Result<T, PlcError>;

impl PlcError {
    pub(crate) fn from_io(e: &io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => PlcError::Timeout,
            io::ErrorKind::ConnectionRefused => PlcError::ConnectionRefused,
            _ => PlcError::Disconnected,
        }
    }
    /// Protocol errors are terminal for a request; everything else is a
    /// transport fault worth a reconnect attempt.
    #[inline]
    pub(crate) fn is_transport(&self) -> bool {
        !matches!(self, PlcError::Protocol(_))
    }
}

/// Typed read surface of the PLC connection. `PlcTransport` is the
/// production implementation; tests substitute stubs.
pub trait Transport: Send + Sync {
    fn read_words(&self, device: &str, count: u16) -> PlcResult<Vec<u16>>;
    fn read_bits(&self, device: &str, count: u16) -> PlcResult<Vec<bool>>;
    fn read_dwords(&self, device: &str, count: u16) -> PlcResult<Vec<i32>>;
    /// Stale-connection probe: verify the link with a 1-word read,
    /// reconnecting if needed.
    fn ensure_connected(&self) -> bool;
    fn connected(&self) -> bool;
    fn disconnect(&self) -> bool;
}

pub type TransportHandle = Arc<dyn Transport>;
