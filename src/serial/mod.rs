//! # Serial Communication Module
//!
//! Modbus RTU link to the sensor acquisition module.
//!
//! This module handles:
//! - Opening the RS-485 serial port (8N1, configurable baud rate)
//! - Reading single holding registers through tokio-modbus
//! - Bounding every read with a timeout
//! - Classifying failures into retryable errors and a lost device

pub mod transport;

pub use transport::{RegisterTransport, TransportError};

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{timeout, Duration};
use tokio_modbus::client::{rtu, Context};
use tokio_modbus::prelude::*;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::config::SerialConfig;
use crate::error::{HydroPulseError, Result};

/// Modbus RTU transport over a local serial port
pub struct ModbusRtuTransport {
    /// Modbus client context bound to one slave
    ctx: Context,
    /// Device path (e.g., /dev/ttyUSB0 or COM3)
    device_path: String,
    /// Upper bound for one request/response exchange
    read_timeout: Duration,
}

impl std::fmt::Debug for ModbusRtuTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusRtuTransport")
            .field("device_path", &self.device_path)
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

impl ModbusRtuTransport {
    /// Open the configured serial port and attach to the Modbus slave
    ///
    /// # Arguments
    ///
    /// * `settings` - Port, baud rate, slave id and read timeout
    ///
    /// # Errors
    ///
    /// Returns `HydroPulseError::Serial` if the port cannot be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use hydro_pulse::config::SerialConfig;
    /// use hydro_pulse::serial::ModbusRtuTransport;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let transport = ModbusRtuTransport::open(&SerialConfig::default())?;
    ///     println!("Connected to: {}", transport.device_path());
    ///     Ok(())
    /// }
    /// ```
    pub fn open(settings: &SerialConfig) -> Result<Self> {
        let port = Self::open_port(&settings.port, settings.baud_rate)?;

        info!(
            "Opened Modbus RTU link at {} ({} baud, slave {})",
            settings.port, settings.baud_rate, settings.slave_id
        );

        Ok(Self::attach(
            port,
            settings.slave_id,
            settings.port.clone(),
            Duration::from_millis(settings.timeout_ms),
        ))
    }

    /// Speak Modbus RTU over an already open byte stream
    ///
    /// # Arguments
    ///
    /// * `stream` - Serial port or any other duplex byte stream
    /// * `slave_id` - Modbus unit address of the acquisition module
    /// * `device_path` - Name used in log messages
    /// * `read_timeout` - Upper bound for one request/response exchange
    pub fn attach<T>(
        stream: T,
        slave_id: u8,
        device_path: impl Into<String>,
        read_timeout: Duration,
    ) -> Self
    where
        T: AsyncRead + AsyncWrite + std::fmt::Debug + Unpin + Send + 'static,
    {
        Self {
            ctx: rtu::attach_slave(stream, Slave(slave_id)),
            device_path: device_path.into(),
            read_timeout,
        }
    }

    /// Open a specific serial port with 8N1 framing
    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| HydroPulseError::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

#[async_trait]
impl RegisterTransport for ModbusRtuTransport {
    async fn read_register(&mut self, address: u16) -> std::result::Result<u16, TransportError> {
        let response = timeout(self.read_timeout, self.ctx.read_holding_registers(address, 1))
            .await
            .map_err(|_| TransportError::Timeout)?;

        match response {
            Ok(Ok(words)) => words.first().copied().ok_or_else(|| {
                TransportError::Crc(format!("empty response for register {}", address))
            }),
            Ok(Err(exception)) => {
                debug!("Register {} read rejected: {:?}", address, exception);
                Err(TransportError::Exception(format!("{:?}", exception)))
            }
            Err(tokio_modbus::Error::Transport(err)) => Err(classify_io_error(err)),
            Err(other) => Err(TransportError::Crc(other.to_string())),
        }
    }

    async fn disconnect(&mut self) -> std::result::Result<(), TransportError> {
        match self.ctx.disconnect().await {
            Ok(()) => {
                info!("Modbus link on {} closed", self.device_path);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to close Modbus link on {}: {}", self.device_path, e);
                Err(classify_io_error(e))
            }
        }
    }
}

/// Map an I/O failure on the serial link to a transport error
///
/// Errors meaning the port itself went away are fatal; everything else is
/// treated as a bad exchange worth retrying.
pub fn classify_io_error(err: io::Error) -> TransportError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout,
        io::ErrorKind::InvalidData => TransportError::Crc(err.to_string()),
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::NotFound
        | io::ErrorKind::PermissionDenied => TransportError::Disconnected(err.to_string()),
        _ if is_unplugged(&err) => TransportError::Disconnected(err.to_string()),
        _ => TransportError::Crc(err.to_string()),
    }
}

/// EIO, ENXIO and ENODEV show up when a USB serial adapter is pulled
#[cfg(unix)]
fn is_unplugged(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(5) | Some(6) | Some(19))
}

/// ERROR_ACCESS_DENIED, ERROR_BAD_COMMAND, ERROR_GEN_FAILURE and ERROR_DEVICE_NOT_CONNECTED
#[cfg(windows)]
fn is_unplugged(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(5) | Some(22) | Some(31) | Some(1167))
}

#[cfg(not(any(unix, windows)))]
fn is_unplugged(_err: &io::Error) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use tokio::task::JoinHandle;

    #[test]
    fn test_open_with_invalid_path_returns_error() {
        let settings = SerialConfig {
            port: "/dev/nonexistent_serial_device_12345".to_string(),
            ..SerialConfig::default()
        };

        match ModbusRtuTransport::open(&settings) {
            Err(HydroPulseError::Serial(msg)) => {
                assert!(msg.contains("/dev/nonexistent_serial_device_12345"));
                assert!(msg.contains("Failed to open"));
            }
            other => panic!("Expected Serial error, got: {:?}", other),
        }
    }

    #[test]
    fn test_timeouts_are_retryable() {
        let err = classify_io_error(io::Error::new(io::ErrorKind::TimedOut, "no reply"));
        assert_eq!(err, TransportError::Timeout);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_invalid_data_is_a_frame_error() {
        let err = classify_io_error(io::Error::new(io::ErrorKind::InvalidData, "crc mismatch"));
        assert!(matches!(err, TransportError::Crc(ref msg) if msg.contains("crc mismatch")));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_broken_link_is_fatal() {
        for kind in [
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::NotConnected,
            io::ErrorKind::UnexpectedEof,
            io::ErrorKind::NotFound,
        ] {
            let err = classify_io_error(io::Error::new(kind, "gone"));
            assert!(err.is_fatal(), "{:?} should be fatal", kind);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_unplugged_adapter_is_fatal() {
        // ENODEV
        let err = classify_io_error(io::Error::from_raw_os_error(19));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_other_errors_are_retryable() {
        let err = classify_io_error(io::Error::new(io::ErrorKind::Other, "glitch"));
        assert!(!err.is_fatal());
    }

    /// CRC-16/MODBUS, low byte first on the wire
    fn with_crc(frame: &[u8]) -> Vec<u8> {
        let mut crc: u16 = 0xFFFF;
        for &byte in frame {
            crc ^= u16::from(byte);
            for _ in 0..8 {
                crc = if crc & 1 != 0 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
            }
        }
        let mut out = frame.to_vec();
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    /// Transport wired to an in-memory peer that answers one request with `reply`
    fn transport_with_reply(
        reply: Option<Vec<u8>>,
    ) -> (ModbusRtuTransport, JoinHandle<Vec<u8>>) {
        let (client, mut device) = duplex(256);
        let transport =
            ModbusRtuTransport::attach(client, 1, "duplex", Duration::from_millis(500));

        let peer = tokio::spawn(async move {
            // Read Holding Registers request: slave, fc, addr, qty, crc
            let mut request = vec![0u8; 8];
            device.read_exact(&mut request).await.unwrap();
            match reply {
                Some(reply) => {
                    device.write_all(&reply).await.unwrap();
                    // Keep the link open until the client is done
                    let mut rest = Vec::new();
                    let _ = device.read_to_end(&mut rest).await;
                }
                None => {
                    // Silent device
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
            }
            request
        });

        (transport, peer)
    }

    #[tokio::test]
    async fn test_read_register_over_stream() {
        let (mut transport, peer) =
            transport_with_reply(Some(with_crc(&[0x01, 0x03, 0x02, 0x01, 0x2C])));

        assert_eq!(transport.read_register(4).await, Ok(300));
        drop(transport);

        let request = peer.await.unwrap();
        assert_eq!(request, with_crc(&[0x01, 0x03, 0x00, 0x04, 0x00, 0x01]));
    }

    #[tokio::test]
    async fn test_exception_response_is_retryable() {
        // Illegal data address
        let (mut transport, _peer) = transport_with_reply(Some(with_crc(&[0x01, 0x83, 0x02])));

        let err = transport.read_register(7).await.unwrap_err();
        assert!(
            matches!(err, TransportError::Exception(ref msg) if msg.contains("IllegalDataAddress")),
            "got {:?}",
            err
        );
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_mismatched_response_is_a_frame_error() {
        // Answer with Read Input Registers to a holding register request
        let (mut transport, _peer) =
            transport_with_reply(Some(with_crc(&[0x01, 0x04, 0x02, 0x00, 0x01])));

        let err = transport.read_register(0).await.unwrap_err();
        assert!(matches!(err, TransportError::Crc(_)), "got {:?}", err);
        assert!(!err.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_device_times_out() {
        let (mut transport, _peer) = transport_with_reply(None);

        assert_eq!(transport.read_register(0).await, Err(TransportError::Timeout));
    }

    #[tokio::test]
    async fn test_closed_link_is_fatal() {
        let (client, device) = duplex(256);
        drop(device);
        let mut transport =
            ModbusRtuTransport::attach(client, 1, "duplex", Duration::from_millis(500));

        let err = transport.read_register(0).await.unwrap_err();
        assert!(err.is_fatal(), "got {:?}", err);
    }

    // Integration test - only runs if the acquisition module is connected
    #[tokio::test]
    #[ignore] // Run with: cargo test -- --ignored
    async fn test_read_register_with_real_hardware() {
        match ModbusRtuTransport::open(&SerialConfig::default()) {
            Ok(mut transport) => {
                let result = transport.read_register(0).await;
                println!("Register 0 on {}: {:?}", transport.device_path(), result);
                let _ = transport.disconnect().await;
            }
            Err(e) => println!("No acquisition module detected ({}), skipping", e),
        }
    }
}
