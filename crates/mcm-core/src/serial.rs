//! Serial Port Abstractions for Driver Crates
//!
//! Shared types and utilities for async binary serial communication, so that
//! driver crates do not each carry their own port plumbing.
//!
//! # Types
//!
//! - [`SerialPortIO`]: Trait alias combining AsyncRead + AsyncWrite for serial ports
//! - [`DynSerial`]: Type-erased boxed serial port
//! - [`FrameReadError`]: Why a fixed-width frame read stopped early
//!
//! # Utilities
//!
//! - [`open_serial_async`]: Open a serial port with spawn_blocking (`serial` feature)
//! - [`read_exact_until`]: Fill a buffer before a deadline
//! - [`discard_pending`]: Drop bytes that are already waiting, without blocking
//!
//! # Example
//!
//! ```rust,ignore
//! use mcm_core::serial::{open_serial_async, read_exact_until, DynSerial};
//! use tokio::time::Instant;
//!
//! let mut port: DynSerial = Box::new(open_serial_async("/dev/ttyUSB0", 460800, "MCM3000").await?);
//! port.write_all(&request).await?;
//!
//! let mut reply = [0u8; 12];
//! read_exact_until(&mut port, &mut reply, Instant::now() + timeout).await?;
//! ```

use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::time::Instant;

// =============================================================================
// Serial Port Trait
// =============================================================================

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port. This includes:
/// - `tokio_serial::SerialStream` (real hardware)
/// - `tokio::io::DuplexStream` (testing and the simulated controller)
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

// =============================================================================
// Opening
// =============================================================================

/// Open a serial port asynchronously using spawn_blocking.
///
/// Standard settings are applied: 8N1, no flow control.
///
/// # Parameters
///
/// - `port_path`: Path to the serial port (e.g., "/dev/ttyUSB0", "COM3")
/// - `baud_rate`: Baud rate (the MCM3000 runs at 460800)
/// - `device_name`: Human-readable device name for error messages
///
/// # Errors
///
/// Returns an error if the port cannot be opened or spawn_blocking fails.
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    device_name: &str,
) -> anyhow::Result<tokio_serial::SerialStream> {
    use anyhow::Context;
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();
    let device_name_owned = device_name.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .context(format!(
                "Failed to open {} serial port: {}",
                device_name_owned, port_path_owned
            ))
    })
    .await
    .context("spawn_blocking for serial port opening failed")?
}

// =============================================================================
// Reading
// =============================================================================

/// Reason a [`read_exact_until`] call returned before the buffer was full.
///
/// Every variant carries the number of bytes that did arrive, so callers can
/// tell a silent device (`received == 0`) from a truncated frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameReadError {
    /// The deadline passed.
    #[error("deadline elapsed after {received} bytes")]
    Deadline {
        /// Bytes read before the deadline.
        received: usize,
    },
    /// The stream reported end-of-file.
    #[error("stream closed after {received} bytes")]
    Closed {
        /// Bytes read before EOF.
        received: usize,
    },
    /// The underlying read failed.
    #[error("read failed after {received} bytes: {source}")]
    Io {
        /// The I/O error.
        #[source]
        source: std::io::Error,
        /// Bytes read before the failure.
        received: usize,
    },
}

impl FrameReadError {
    /// Bytes received before the read stopped.
    #[must_use]
    pub fn received(&self) -> usize {
        match self {
            FrameReadError::Deadline { received }
            | FrameReadError::Closed { received }
            | FrameReadError::Io { received, .. } => *received,
        }
    }
}

/// Fill `buf` completely, failing once `deadline` passes.
///
/// The deadline bounds the whole frame, not each individual read, so a
/// device trickling one byte at a time still cannot stretch the wait.
pub async fn read_exact_until<R: AsyncRead + Unpin + ?Sized>(
    port: &mut R,
    buf: &mut [u8],
    deadline: Instant,
) -> Result<(), FrameReadError> {
    let mut filled = 0usize;

    while filled < buf.len() {
        match tokio::time::timeout_at(deadline, port.read(&mut buf[filled..])).await {
            Err(_) => return Err(FrameReadError::Deadline { received: filled }),
            Ok(Ok(0)) => return Err(FrameReadError::Closed { received: filled }),
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Ok(Err(source)) => {
                return Err(FrameReadError::Io {
                    source,
                    received: filled,
                })
            }
        }
    }

    Ok(())
}

/// Read and drop every byte that is already buffered, without waiting.
///
/// Returns the number of bytes discarded. Stops at the first read that would
/// block, at EOF, or on an I/O error.
pub fn discard_pending<R: AsyncRead + Unpin + ?Sized>(port: &mut R) -> usize {
    let mut discard = [0u8; 256];
    let mut total_discarded = 0usize;

    loop {
        match port.read(&mut discard).now_or_never() {
            Some(Ok(0)) | None => break,
            Some(Ok(n)) => total_discarded += n,
            Some(Err(e)) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Some(Err(_)) => break,
        }
    }

    total_discarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_read_exact_until_fills_buffer() {
        let (mut host, mut device) = tokio::io::duplex(64);
        host.write_all(&[1, 2, 3, 4]).await.unwrap();

        let mut buf = [0u8; 4];
        read_exact_until(&mut device, &mut buf, Instant::now() + Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_read_exact_until_across_chunks() {
        let (mut host, mut device) = tokio::io::duplex(64);

        let writer = tokio::spawn(async move {
            host.write_all(&[1, 2]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            host.write_all(&[3, 4, 5, 6]).await.unwrap();
            host
        });

        let mut buf = [0u8; 6];
        read_exact_until(&mut device, &mut buf, Instant::now() + Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 5, 6]);
        drop(writer.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_exact_until_deadline_reports_partial() {
        let (mut host, mut device) = tokio::io::duplex(64);
        host.write_all(&[9, 9, 9]).await.unwrap();

        let start = Instant::now();
        let deadline = start + Duration::from_millis(500);
        let mut buf = [0u8; 12];
        let err = read_exact_until(&mut device, &mut buf, deadline)
            .await
            .unwrap_err();

        assert!(matches!(err, FrameReadError::Deadline { received: 3 }));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500) && elapsed < Duration::from_millis(505));
    }

    #[tokio::test]
    async fn test_read_exact_until_reports_eof() {
        let (host, mut device) = tokio::io::duplex(64);
        drop(host);

        let mut buf = [0u8; 2];
        let err = read_exact_until(&mut device, &mut buf, Instant::now() + Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FrameReadError::Closed { received: 0 }));
        assert_eq!(err.received(), 0);
    }

    #[tokio::test]
    async fn test_discard_pending() {
        let (mut host, mut device) = tokio::io::duplex(64);
        host.write_all(b"stale data 12345").await.unwrap();

        assert_eq!(discard_pending(&mut device), 16);
        // Nothing left, and the call must not block.
        assert_eq!(discard_pending(&mut device), 0);
    }
}
