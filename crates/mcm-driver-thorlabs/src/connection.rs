//! Serial connection to one controller.
//!
//! Owns the port and serializes request/reply exchanges: the async mutex is
//! held from the moment a command is written until its reply has been read,
//! so two callers can never interleave frames.

use crate::protocol::{Command, EncoderCountReply, ProtocolError, ReplyShape, ENCODER_REPLY_LEN};
use mcm_core::limits::WRITE_TIMEOUT;
use mcm_core::serial::{discard_pending, open_serial_async, read_exact_until, DynSerial, FrameReadError};
use mcm_core::{McmError, McmResult};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, trace, warn};

/// An open (or closed) serial link to an MCM3000.
pub struct Connection {
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
    port: Mutex<Option<DynSerial>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("port_name", &self.port_name)
            .field("baud_rate", &self.baud_rate)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Open `port_name` at `baud_rate`, 8N1, no flow control.
    ///
    /// `timeout` bounds every reply read on this connection.
    #[instrument(skip_all, fields(port = %port_name, baud_rate = baud_rate), err)]
    pub async fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> McmResult<Self> {
        let stream = open_serial_async(port_name, baud_rate, "MCM3000")
            .await
            .map_err(|e| McmError::connection(port_name, format!("no connection: {:#}", e)))?;
        debug!("Serial port opened");
        Ok(Self::new(port_name, baud_rate, timeout, Box::new(stream)))
    }

    /// Wrap an already-open byte stream.
    pub fn from_stream(name: impl Into<String>, stream: DynSerial, timeout: Duration) -> Self {
        Self::new(name, 0, timeout, stream)
    }

    fn new(name: impl Into<String>, baud_rate: u32, timeout: Duration, stream: DynSerial) -> Self {
        Self {
            port_name: name.into(),
            baud_rate,
            timeout,
            port: Mutex::new(Some(stream)),
        }
    }

    /// Port name this connection was opened on.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Baud rate, or 0 for a wrapped stream.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Per-reply read timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether the port is still held.
    pub async fn is_open(&self) -> bool {
        self.port.lock().await.is_some()
    }

    /// Release the port. Returns `false` if it was already closed.
    pub async fn close(&self) -> bool {
        let released = self.port.lock().await.take();
        released.is_some()
    }

    fn closed_error(&self) -> McmError {
        McmError::connection(&self.port_name, "connection is closed")
    }

    /// Write a command that has no reply.
    pub async fn send(&self, command: &Command) -> McmResult<()> {
        debug_assert_eq!(command.expected_reply(), ReplyShape::None);
        self.transact(command, Instant::now() + self.timeout, self.timeout)
            .await?;
        Ok(())
    }

    /// Query the encoder count of `channel`, bounded by the read timeout.
    pub async fn query_encoder_count(&self, channel: u8) -> McmResult<EncoderCountReply> {
        self.query_encoder_count_until(channel, Instant::now() + self.timeout)
            .await
    }

    /// Query the encoder count of `channel`.
    ///
    /// The reply must arrive before the earlier of `deadline` and the read
    /// timeout. A timeout error reports whichever of the two applied.
    pub async fn query_encoder_count_until(
        &self,
        channel: u8,
        deadline: Instant,
    ) -> McmResult<EncoderCountReply> {
        let command = Command::RequestEncoderCount { channel };
        let now = Instant::now();
        let read_deadline = deadline.min(now + self.timeout);
        let bound = read_deadline.saturating_duration_since(now);
        self.transact(&command, read_deadline, bound)
            .await?
            .ok_or_else(|| McmError::Protocol("encoder query produced no reply".into()))
    }

    /// Write `command` and, if it has one, read its reply before `deadline`.
    ///
    /// `bound` is the wait reported if the deadline passes.
    async fn transact(
        &self,
        command: &Command,
        deadline: Instant,
        bound: Duration,
    ) -> McmResult<Option<EncoderCountReply>> {
        let mut guard = self.port.lock().await;
        let port = guard.as_mut().ok_or_else(|| self.closed_error())?;

        let stale = discard_pending(port);
        if stale > 0 {
            warn!(
                port = %self.port_name,
                discarded = stale,
                "Discarded unexpected bytes before command"
            );
        }

        let frame = command.encode();
        trace!(port = %self.port_name, channel = command.channel(), frame = ?frame, "sending");

        match tokio::time::timeout(WRITE_TIMEOUT, async {
            port.write_all(&frame).await?;
            port.flush().await
        })
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(McmError::connection(
                    &self.port_name,
                    format!("write failed: {}", e),
                ))
            }
            Err(_) => return Err(McmError::timeout("command write", WRITE_TIMEOUT)),
        }

        match command.expected_reply() {
            ReplyShape::None => Ok(None),
            ReplyShape::EncoderCount => {
                let mut reply = [0u8; ENCODER_REPLY_LEN];
                read_exact_until(port, &mut reply, deadline)
                    .await
                    .map_err(|e| self.map_read_error(e, bound))?;

                trace!(port = %self.port_name, frame = ?reply, "received");

                let decoded = EncoderCountReply::decode(&reply, command.channel())?;

                let trailing = discard_pending(port);
                if trailing > 0 {
                    return Err(ProtocolError::TrailingBytes { count: trailing }.into());
                }

                Ok(Some(decoded))
            }
        }
    }

    fn map_read_error(&self, err: FrameReadError, bound: Duration) -> McmError {
        match err {
            FrameReadError::Deadline { received: 0 } => {
                McmError::timeout("encoder count reply", bound)
            }
            FrameReadError::Deadline { received } => McmError::Protocol(format!(
                "truncated reply: {} of {} bytes before timeout",
                received, ENCODER_REPLY_LEN
            )),
            FrameReadError::Closed { received } => McmError::connection(
                &self.port_name,
                format!("device closed the stream after {} bytes", received),
            ),
            FrameReadError::Io { source, .. } => {
                McmError::connection(&self.port_name, format!("read failed: {}", source))
            }
        }
    }
}
