//! Simulated MCM3000 for tests and hardware-free runs.
//!
//! The device side of a `tokio::io::duplex` pipe answers the same frames a
//! real controller does. A [`MockHandle`] kept by the test inspects what was
//! received and injects faults at run time.
//!
//! ```rust,ignore
//! let (stream, handle) = MockMcm3000::new().with_motion_step(25).spawn();
//! let mcm = Mcm3000Driver::connect_with_stream(&config, stream).await?;
//!
//! handle.set_behavior(MockBehavior::Silent);
//! assert!(mcm.position(1).await.unwrap_err().is_timeout());
//! ```

use crate::protocol::{data_len, Command, EncoderCountReply, HEADER_LEN};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing::{trace, warn};

const CHANNELS: usize = 3;
const PIPE_CAPACITY: usize = 256;

/// How the simulated controller answers encoder queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockBehavior {
    /// Well-formed replies.
    #[default]
    Normal,
    /// Never reply.
    Silent,
    /// Send only the first 8 bytes of each reply.
    Truncated,
    /// Append two stray bytes to each reply.
    ExtraBytes,
    /// Reply with a corrupted message id.
    BadHeader,
    /// Reply for the next channel instead of the one asked for.
    WrongChannel,
}

#[derive(Debug, Default)]
struct MockState {
    positions: [i32; CHANNELS],
    targets: [Option<i32>; CHANNELS],
    /// Counts travelled per encoder query; `None` moves instantly.
    motion_step: Option<u32>,
    behavior: MockBehavior,
    frames: Vec<Vec<u8>>,
}

impl MockState {
    fn advance(&mut self, ch: usize) {
        let Some(target) = self.targets[ch] else {
            return;
        };
        let pos = &mut self.positions[ch];
        match self.motion_step {
            None => *pos = target,
            Some(step) => {
                let step = i64::from(step);
                let delta = (i64::from(target) - i64::from(*pos)).clamp(-step, step);
                // delta is bounded by the distance to an i32 target
                *pos = (i64::from(*pos) + delta) as i32;
            }
        }
        if *pos == target {
            self.targets[ch] = None;
        }
    }

    fn handle(&mut self, frame: Vec<u8>) -> Option<Vec<u8>> {
        let command = Command::decode(&frame);
        self.frames.push(frame);

        let command = match command {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "mock MCM3000 ignoring frame");
                return None;
            }
        };
        let ch = usize::from(command.channel());
        if ch >= CHANNELS {
            return None;
        }

        match command {
            Command::MoveAbsolute { counts, .. } => {
                self.targets[ch] = Some(counts);
                if self.motion_step.is_none() {
                    self.advance(ch);
                }
                None
            }
            Command::SetEncoderCount { counts, .. } => {
                self.positions[ch] = counts;
                self.targets[ch] = None;
                None
            }
            Command::RequestEncoderCount { channel } => {
                self.advance(ch);
                let counts = self.positions[ch];
                let mut reply = EncoderCountReply { channel, counts }.encode();
                match self.behavior {
                    MockBehavior::Normal => Some(reply),
                    MockBehavior::Silent => None,
                    MockBehavior::Truncated => {
                        reply.truncate(8);
                        Some(reply)
                    }
                    MockBehavior::ExtraBytes => {
                        reply.extend_from_slice(&[0xAA, 0xBB]);
                        Some(reply)
                    }
                    MockBehavior::BadHeader => {
                        reply[0] = 0xFF;
                        Some(reply)
                    }
                    MockBehavior::WrongChannel => Some(
                        EncoderCountReply {
                            channel: (channel + 1) % CHANNELS as u8,
                            counts,
                        }
                        .encode(),
                    ),
                }
            }
        }
    }
}

/// Builder for a simulated controller.
#[derive(Debug, Default)]
pub struct MockMcm3000 {
    state: MockState,
}

impl MockMcm3000 {
    /// Controller with all axes at count 0, moving instantly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `axis` (1-3) at `counts`.
    #[must_use]
    pub fn with_position(mut self, axis: u8, counts: i32) -> Self {
        if let Some(pos) = channel_of(axis).and_then(|ch| self.state.positions.get_mut(ch)) {
            *pos = counts;
        }
        self
    }

    /// Travel at most `counts` per encoder query instead of arriving instantly.
    ///
    /// `0` makes every axis stall.
    #[must_use]
    pub fn with_motion_step(mut self, counts: u32) -> Self {
        self.state.motion_step = Some(counts);
        self
    }

    /// Initial reply behavior.
    #[must_use]
    pub fn with_behavior(mut self, behavior: MockBehavior) -> Self {
        self.state.behavior = behavior;
        self
    }

    /// Start serving on a background task of the current runtime.
    ///
    /// Returns the host end of the pipe and a handle to the device state.
    /// The task ends when the host end is dropped.
    pub fn spawn(self) -> (DuplexStream, MockHandle) {
        let (host, device) = tokio::io::duplex(PIPE_CAPACITY);
        let state = Arc::new(Mutex::new(self.state));
        tokio::spawn(serve(device, Arc::clone(&state)));
        (host, MockHandle { state })
    }
}

fn channel_of(axis: u8) -> Option<usize> {
    usize::from(axis).checked_sub(1).filter(|ch| *ch < CHANNELS)
}

async fn serve(mut io: DuplexStream, state: Arc<Mutex<MockState>>) {
    loop {
        let mut header = [0u8; HEADER_LEN];
        if io.read_exact(&mut header).await.is_err() {
            return;
        }

        let body = match data_len(&header) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "mock MCM3000 received unknown header");
                state.lock().frames.push(header.to_vec());
                continue;
            }
        };

        let mut frame = header.to_vec();
        frame.resize(HEADER_LEN + body, 0);
        if body > 0 && io.read_exact(&mut frame[HEADER_LEN..]).await.is_err() {
            return;
        }
        trace!(frame = ?frame, "mock MCM3000 received");

        let reply = state.lock().handle(frame);
        if let Some(bytes) = reply {
            if io.write_all(&bytes).await.is_err() {
                return;
            }
        }
    }
}

/// Test-side view of a running simulated controller.
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    /// Change how encoder queries are answered.
    pub fn set_behavior(&self, behavior: MockBehavior) {
        self.state.lock().behavior = behavior;
    }

    /// Current encoder count of `axis` (1-3). Out-of-range axes read 0.
    pub fn position(&self, axis: u8) -> i32 {
        channel_of(axis).map_or(0, |ch| self.state.lock().positions[ch])
    }

    /// Move `axis` behind the driver's back, as the joystick would.
    pub fn set_position(&self, axis: u8, counts: i32) {
        if let Some(ch) = channel_of(axis) {
            let mut state = self.state.lock();
            state.positions[ch] = counts;
            state.targets[ch] = None;
        }
    }

    /// Every frame received so far, raw.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().frames.clone()
    }

    /// Every well-formed command received so far.
    pub fn commands(&self) -> Vec<Command> {
        self.state
            .lock()
            .frames
            .iter()
            .filter_map(|f| Command::decode(f).ok())
            .collect()
    }

    /// Total bytes received so far.
    pub fn bytes_received(&self) -> usize {
        self.state.lock().frames.iter().map(Vec::len).sum()
    }

    /// Forget recorded frames.
    pub fn clear_frames(&self) {
        self.state.lock().frames.clear();
    }
}
