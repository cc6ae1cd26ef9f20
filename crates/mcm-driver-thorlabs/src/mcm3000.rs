//! Thorlabs MCM3000 3-Axis Motor Controller Driver
//!
//! Protocol Overview:
//! - Format: Thorlabs APT binary frames over USB-serial (see [`crate::protocol`])
//! - Baud: 460800, 8N1, no flow control
//! - Position: signed 32-bit encoder count per axis, polled on demand
//! - Moves: absolute move command without acknowledgement; completion is
//!   detected by polling the encoder until it is within tolerance of the target
//!
//! # Usage
//!
//! ```rust,ignore
//! use mcm_driver_thorlabs::{Mcm3000Config, Mcm3000Driver, AxisConfig, StageModel};
//!
//! let config = Mcm3000Config::new("auto")
//!     .with_axis(AxisConfig::new(3, StageModel::Zfm2020).reversed(true));
//!
//! let mcm = Mcm3000Driver::connect(&config).await?;
//! let legal_um = mcm.move_to(3, 125.0).await?;
//! let pos = mcm.position(3).await?;
//! mcm.close().await?;
//! ```

use crate::axis::{Axis, AxisSettings};
use crate::config::Mcm3000Config;
use crate::connection::Connection;
use crate::discovery::resolve_port;
use crate::protocol::Command;
use anyhow::Result;
use async_trait::async_trait;
use mcm_core::capabilities::{Homeable, Movable};
use mcm_core::serial::SerialPortIO;
use mcm_core::{McmError, McmResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace};

/// A position reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    /// Raw encoder count.
    pub counts: i32,
    /// Position in micrometres, after scale and direction.
    pub um: f64,
}

#[derive(Debug, Clone)]
struct AxisState {
    settings: AxisSettings,
    /// Target of a move that has been commanded but not yet confirmed.
    pending_target: Option<i32>,
    last_counts: Option<i32>,
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Absolute(f64),
    Relative(f64),
}

/// Driver for one MCM3000 controller and its configured axes.
///
/// All traffic goes through a single [`Connection`]; the driver is `Sync`
/// and can be shared (e.g. in an `Arc`) between tasks.
pub struct Mcm3000Driver {
    conn: Connection,
    axes: Mutex<BTreeMap<Axis, AxisState>>,
    move_timeout: Duration,
    home_timeout: Duration,
    poll_interval: Duration,
    wait_for_moves: bool,
}

impl std::fmt::Debug for Mcm3000Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mcm3000Driver")
            .field("conn", &self.conn)
            .field("axes", &self.axes())
            .finish_non_exhaustive()
    }
}

impl Mcm3000Driver {
    /// Open the configured port and identify the controller.
    ///
    /// `port = "auto"` searches USB serial ports for the controller. Every
    /// configured axis is queried once; any failure, including no answer
    /// within the read timeout, is reported as a connection error.
    #[instrument(skip_all, fields(port = %config.port), err)]
    pub async fn connect(config: &Mcm3000Config) -> McmResult<Self> {
        let axes = config.axis_settings()?;
        let port = resolve_port(&config.port)?;
        let conn = Connection::open(&port, config.baud_rate, config.timeout).await?;
        Self::identify(conn, config, axes).await
    }

    /// Identify a controller reachable over an already-open stream.
    pub async fn connect_with_stream<S>(config: &Mcm3000Config, stream: S) -> McmResult<Self>
    where
        S: SerialPortIO + 'static,
    {
        let axes = config.axis_settings()?;
        let conn = Connection::from_stream(config.port.clone(), Box::new(stream), config.timeout);
        Self::identify(conn, config, axes).await
    }

    async fn identify(
        conn: Connection,
        config: &Mcm3000Config,
        axes: Vec<(Axis, AxisSettings)>,
    ) -> McmResult<Self> {
        let driver = Self {
            conn,
            axes: Mutex::new(
                axes.into_iter()
                    .map(|(axis, settings)| {
                        (
                            axis,
                            AxisState {
                                settings,
                                pending_target: None,
                                last_counts: None,
                            },
                        )
                    })
                    .collect(),
            ),
            move_timeout: config.move_timeout,
            home_timeout: config.home_timeout,
            poll_interval: config.poll_interval,
            wait_for_moves: config.wait_for_moves,
        };

        for axis in driver.axes() {
            match driver.read_position(axis).await {
                Ok(pos) => debug!(axis = axis.number(), counts = pos.counts, um = pos.um, "Axis online"),
                Err(e) => {
                    return Err(McmError::connection(
                        driver.conn.port_name(),
                        format!("no answer from axis {} during identification: {}", axis, e),
                    ))
                }
            }
        }

        info!(
            port = %driver.conn.port_name(),
            axes = ?driver.axes().iter().map(|a| a.number()).collect::<Vec<_>>(),
            "MCM3000 connected"
        );
        Ok(driver)
    }

    /// Name of the port in use.
    pub fn port_name(&self) -> &str {
        self.conn.port_name()
    }

    /// Configured axes, ascending.
    pub fn axes(&self) -> Vec<Axis> {
        self.axes.lock().keys().copied().collect()
    }

    /// Conversion and limit settings of an axis.
    pub fn settings(&self, axis: u8) -> McmResult<AxisSettings> {
        self.configured(axis).map(|(_, settings)| settings)
    }

    /// `(min, max)` travel limits of an axis in micrometres.
    pub fn position_limits_um(&self, axis: u8) -> McmResult<(f64, f64)> {
        let settings = self.settings(axis)?;
        Ok((settings.min_um, settings.max_um))
    }

    /// Most recent encoder reading of an axis, without touching the wire.
    pub fn last_position(&self, axis: u8) -> McmResult<Option<Position>> {
        let axis = Axis::new(axis)?;
        let axes = self.axes.lock();
        let state = axes.get(&axis).ok_or(McmError::InvalidAxis(axis.number()))?;
        Ok(state.last_counts.map(|counts| Position {
            counts,
            um: state.settings.counts_to_um(counts),
        }))
    }

    /// Whether [`close`](Self::close) has been called.
    pub async fn is_closed(&self) -> bool {
        !self.conn.is_open().await
    }

    /// Read the current position of an axis.
    #[instrument(skip(self), err)]
    pub async fn position(&self, axis: u8) -> McmResult<Position> {
        let (axis, _) = self.configured(axis)?;
        self.read_position(axis).await
    }

    /// Move to an absolute position in micrometres.
    ///
    /// The target is range-checked before anything is sent, then rounded to
    /// the nearest encoder count. Returns the position that count
    /// corresponds to. Waits for completion unless `wait_for_moves` is off.
    #[instrument(skip(self), err)]
    pub async fn move_to(&self, axis: u8, target_um: f64) -> McmResult<f64> {
        let legal_um = self.begin_move(axis, Target::Absolute(target_um)).await?;
        if self.wait_for_moves {
            self.wait_settled(axis).await?;
        }
        Ok(legal_um)
    }

    /// Move relative to the current position.
    ///
    /// The position is read from the device first, so motion made outside
    /// this driver (e.g. with the joystick) is taken into account.
    #[instrument(skip(self), err)]
    pub async fn move_by(&self, axis: u8, delta_um: f64) -> McmResult<f64> {
        let legal_um = self.begin_move(axis, Target::Relative(delta_um)).await?;
        if self.wait_for_moves {
            self.wait_settled(axis).await?;
        }
        Ok(legal_um)
    }

    /// Start an absolute move and return without waiting for it.
    ///
    /// A later command on the same axis first waits for this move.
    #[instrument(skip(self), err)]
    pub async fn start_move(&self, axis: u8, target_um: f64) -> McmResult<f64> {
        self.begin_move(axis, Target::Absolute(target_um)).await
    }

    /// Start a relative move and return without waiting for it.
    #[instrument(skip(self), err)]
    pub async fn start_move_by(&self, axis: u8, delta_um: f64) -> McmResult<f64> {
        self.begin_move(axis, Target::Relative(delta_um)).await
    }

    /// Wait for an outstanding move on `axis` to reach its target.
    ///
    /// Returns immediately when nothing is pending. Bounded by the move
    /// timeout; the pending target is dropped either way.
    #[instrument(skip(self), err)]
    pub async fn wait_settled(&self, axis: u8) -> McmResult<()> {
        self.ensure_open().await?;
        let (axis, _) = self.configured(axis)?;
        self.finish_pending(axis).await
    }

    /// Drive an axis to encoder zero and wait for it to arrive.
    ///
    /// Bounded by the home timeout. Fails with a range error, without
    /// moving, when the axis limits exclude encoder zero. Homing an axis
    /// already at zero succeeds immediately after one poll.
    #[instrument(skip(self), err)]
    pub async fn home(&self, axis: u8) -> McmResult<()> {
        self.ensure_open().await?;
        let (axis, settings) = self.configured(axis)?;
        settings.check_range(axis, settings.counts_to_um(0))?;
        self.finish_pending(axis).await?;

        debug!(axis = axis.number(), "Homing");
        self.conn
            .send(&Command::MoveAbsolute {
                channel: axis.channel(),
                counts: 0,
            })
            .await?;

        let deadline = Instant::now() + self.home_timeout;
        self.poll_until(axis, 0, settings.tolerance_counts, deadline, self.home_timeout, "home")
            .await?;
        debug!(axis = axis.number(), "Homed");
        Ok(())
    }

    /// Redefine the current physical position of an axis as encoder zero.
    ///
    /// Waits, bounded by the read timeout, until the controller reports 0.
    #[instrument(skip(self), err)]
    pub async fn zero(&self, axis: u8) -> McmResult<()> {
        self.ensure_open().await?;
        let (axis, _) = self.configured(axis)?;
        self.finish_pending(axis).await?;

        debug!(axis = axis.number(), "Setting encoder count to zero");
        self.conn
            .send(&Command::SetEncoderCount {
                channel: axis.channel(),
                counts: 0,
            })
            .await?;

        let bound = self.conn.timeout();
        self.poll_until(axis, 0, 0, Instant::now() + bound, bound, "encoder zero")
            .await?;
        Ok(())
    }

    /// Release the serial port. Safe to call more than once.
    #[instrument(skip(self))]
    pub async fn close(&self) -> McmResult<()> {
        if self.conn.close().await {
            info!(port = %self.conn.port_name(), "MCM3000 closed");
        } else {
            debug!(port = %self.conn.port_name(), "MCM3000 already closed");
        }
        Ok(())
    }

    /// Capability handle for one axis.
    pub fn axis_handle(self: &Arc<Self>, axis: u8) -> McmResult<Mcm3000Axis> {
        let (axis, _) = self.configured(axis)?;
        Ok(Mcm3000Axis {
            driver: Arc::clone(self),
            axis,
        })
    }

    /// Capability handles for every configured axis.
    pub fn axis_handles(self: &Arc<Self>) -> Vec<Mcm3000Axis> {
        self.axes()
            .into_iter()
            .map(|axis| Mcm3000Axis {
                driver: Arc::clone(self),
                axis,
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // internals
    // -------------------------------------------------------------------------

    fn configured(&self, axis: u8) -> McmResult<(Axis, AxisSettings)> {
        let axis = Axis::new(axis)?;
        self.axes
            .lock()
            .get(&axis)
            .map(|state| (axis, state.settings.clone()))
            .ok_or(McmError::InvalidAxis(axis.number()))
    }

    async fn ensure_open(&self) -> McmResult<()> {
        if self.conn.is_open().await {
            Ok(())
        } else {
            Err(McmError::connection(
                self.conn.port_name(),
                "connection is closed",
            ))
        }
    }

    fn record(&self, axis: Axis, counts: i32) -> Position {
        let mut axes = self.axes.lock();
        match axes.get_mut(&axis) {
            Some(state) => {
                state.last_counts = Some(counts);
                Position {
                    counts,
                    um: state.settings.counts_to_um(counts),
                }
            }
            None => Position {
                counts,
                um: f64::NAN,
            },
        }
    }

    async fn read_position(&self, axis: Axis) -> McmResult<Position> {
        let reply = self.conn.query_encoder_count(axis.channel()).await?;
        let pos = self.record(axis, reply.counts);
        trace!(axis = axis.number(), counts = pos.counts, um = pos.um, "position");
        Ok(pos)
    }

    async fn begin_move(&self, axis: u8, target: Target) -> McmResult<f64> {
        self.ensure_open().await?;
        let (axis, settings) = self.configured(axis)?;

        let target_um = match target {
            Target::Absolute(um) => um,
            Target::Relative(delta) => {
                self.finish_pending(axis).await?;
                self.read_position(axis).await?.um + delta
            }
        };

        let (counts, legal_um) = settings.legalize(axis, target_um)?;
        debug!(
            axis = axis.number(),
            requested_um = target_um,
            legal_um,
            counts,
            "Moving"
        );

        self.finish_pending(axis).await?;
        self.conn
            .send(&Command::MoveAbsolute {
                channel: axis.channel(),
                counts,
            })
            .await?;

        if let Some(state) = self.axes.lock().get_mut(&axis) {
            state.pending_target = Some(counts);
        }
        Ok(legal_um)
    }

    async fn finish_pending(&self, axis: Axis) -> McmResult<()> {
        let pending = self
            .axes
            .lock()
            .get(&axis)
            .and_then(|state| state.pending_target.map(|t| (t, state.settings.tolerance_counts)));

        let Some((target, tolerance)) = pending else {
            return Ok(());
        };

        let deadline = Instant::now() + self.move_timeout;
        let result = self
            .poll_until(axis, target, tolerance, deadline, self.move_timeout, "move")
            .await;

        if let Some(state) = self.axes.lock().get_mut(&axis) {
            state.pending_target = None;
        }

        match &result {
            Ok(_) => debug!(axis = axis.number(), "Finished move"),
            Err(e) => debug!(axis = axis.number(), error = %e, "Move did not finish"),
        }
        result.map(|_| ())
    }

    /// Poll the encoder until it is within `tolerance` of `target`.
    ///
    /// Every read is bounded by `deadline`, so a silent device fails at the
    /// deadline rather than one read timeout after it. A read timeout that
    /// fires before `deadline` is returned as is.
    async fn poll_until(
        &self,
        axis: Axis,
        target: i32,
        tolerance: u32,
        deadline: Instant,
        bound: Duration,
        what: &str,
    ) -> McmResult<i32> {
        let timed_out = || {
            McmError::timeout(
                format!("axis {} {} to reach encoder count {}", axis, what, target),
                bound,
            )
        };

        loop {
            let reply = match self
                .conn
                .query_encoder_count_until(axis.channel(), deadline)
                .await
            {
                Ok(reply) => reply,
                Err(e) if e.is_timeout() && Instant::now() >= deadline => {
                    return Err(timed_out())
                }
                Err(e) => return Err(e),
            };
            let counts = self.record(axis, reply.counts).counts;

            let remaining = (i64::from(target) - i64::from(counts)).unsigned_abs();
            if remaining <= u64::from(tolerance) {
                return Ok(counts);
            }
            trace!(axis = axis.number(), remaining, tolerance, "counts from target");

            let now = Instant::now();
            if now >= deadline {
                return Err(timed_out());
            }
            tokio::time::sleep_until((now + self.poll_interval).min(deadline)).await;
        }
    }
}

/// One MCM3000 axis exposed as an independent stage.
///
/// Positions are in micrometres. Obtained from
/// [`Mcm3000Driver::axis_handle`].
#[derive(Clone)]
pub struct Mcm3000Axis {
    driver: Arc<Mcm3000Driver>,
    axis: Axis,
}

impl Mcm3000Axis {
    /// Axis this handle drives.
    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// Controller the axis belongs to.
    pub fn driver(&self) -> &Arc<Mcm3000Driver> {
        &self.driver
    }
}

impl std::fmt::Debug for Mcm3000Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mcm3000Axis")
            .field("port", &self.driver.port_name())
            .field("axis", &self.axis)
            .finish()
    }
}

#[async_trait]
impl Movable for Mcm3000Axis {
    #[instrument(skip(self), fields(axis = self.axis.number()), err)]
    async fn move_abs(&self, position: f64) -> Result<()> {
        self.driver
            .start_move(self.axis.number(), position)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(axis = self.axis.number()), err)]
    async fn move_rel(&self, distance: f64) -> Result<()> {
        self.driver
            .start_move_by(self.axis.number(), distance)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(axis = self.axis.number()), err)]
    async fn position(&self) -> Result<f64> {
        Ok(self.driver.position(self.axis.number()).await?.um)
    }

    #[instrument(skip(self), fields(axis = self.axis.number()), err)]
    async fn wait_settled(&self) -> Result<()> {
        self.driver.wait_settled(self.axis.number()).await?;
        Ok(())
    }
}

#[async_trait]
impl Homeable for Mcm3000Axis {
    #[instrument(skip(self), fields(axis = self.axis.number()), err)]
    async fn home(&self) -> Result<()> {
        self.driver.home(self.axis.number()).await?;
        Ok(())
    }
}
