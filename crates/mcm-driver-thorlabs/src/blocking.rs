//! Blocking wrapper around [`Mcm3000Driver`].
//!
//! Each call runs to completion (or timeout) on the calling thread using a
//! private current-thread runtime. Do not call these methods from inside an
//! async runtime; use [`Mcm3000Driver`] there instead.

use crate::config::Mcm3000Config;
use crate::mcm3000::{Mcm3000Driver, Position};
use crate::mock::{MockHandle, MockMcm3000};
use mcm_core::{McmError, McmResult};
use tokio::runtime::{Builder, Runtime};

/// Synchronous MCM3000 controller.
#[derive(Debug)]
pub struct Mcm3000 {
    // Dropped before the runtime so the port deregisters cleanly.
    inner: Mcm3000Driver,
    runtime: Runtime,
}

fn build_runtime(port: &str) -> McmResult<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| McmError::connection(port, format!("failed to start I/O runtime: {}", e)))
}

impl Mcm3000 {
    /// Open and identify the controller described by `config`.
    pub fn connect(config: &Mcm3000Config) -> McmResult<Self> {
        let runtime = build_runtime(&config.port)?;
        let inner = runtime.block_on(Mcm3000Driver::connect(config))?;
        Ok(Self { inner, runtime })
    }

    /// Connect to a simulated controller.
    ///
    /// The simulated device only runs while a call on the returned
    /// controller is in progress.
    pub fn connect_mock(
        config: &Mcm3000Config,
        device: MockMcm3000,
    ) -> McmResult<(Self, MockHandle)> {
        let runtime = build_runtime(&config.port)?;
        let (stream, handle) = {
            let _guard = runtime.enter();
            device.spawn()
        };
        let inner = runtime.block_on(Mcm3000Driver::connect_with_stream(config, stream))?;
        Ok((Self { inner, runtime }, handle))
    }

    /// The async driver underneath.
    pub fn driver(&self) -> &Mcm3000Driver {
        &self.inner
    }

    /// Configured axis numbers.
    pub fn axes(&self) -> Vec<u8> {
        self.inner.axes().into_iter().map(u8::from).collect()
    }

    /// See [`Mcm3000Driver::move_to`].
    pub fn move_to(&self, axis: u8, target_um: f64) -> McmResult<f64> {
        self.runtime.block_on(self.inner.move_to(axis, target_um))
    }

    /// See [`Mcm3000Driver::move_by`].
    pub fn move_by(&self, axis: u8, delta_um: f64) -> McmResult<f64> {
        self.runtime.block_on(self.inner.move_by(axis, delta_um))
    }

    /// See [`Mcm3000Driver::start_move`].
    pub fn start_move(&self, axis: u8, target_um: f64) -> McmResult<f64> {
        self.runtime.block_on(self.inner.start_move(axis, target_um))
    }

    /// See [`Mcm3000Driver::wait_settled`].
    pub fn wait_settled(&self, axis: u8) -> McmResult<()> {
        self.runtime.block_on(self.inner.wait_settled(axis))
    }

    /// See [`Mcm3000Driver::home`].
    pub fn home(&self, axis: u8) -> McmResult<()> {
        self.runtime.block_on(self.inner.home(axis))
    }

    /// See [`Mcm3000Driver::zero`].
    pub fn zero(&self, axis: u8) -> McmResult<()> {
        self.runtime.block_on(self.inner.zero(axis))
    }

    /// See [`Mcm3000Driver::position`].
    pub fn position(&self, axis: u8) -> McmResult<Position> {
        self.runtime.block_on(self.inner.position(axis))
    }

    /// See [`Mcm3000Driver::position_limits_um`].
    pub fn position_limits_um(&self, axis: u8) -> McmResult<(f64, f64)> {
        self.inner.position_limits_um(axis)
    }

    /// Release the serial port. Safe to call more than once.
    pub fn close(&self) -> McmResult<()> {
        self.runtime.block_on(self.inner.close())
    }

    /// Whether the port has been released.
    pub fn is_closed(&self) -> bool {
        self.runtime.block_on(self.inner.is_closed())
    }
}
