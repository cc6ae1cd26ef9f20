//! Thorlabs MCM3000 3-axis motor controller driver.
//!
//! This crate talks to MCM3000-series controllers over USB-serial using the
//! APT binary protocol:
//! - [`Mcm3000Driver`]: async controller binding (move, home, position, close)
//! - [`blocking::Mcm3000`]: the same operations as blocking calls
//! - [`Mcm3000Axis`]: one axis as a `Movable + Homeable` stage
//! - [`mock::MockMcm3000`]: simulated controller for tests
//!
//! # Usage
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! mcm-driver-thorlabs = { path = "../mcm-driver-thorlabs" }
//! ```
//!
//! ```rust,ignore
//! use mcm_driver_thorlabs::{AxisConfig, Mcm3000Config, Mcm3000Driver, StageModel};
//!
//! let config = Mcm3000Config::load(Path::new("config/mcm3000.toml"))?;
//! let mcm = Mcm3000Driver::connect(&config).await?;
//! mcm.home(3).await?;
//! ```

pub mod axis;
pub mod blocking;
pub mod config;
pub mod connection;
pub mod discovery;
mod mcm3000;
pub mod mock;
pub mod protocol;
pub mod stages;

pub use axis::{Axis, AxisSettings};
pub use config::{AxisConfig, ConfigError, Mcm3000Config};
pub use discovery::{list_ports, resolve_port, PortListing, AUTO_PORT};
pub use mcm3000::{Mcm3000Axis, Mcm3000Driver, Position};
pub use mcm_core::{ErrorKind, McmError, McmResult};
pub use stages::{supported_stages, StageModel};
