//! Core types shared by the MCM3000 driver crates.
//!
//! - [`error`]: the `McmError` type and its categories
//! - [`serial`]: async serial port abstractions and deadline-bounded reads
//! - [`capabilities`]: `Movable` / `Homeable` capability traits
//! - [`limits`]: default timing bounds

pub mod capabilities;
pub mod error;
pub mod limits;
pub mod serial;

pub use error::{ErrorKind, McmError, McmResult};
