//! Atomic Hardware Capabilities
//!
//! Fine-grained capability traits a motion device can implement. Host code
//! written against these traits works with any stage, not only the MCM3000.
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing
//!
//! # Example
//!
//! ```rust,ignore
//! async fn scan<T>(stage: &T, points: &[f64]) -> Result<()>
//! where
//!     T: Movable + Homeable,
//! {
//!     stage.home().await?;
//!     for &p in points {
//!         stage.move_abs(p).await?;
//!         stage.wait_settled().await?;
//!     }
//!     Ok(())
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;

/// Capability: Motion Control
///
/// Devices that can move to positions (stages, actuators, focus drives).
///
/// # Contract
/// - Positions are in device-native units (micrometres for MCM3000 stages)
/// - `move_abs` and `move_rel` initiate motion but may return before completion
/// - `wait_settled` blocks until motion completes
/// - `position` returns current position (may be approximate during motion)
///
/// # Thread Safety
/// - All methods are async and require `&self` (immutable reference)
/// - Interior mutability (Mutex/RwLock) should be used for state
#[async_trait]
pub trait Movable: Send + Sync {
    /// Move to absolute position
    ///
    /// # Returns
    /// - Ok(()) if motion initiated successfully
    /// - Err if position is out of range or hardware error
    async fn move_abs(&self, position: f64) -> Result<()>;

    /// Move relative to current position
    async fn move_rel(&self, distance: f64) -> Result<()>;

    /// Get current position
    async fn position(&self) -> Result<f64>;

    /// Wait for motion to settle
    ///
    /// Must be bounded by an internal timeout.
    async fn wait_settled(&self) -> Result<()>;

    /// Stop motion immediately
    ///
    /// # Default Implementation
    /// Returns an error indicating stop is not supported.
    async fn stop(&self) -> Result<()> {
        anyhow::bail!("Stop not supported by this device")
    }
}

/// Capability: Homing
///
/// Devices that can return to a reproducible reference position.
///
/// # Contract
/// - `home` blocks until the reference is reached or a timeout elapses
/// - Homing an already-homed device succeeds and leaves it at the reference
#[async_trait]
pub trait Homeable: Send + Sync {
    /// Drive to the reference position and wait for arrival.
    async fn home(&self) -> Result<()>;
}
