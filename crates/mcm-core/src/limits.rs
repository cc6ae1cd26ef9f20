//! Default timing bounds for controller communication.
//!
//! Centralized here so drivers, configuration defaults and tests agree.

use std::time::Duration;

/// Default bound on waiting for a single reply frame (5 seconds).
///
/// Matches the serial read timeout the MCM3000 is normally operated with.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on waiting for a move to reach its target (5 seconds).
pub const DEFAULT_MOVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on homing an axis (30 seconds).
///
/// Homing can traverse the full travel range, so it gets a longer bound
/// than an ordinary move.
pub const DEFAULT_HOME_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between encoder polls while waiting for motion to finish.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Bound on writing a single command frame.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(1);
