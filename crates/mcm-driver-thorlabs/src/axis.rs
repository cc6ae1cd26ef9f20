//! Axis numbering and micrometre/encoder-count conversion.

use crate::stages::StageModel;
use mcm_core::{McmError, McmResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest axis number on the controller.
pub const AXIS_COUNT: u8 = 3;

/// A controller axis, numbered 1..=3.
///
/// The wire protocol addresses axes by zero-based channel; use
/// [`Axis::channel`] when building frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Axis(u8);

impl Axis {
    /// All three axes.
    pub const ALL: [Axis; 3] = [Axis(1), Axis(2), Axis(3)];

    /// Validate an axis number.
    pub fn new(number: u8) -> McmResult<Self> {
        if (1..=AXIS_COUNT).contains(&number) {
            Ok(Self(number))
        } else {
            Err(McmError::InvalidAxis(number))
        }
    }

    /// Axis for a zero-based wire channel.
    pub fn from_channel(channel: u8) -> McmResult<Self> {
        Self::new(channel.saturating_add(1))
    }

    /// One-based axis number.
    #[must_use]
    pub fn number(self) -> u8 {
        self.0
    }

    /// Zero-based wire channel.
    #[must_use]
    pub fn channel(self) -> u8 {
        self.0 - 1
    }
}

impl TryFrom<u8> for Axis {
    type Error = McmError;

    fn try_from(number: u8) -> Result<Self, Self::Error> {
        Self::new(number)
    }
}

impl From<Axis> for u8 {
    fn from(axis: Axis) -> Self {
        axis.0
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-axis conversion, limits and settle tolerance.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisSettings {
    /// Stage this axis drives, if one of the catalogue models.
    pub stage: Option<StageModel>,
    /// Micrometres per encoder count.
    pub um_per_count: f64,
    /// Lower travel limit (um).
    pub min_um: f64,
    /// Upper travel limit (um).
    pub max_um: f64,
    /// Physical direction is inverted relative to encoder counts.
    pub reverse: bool,
    /// A move is complete when within this many counts of the target.
    /// Values below 1 can make moves never settle.
    pub tolerance_counts: u32,
}

impl AxisSettings {
    /// Settings taken from the stage catalogue.
    #[must_use]
    pub fn for_stage(stage: StageModel) -> Self {
        let (min_um, max_um) = stage.position_limits_um();
        Self {
            stage: Some(stage),
            um_per_count: stage.um_per_count(),
            min_um,
            max_um,
            reverse: false,
            tolerance_counts: 1,
        }
    }

    /// Set the reverse flag.
    #[must_use]
    pub fn reversed(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    /// Convert an encoder count to micrometres.
    #[must_use]
    pub fn counts_to_um(&self, counts: i32) -> f64 {
        let um = f64::from(counts) * self.um_per_count;
        if self.reverse {
            // adding 0.0 turns -0.0 into 0.0
            -um + 0.0
        } else {
            um
        }
    }

    /// Convert micrometres to the nearest encoder count.
    pub fn um_to_counts(&self, axis: Axis, um: f64) -> McmResult<i32> {
        let counts = (um / self.um_per_count).round();
        if !counts.is_finite() || counts < f64::from(i32::MIN) || counts > f64::from(i32::MAX) {
            return Err(self.range_error(axis, um));
        }
        let counts = counts as i32;
        if self.reverse {
            counts.checked_neg().ok_or_else(|| self.range_error(axis, um))
        } else {
            Ok(counts)
        }
    }

    /// Fail with `Range` unless `um` lies within the travel limits.
    pub fn check_range(&self, axis: Axis, um: f64) -> McmResult<()> {
        if um >= self.min_um && um <= self.max_um {
            Ok(())
        } else {
            Err(self.range_error(axis, um))
        }
    }

    /// Range-check a target and quantize it to encoder counts.
    ///
    /// Returns the target count and the position it corresponds to.
    pub fn legalize(&self, axis: Axis, um: f64) -> McmResult<(i32, f64)> {
        self.check_range(axis, um)?;
        let counts = self.um_to_counts(axis, um)?;
        Ok((counts, self.counts_to_um(counts)))
    }

    /// Whether `counts` is close enough to `target` to call the move finished.
    #[must_use]
    pub fn within_tolerance(&self, target: i32, counts: i32) -> bool {
        (i64::from(target) - i64::from(counts)).unsigned_abs() <= u64::from(self.tolerance_counts)
    }

    fn range_error(&self, axis: Axis, um: f64) -> McmError {
        McmError::Range {
            axis: axis.number(),
            requested_um: um,
            min_um: self.min_um,
            max_um: self.max_um,
        }
    }
}
