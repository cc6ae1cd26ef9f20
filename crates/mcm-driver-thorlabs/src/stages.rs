//! Stages the MCM3000 can drive, with their encoder scale and travel.

use mcm_core::McmError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Encoder resolution of the ZFM and PLS stage families.
const FINE_UM_PER_COUNT: f64 = 0.2116667;

/// A supported stage model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageModel {
    /// ZFM2020 focus module.
    #[serde(rename = "ZFM2020")]
    Zfm2020,
    /// ZFM2030 focus module.
    #[serde(rename = "ZFM2030")]
    Zfm2030,
    /// MMP-2XY motorized XY platform.
    #[serde(rename = "MMP-2XY")]
    Mmp2Xy,
    /// PLS-X single-axis platform.
    #[serde(rename = "PLS-X")]
    PlsX,
    /// PLS-XY two-axis platform.
    #[serde(rename = "PLS-XY")]
    PlsXy,
}

impl StageModel {
    /// Every supported model, in catalogue order.
    pub const ALL: [StageModel; 5] = [
        StageModel::Zfm2020,
        StageModel::Zfm2030,
        StageModel::Mmp2Xy,
        StageModel::PlsX,
        StageModel::PlsXy,
    ];

    /// Catalogue name, as used in configuration files.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            StageModel::Zfm2020 => "ZFM2020",
            StageModel::Zfm2030 => "ZFM2030",
            StageModel::Mmp2Xy => "MMP-2XY",
            StageModel::PlsX => "PLS-X",
            StageModel::PlsXy => "PLS-XY",
        }
    }

    /// Micrometres travelled per encoder count.
    #[must_use]
    pub fn um_per_count(self) -> f64 {
        match self {
            StageModel::Mmp2Xy => 0.5,
            StageModel::Zfm2020 | StageModel::Zfm2030 | StageModel::PlsX | StageModel::PlsXy => {
                FINE_UM_PER_COUNT
            }
        }
    }

    /// Travel limit either side of encoder zero, in micrometres.
    #[must_use]
    pub fn travel_limit_um(self) -> f64 {
        match self {
            StageModel::Mmp2Xy => 25_400.0,
            StageModel::Zfm2020 | StageModel::Zfm2030 | StageModel::PlsX | StageModel::PlsXy => {
                12_700.0
            }
        }
    }

    /// `(min, max)` position limits in micrometres.
    #[must_use]
    pub fn position_limits_um(self) -> (f64, f64) {
        let limit = self.travel_limit_um();
        (-limit, limit)
    }
}

impl fmt::Display for StageModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StageModel {
    type Err = McmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        StageModel::ALL
            .into_iter()
            .find(|model| model.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                let names: Vec<&str> = StageModel::ALL.iter().map(|m| m.name()).collect();
                McmError::Configuration(format!(
                    "stage '{}' not supported (supported: {})",
                    wanted,
                    names.join(", ")
                ))
            })
    }
}

/// All supported stages with `(um_per_count, travel_limit_um)`.
#[must_use]
pub fn supported_stages() -> Vec<(StageModel, f64, f64)> {
    StageModel::ALL
        .into_iter()
        .map(|m| (m, m.um_per_count(), m.travel_limit_um()))
        .collect()
}
