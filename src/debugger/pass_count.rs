//! Pass count (hit condition) policy.
//!
//! The backend only understands an enabled flag and an "ignore next N hits" counter. Every pass
//! count style is expressed through these two knobs.

use serde::Deserialize;
use strum_macros::{Display, EnumString};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PassCountStyle {
    /// Break on every hit.
    #[default]
    None,
    /// Break once, when hit count reaches the target.
    Equal,
    /// Break on every hit starting from the target one.
    EqualOrGreater,
    /// Break on every `target`-th hit.
    Mod,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct PassCount {
    pub style: PassCountStyle,
    pub target: u32,
}

impl PassCount {
    pub const NONE: PassCount = PassCount {
        style: PassCountStyle::None,
        target: 0,
    };

    pub fn new(style: PassCountStyle, target: u32) -> Self {
        Self { style, target }
    }
}

/// Result of pass count evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decision {
    /// Whether the location may stop at all.
    pub enabled: bool,
    /// Ignore count to program into the backend, `None` to leave it untouched.
    pub ignore_count: Option<u32>,
}

impl Decision {
    fn enabled(ignore_count: u32) -> Self {
        Self {
            enabled: true,
            ignore_count: Some(ignore_count),
        }
    }
}

/// Compute location enablement and backend ignore count for a given hit count.
pub fn evaluate(pass_count: PassCount, hit_count: u32) -> Decision {
    let target = pass_count.target;
    match pass_count.style {
        PassCountStyle::None => Decision::enabled(0),
        PassCountStyle::Equal => {
            if hit_count < target {
                Decision::enabled(target - hit_count - 1)
            } else {
                // already beyond the target, location must never stop again
                Decision {
                    enabled: false,
                    ignore_count: None,
                }
            }
        }
        PassCountStyle::EqualOrGreater => {
            Decision::enabled(target.saturating_sub(hit_count).saturating_sub(1))
        }
        PassCountStyle::Mod if target == 0 => Decision::enabled(0),
        PassCountStyle::Mod => Decision::enabled(target - hit_count % target - 1),
    }
}
