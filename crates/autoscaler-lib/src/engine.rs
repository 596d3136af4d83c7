//! Sizing decision engine
//!
//! Turns the primary's most recent read/write IOPS samples into a target
//! size. Scale up when either metric stayed above half of the tier's ceiling
//! for the whole up window; scale down when neither metric went above a
//! tenth of its ceiling anywhere in the down window. Scale up is checked
//! first.
//!
//! The function is pure: identical inputs always give identical output.

use crate::catalog::SizeCatalog;
use crate::models::{Process, DISK_PARTITION_IOPS_READ, DISK_PARTITION_IOPS_WRITE};
use serde::{Deserialize, Serialize};

/// Number of most recent samples that must all be hot to scale up
pub const SCALE_UP_WINDOW: usize = 2;
/// Number of most recent samples that must all be cold to scale down
pub const SCALE_DOWN_WINDOW: usize = 2;
/// Fraction of the ceiling a sample must exceed to count as hot
pub const SCALE_UP_RATIO: f64 = 0.5;
/// Fraction of the ceiling a sample must not exceed to count as cold
pub const SCALE_DOWN_RATIO: f64 = 0.1;

/// Metrics inspected on the primary
pub const INSPECTED_METRICS: [&str; 2] = [DISK_PARTITION_IOPS_READ, DISK_PARTITION_IOPS_WRITE];

/// Why the engine picked its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Load above the up threshold, moving to the next size
    ScaleUp,
    /// Load below the down threshold, moving to the previous size
    ScaleDown,
    /// Scale up was warranted but there is no larger size
    AtLargest,
    /// Scale down was warranted but there is no smaller size
    AtSmallest,
    /// Load between the thresholds
    Steady,
    /// No primary in the snapshot
    NoPrimary,
    /// The primary lacks one of the inspected metric series
    MissingMetrics,
    /// Current size is not in the catalog
    UnknownSize,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::ScaleUp => "scale_up",
            Outcome::ScaleDown => "scale_down",
            Outcome::AtLargest => "at_largest",
            Outcome::AtSmallest => "at_smallest",
            Outcome::Steady => "steady",
            Outcome::NoPrimary => "no_primary",
            Outcome::MissingMetrics => "missing_metrics",
            Outcome::UnknownSize => "unknown_size",
        }
    }
}

/// Result of one evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub current: String,
    pub target: String,
    pub outcome: Outcome,
}

impl Decision {
    fn stay(current: &str, outcome: Outcome) -> Self {
        Self {
            current: current.to_string(),
            target: current.to_string(),
            outcome,
        }
    }

    fn move_to(current: &str, target: &str, outcome: Outcome) -> Self {
        Self {
            current: current.to_string(),
            target: target.to_string(),
            outcome,
        }
    }

    /// True if acting on this decision means issuing a resize
    pub fn is_change(&self) -> bool {
        self.current != self.target
    }
}

/// Decide the target size for a cluster currently at `current_size`
pub fn decide(current_size: &str, primary: Option<&Process>, catalog: &SizeCatalog) -> Decision {
    let Some(primary) = primary else {
        return Decision::stay(current_size, Outcome::NoPrimary);
    };

    let Some(entry) = catalog.lookup(current_size) else {
        return Decision::stay(current_size, Outcome::UnknownSize);
    };

    let mut windows = Vec::with_capacity(INSPECTED_METRICS.len());
    for metric in INSPECTED_METRICS {
        // The catalog guarantees ceilings for the inspected metrics
        let (Some(series), Some(ceiling)) = (primary.metric(metric), entry.ceiling(metric)) else {
            return Decision::stay(current_size, Outcome::MissingMetrics);
        };
        windows.push((series, ceiling));
    }

    let scale_up = windows.iter().any(|(series, ceiling)| {
        let window = series.tail(SCALE_UP_WINDOW);
        window.len() == SCALE_UP_WINDOW
            && window.iter().all(|m| m.value > SCALE_UP_RATIO * ceiling)
    });

    if scale_up {
        return match entry.next() {
            Some(next) => Decision::move_to(current_size, next, Outcome::ScaleUp),
            None => Decision::stay(current_size, Outcome::AtLargest),
        };
    }

    let scale_down = !windows.iter().any(|(series, ceiling)| {
        series
            .tail(SCALE_DOWN_WINDOW)
            .iter()
            .any(|m| m.value > SCALE_DOWN_RATIO * ceiling)
    });

    if scale_down {
        return match entry.prev() {
            Some(prev) => Decision::move_to(current_size, prev, Outcome::ScaleDown),
            None => Decision::stay(current_size, Outcome::AtSmallest),
        };
    }

    Decision::stay(current_size, Outcome::Steady)
}
