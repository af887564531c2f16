//! Half-bit classification
//!
//! A DCC bit is two half periods between three consecutive edges. Each
//! half is compared against the profile thresholds, widened by one sample
//! period of measurement accuracy.

use serde::Serialize;

use super::profile::{TimingProfile, STRETCHED_TOTAL_MAX_US};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SymbolicBit {
    Zero,
    One,
    StretchedZero,
    Invalid,
}

impl SymbolicBit {
    /// Plain or stretched zero
    pub fn is_zero(self) -> bool {
        matches!(self, SymbolicBit::Zero | SymbolicBit::StretchedZero)
    }

    pub fn value(self) -> Option<u8> {
        match self {
            SymbolicBit::One => Some(1),
            SymbolicBit::Zero | SymbolicBit::StretchedZero => Some(0),
            SymbolicBit::Invalid => None,
        }
    }
}

/// Classify a single half-bit interval against `profile` with no slack.
pub fn classify_interval(interval_us: f64, profile: &TimingProfile) -> SymbolicBit {
    if interval_us >= profile.one_min && interval_us <= profile.one_max {
        SymbolicBit::One
    } else if interval_us >= profile.zero_min && interval_us <= profile.zero_max {
        SymbolicBit::Zero
    } else if profile.allow_stretched_zero
        && interval_us > profile.zero_max
        && interval_us <= profile.zero_max_stretched
    {
        SymbolicBit::StretchedZero
    } else {
        SymbolicBit::Invalid
    }
}

/// A classified bit with its measurements
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Symbol {
    pub bit: SymbolicBit,
    pub part1_us: f64,
    pub part2_us: f64,
    /// Absolute difference between the halves
    pub asymmetry_us: f64,
    /// Bit period minus the nominal period, when comparing profiles
    pub delta_us: Option<f64>,
    /// Classification under the comparison profile
    pub comparison: Option<SymbolicBit>,
    /// Stretched zero seen while checking compliance
    pub violation: bool,
}

impl Symbol {
    pub fn total_us(&self) -> f64 {
        self.part1_us + self.part2_us
    }
}

/// Classifies half-bit pairs under a primary and optional comparison profile
#[derive(Debug, Clone)]
pub struct TimingClassifier {
    primary: TimingProfile,
    comparison: Option<TimingProfile>,
    accuracy_us: f64,
}

impl TimingClassifier {
    pub fn new(primary: TimingProfile, comparison: Option<TimingProfile>, accuracy_us: f64) -> Self {
        Self {
            primary,
            comparison,
            accuracy_us,
        }
    }

    pub fn profile(&self) -> &TimingProfile {
        &self.primary
    }

    pub fn accuracy_us(&self) -> f64 {
        self.accuracy_us
    }

    /// Could `half_us` be one half of a one bit?
    pub fn is_half_one(&self, half_us: f64) -> bool {
        let a = self.accuracy_us;
        half_us >= self.primary.one_min - a && half_us <= self.primary.one_max + a
    }

    pub fn classify_bit(&self, part1_us: f64, part2_us: f64) -> Symbol {
        let bit = classify_pair(part1_us, part2_us, &self.primary, self.accuracy_us);

        let (comparison, delta_us) = match &self.comparison {
            Some(profile) => {
                let cmp = classify_pair(part1_us, part2_us, profile, self.accuracy_us);
                // Nominal period of whatever the comparison profile saw
                let seen = if cmp == SymbolicBit::Invalid { bit } else { cmp };
                let nominal = match seen {
                    SymbolicBit::One => Some(2.0 * profile.one_nominal),
                    SymbolicBit::Zero | SymbolicBit::StretchedZero => Some(2.0 * profile.zero_nominal),
                    SymbolicBit::Invalid => None,
                };
                (Some(cmp), nominal.map(|n| part1_us + part2_us - n))
            }
            None => (None, None),
        };

        Symbol {
            bit,
            part1_us,
            part2_us,
            asymmetry_us: (part1_us - part2_us).abs(),
            delta_us,
            comparison,
            violation: self.primary.mode.is_compliance() && bit == SymbolicBit::StretchedZero,
        }
    }
}

fn classify_pair(p1: f64, p2: f64, profile: &TimingProfile, a: f64) -> SymbolicBit {
    let in_range = |v: f64, min: f64, max: f64| v >= min - a && v <= max + a;

    if in_range(p1, profile.one_min, profile.one_max)
        && in_range(p2, profile.one_min, profile.one_max)
        && (p1 - p2).abs() <= profile.one_tolerance.max(2.0 * a)
    {
        return SymbolicBit::One;
    }

    let within_ceiling = p1 + p2 <= STRETCHED_TOTAL_MAX_US + 2.0 * a;

    if in_range(p1, profile.zero_min, profile.zero_max)
        && in_range(p2, profile.zero_min, profile.zero_max)
        && (!profile.allow_stretched_zero || within_ceiling)
    {
        return SymbolicBit::Zero;
    }

    if profile.allow_stretched_zero
        && in_range(p1, profile.zero_min, profile.zero_max_stretched)
        && in_range(p2, profile.zero_min, profile.zero_max_stretched)
        && within_ceiling
    {
        return SymbolicBit::StretchedZero;
    }

    SymbolicBit::Invalid
}
