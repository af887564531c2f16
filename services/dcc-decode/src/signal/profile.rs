//! Timing profiles
//!
//! Threshold sets for the NMRA S-9.1 and RCN-210 bit timing, in decoder
//! and compliance flavours, plus a user-tunable experimental set.
//! All values are microseconds per half-bit.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::{DecodeError, Result};

/// Preamble length a decoder must accept
pub const DECODER_MIN_PREAMBLE_BITS: u32 = 10;

/// Default preamble minimum for compliance checks (command station side)
pub const COMPLIANCE_MIN_PREAMBLE_BITS: u32 = 17;

/// Absolute ceiling for a stretched zero bit (both halves)
pub const STRETCHED_TOTAL_MAX_US: f64 = 12000.0;

pub const ONE_NOMINAL_US: f64 = 58.0;
pub const ZERO_NOMINAL_US: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimingMode {
    NmraDecoder,
    RcnDecoder,
    NmraCompliance,
    RcnComplianceTrack,
    RcnComplianceStation,
    Experimental,
}

impl TimingMode {
    pub fn is_compliance(self) -> bool {
        matches!(
            self,
            TimingMode::NmraCompliance
                | TimingMode::RcnComplianceTrack
                | TimingMode::RcnComplianceStation
        )
    }

    /// NMRA modes accept stretched zeros unconditionally
    fn stretched_always(self) -> bool {
        matches!(self, TimingMode::NmraDecoder | TimingMode::NmraCompliance)
    }
}

impl fmt::Display for TimingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimingMode::NmraDecoder => "NMRA decoding",
            TimingMode::RcnDecoder => "RCN decoding",
            TimingMode::NmraCompliance => "NMRA compliance",
            TimingMode::RcnComplianceTrack => "RCN compliance (track)",
            TimingMode::RcnComplianceStation => "RCN compliance (command station)",
            TimingMode::Experimental => "Experimental",
        };
        f.write_str(name)
    }
}

impl FromStr for TimingMode {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nmra" | "nmra-decoder" => Ok(TimingMode::NmraDecoder),
            "rcn" | "rcn-decoder" => Ok(TimingMode::RcnDecoder),
            "nmra-compliance" => Ok(TimingMode::NmraCompliance),
            "rcn-track" | "rcn-compliance-track" => Ok(TimingMode::RcnComplianceTrack),
            "rcn-station" | "rcn-compliance-station" => Ok(TimingMode::RcnComplianceStation),
            "experimental" => Ok(TimingMode::Experimental),
            other => Err(DecodeError::InvalidProfile(format!(
                "unknown timing mode {:?}",
                other
            ))),
        }
    }
}

/// User-editable thresholds for [`TimingMode::Experimental`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExperimentalTiming {
    pub one_min: f64,
    pub one_max: f64,
    pub one_tolerance: f64,
    pub zero_min: f64,
    pub zero_max: f64,
    pub zero_max_stretched: f64,
}

impl Default for ExperimentalTiming {
    fn default() -> Self {
        Self {
            one_min: 52.0,
            one_max: 64.0,
            one_tolerance: 6.0,
            zero_min: 90.0,
            zero_max: 119.0,
            zero_max_stretched: 10000.0,
        }
    }
}

impl ExperimentalTiming {
    pub fn validate(&self) -> Result<()> {
        let ordered = self.one_min > 0.0
            && self.one_min <= self.one_max
            && self.one_max < self.zero_min
            && self.zero_min <= self.zero_max
            && self.zero_max <= self.zero_max_stretched
            && self.zero_max_stretched <= STRETCHED_TOTAL_MAX_US
            && self.one_tolerance >= 0.0;
        if ordered {
            Ok(())
        } else {
            Err(DecodeError::InvalidProfile(format!(
                "experimental thresholds out of order: {:?}",
                self
            )))
        }
    }
}

/// Thresholds for one decoding pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimingProfile {
    pub mode: TimingMode,
    pub one_min: f64,
    pub one_max: f64,
    /// Maximum difference between the two halves of a one bit
    pub one_tolerance: f64,
    pub one_nominal: f64,
    pub zero_min: f64,
    pub zero_max: f64,
    pub zero_max_stretched: f64,
    pub zero_nominal: f64,
    pub allow_stretched_zero: bool,
    pub min_preamble_bits: u32,
    /// Pulses at or below this width are elided before measurement
    pub ignore_pulse_leq: Option<f64>,
}

/// Holds the selected mode and options, hands out immutable profiles
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    mode: TimingMode,
    allow_stretched_zero: bool,
    min_preamble_bits: u32,
    ignore_pulse_leq: Option<f64>,
    compare: bool,
    experimental: ExperimentalTiming,
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::new(TimingMode::NmraDecoder)
    }
}

impl ProfileRegistry {
    pub fn new(mode: TimingMode) -> Self {
        Self {
            mode,
            allow_stretched_zero: false,
            min_preamble_bits: COMPLIANCE_MIN_PREAMBLE_BITS,
            ignore_pulse_leq: None,
            compare: false,
            experimental: ExperimentalTiming::default(),
        }
    }

    pub fn mode(&self) -> TimingMode {
        self.mode
    }

    /// Opt into stretched zeros for RCN and experimental modes
    pub fn with_stretched_zero(mut self, allow: bool) -> Self {
        self.allow_stretched_zero = allow;
        self
    }

    /// Preamble minimum, only honoured in compliance modes
    pub fn with_min_preamble_bits(mut self, bits: u32) -> Self {
        self.min_preamble_bits = bits;
        self
    }

    pub fn with_ignore_pulse(mut self, width_us: Option<f64>) -> Self {
        self.ignore_pulse_leq = width_us;
        self
    }

    /// Cross-evaluate every bit against the experimental profile
    pub fn with_comparison(mut self, compare: bool) -> Self {
        self.compare = compare;
        self
    }

    pub fn experimental(&self) -> &ExperimentalTiming {
        &self.experimental
    }

    pub fn set_experimental(&mut self, timing: ExperimentalTiming) -> Result<()> {
        timing.validate()?;
        self.experimental = timing;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.mode.is_compliance() && self.min_preamble_bits < DECODER_MIN_PREAMBLE_BITS {
            return Err(DecodeError::InvalidProfile(format!(
                "minimum preamble of {} bits is below {}",
                self.min_preamble_bits, DECODER_MIN_PREAMBLE_BITS
            )));
        }
        if let Some(width) = self.ignore_pulse_leq {
            if !(width >= 0.0) {
                return Err(DecodeError::InvalidProfile(format!(
                    "short pulse width {} must be non-negative",
                    width
                )));
            }
        }
        self.experimental.validate()
    }

    pub fn active(&self) -> TimingProfile {
        self.profile(self.mode)
    }

    pub fn comparison(&self) -> Option<TimingProfile> {
        self.compare.then(|| self.profile(TimingMode::Experimental))
    }

    /// Build the profile for `mode` with the registry's options applied
    pub fn profile(&self, mode: TimingMode) -> TimingProfile {
        let (one_min, one_max, one_tolerance, zero_min, zero_max, zero_max_stretched) = match mode
        {
            TimingMode::NmraDecoder => (52.0, 64.0, 6.0, 90.0, 10000.0, 10000.0),
            TimingMode::RcnDecoder => (52.0, 64.0, 6.0, 90.0, 119.0, 10000.0),
            TimingMode::NmraCompliance => (55.0, 61.0, 3.0, 95.0, 9900.0, 9900.0),
            TimingMode::RcnComplianceTrack => (55.0, 61.0, 3.0, 95.0, 116.0, 9900.0),
            TimingMode::RcnComplianceStation => (56.0, 60.0, 3.0, 97.0, 114.0, 9898.0),
            TimingMode::Experimental => {
                let e = &self.experimental;
                (
                    e.one_min,
                    e.one_max,
                    e.one_tolerance,
                    e.zero_min,
                    e.zero_max,
                    e.zero_max_stretched,
                )
            }
        };

        // Decoders must accept exactly the standard minimum
        let min_preamble_bits = if mode.is_compliance() {
            self.min_preamble_bits
        } else {
            DECODER_MIN_PREAMBLE_BITS
        };

        TimingProfile {
            mode,
            one_min,
            one_max,
            one_tolerance,
            one_nominal: ONE_NOMINAL_US,
            zero_min,
            zero_max,
            zero_max_stretched,
            zero_nominal: ZERO_NOMINAL_US,
            allow_stretched_zero: mode.stretched_always() || self.allow_stretched_zero,
            min_preamble_bits,
            ignore_pulse_leq: self.ignore_pulse_leq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_mode_clamps_preamble() {
        let registry = ProfileRegistry::new(TimingMode::RcnDecoder).with_min_preamble_bits(22);
        assert_eq!(registry.active().min_preamble_bits, 10);

        let registry = ProfileRegistry::new(TimingMode::NmraCompliance).with_min_preamble_bits(22);
        assert_eq!(registry.active().min_preamble_bits, 22);
    }

    #[test]
    fn test_compliance_preamble_lower_bound() {
        let registry = ProfileRegistry::new(TimingMode::RcnComplianceTrack).with_min_preamble_bits(8);
        assert!(matches!(
            registry.validate(),
            Err(DecodeError::InvalidProfile(_))
        ));
    }

    #[test]
    fn test_stretched_zero_policy() {
        assert!(ProfileRegistry::new(TimingMode::NmraDecoder).active().allow_stretched_zero);
        assert!(!ProfileRegistry::new(TimingMode::RcnDecoder).active().allow_stretched_zero);
        assert!(ProfileRegistry::new(TimingMode::RcnDecoder)
            .with_stretched_zero(true)
            .active()
            .allow_stretched_zero);
    }

    #[test]
    fn test_comparison_profile() {
        let mut registry = ProfileRegistry::new(TimingMode::RcnComplianceStation).with_comparison(true);
        registry
            .set_experimental(ExperimentalTiming {
                one_min: 50.0,
                ..ExperimentalTiming::default()
            })
            .unwrap();
        let comparison = registry.comparison().unwrap();
        assert_eq!(comparison.mode, TimingMode::Experimental);
        assert_eq!(comparison.one_min, 50.0);
        assert_eq!(registry.active().one_min, 56.0);
        assert!(ProfileRegistry::default().comparison().is_none());
    }

    #[test]
    fn test_experimental_must_be_ordered() {
        let mut registry = ProfileRegistry::default();
        let bad = ExperimentalTiming {
            one_max: 95.0,
            ..ExperimentalTiming::default()
        };
        assert!(registry.set_experimental(bad).is_err());
        assert_eq!(registry.experimental(), &ExperimentalTiming::default());
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("RCN-Track".parse::<TimingMode>().unwrap(), TimingMode::RcnComplianceTrack);
        assert!("dcc".parse::<TimingMode>().is_err());
        assert_eq!(TimingMode::NmraCompliance.to_string(), "NMRA compliance");
    }
}
