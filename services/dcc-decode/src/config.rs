//! Configuration loaded from environment variables

use std::path::PathBuf;
use std::str::FromStr;

use crate::dcc::{parse_number, EvaluationMode, InterpretContext, Query};
use crate::signal::{ExperimentalTiming, ProfileRegistry, TimingMode};
use crate::Result;

/// Packet output format of the binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Edge capture file
    pub capture_path: Option<PathBuf>,

    /// Samples per second of the capture
    pub sample_rate: u64,

    pub timing_mode: TimingMode,

    /// Accept stretched zeros in RCN and experimental modes
    pub allow_stretched_zero: bool,

    /// Preamble minimum for compliance modes
    pub min_preamble_bits: u32,

    /// Elide pulses at or below `short_pulse_us`
    pub ignore_short_pulse: bool,
    pub short_pulse_us: f64,

    /// Also classify every bit under the experimental profile
    pub timing_compare: bool,
    pub experimental: ExperimentalTiming,

    pub accessory_offset: i32,
    pub service_mode: bool,

    /// CV29 bit 1 clear on the decoders being observed
    pub speed_steps_14: bool,

    /// Search predicates as written, parsed and range-checked by `query`
    pub search_accessory: Option<String>,
    pub search_decoder: Option<String>,
    pub search_cv: Option<String>,
    pub search_byte: Option<String>,
    pub search_mask: Option<String>,
    pub search_command: Option<String>,

    pub output: OutputFormat,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, falling back to defaults for
    /// anything unset or unparseable
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| {
            lookup(key)
                .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(false)
        };

        let defaults = ExperimentalTiming::default();
        let experimental = ExperimentalTiming {
            one_min: parsed(lookup("DCC_EXP_B1MIN")).unwrap_or(defaults.one_min),
            one_max: parsed(lookup("DCC_EXP_B1MAX")).unwrap_or(defaults.one_max),
            one_tolerance: parsed(lookup("DCC_EXP_B1TOL")).unwrap_or(defaults.one_tolerance),
            zero_min: parsed(lookup("DCC_EXP_B0MIN")).unwrap_or(defaults.zero_min),
            zero_max: parsed(lookup("DCC_EXP_B0MAX")).unwrap_or(defaults.zero_max),
            zero_max_stretched: parsed(lookup("DCC_EXP_B0STRETCHED"))
                .unwrap_or(defaults.zero_max_stretched),
        };

        Self {
            capture_path: lookup("DCC_CAPTURE").map(PathBuf::from),

            sample_rate: parsed(lookup("DCC_SAMPLE_RATE")).unwrap_or(2_000_000),

            timing_mode: lookup("DCC_TIMING_MODE")
                .and_then(|s| TimingMode::from_str(&s).ok())
                .unwrap_or(TimingMode::NmraDecoder),

            allow_stretched_zero: flag("DCC_ALLOW_STRETCHED_ZERO"),

            min_preamble_bits: parsed(lookup("DCC_MIN_PREAMBLE_BITS")).unwrap_or(17),

            ignore_short_pulse: flag("DCC_IGNORE_SHORT_PULSE"),
            short_pulse_us: parsed(lookup("DCC_SHORT_PULSE_US")).unwrap_or(4.0),

            timing_compare: flag("DCC_TIMING_COMPARE"),
            experimental,

            accessory_offset: lookup("DCC_ACCESSORY_OFFSET")
                .and_then(|s| parse_number(&s).ok())
                .and_then(|v| i32::try_from(v).ok())
                .unwrap_or(0),
            service_mode: flag("DCC_SERVICE_MODE"),
            speed_steps_14: flag("DCC_SPEED_STEPS_14"),

            search_accessory: lookup("DCC_SEARCH_ACCESSORY"),
            search_decoder: lookup("DCC_SEARCH_DECODER"),
            search_cv: lookup("DCC_SEARCH_CV"),
            search_byte: lookup("DCC_SEARCH_BYTE"),
            search_mask: lookup("DCC_SEARCH_MASK"),
            search_command: lookup("DCC_SEARCH_COMMAND"),

            output: match lookup("DCC_OUTPUT").as_deref().map(str::trim) {
                Some("json") => OutputFormat::Json,
                _ => OutputFormat::Text,
            },
        }
    }

    pub fn profile_registry(&self) -> Result<ProfileRegistry> {
        let mut registry = ProfileRegistry::new(self.timing_mode)
            .with_stretched_zero(self.allow_stretched_zero)
            .with_min_preamble_bits(self.min_preamble_bits)
            .with_ignore_pulse(self.ignore_short_pulse.then_some(self.short_pulse_us))
            .with_comparison(self.timing_compare);
        registry.set_experimental(self.experimental)?;
        registry.validate()?;
        Ok(registry)
    }

    pub fn interpret_context(&self) -> InterpretContext {
        InterpretContext {
            accessory_offset: self.accessory_offset,
            mode: if self.service_mode {
                EvaluationMode::Service
            } else {
                EvaluationMode::Operations
            },
            speed_steps_14: self.speed_steps_14,
        }
    }

    /// The configured search, `None` when no predicate is set. Search
    /// values that are not numbers are errors, not ignored.
    pub fn query(&self) -> Result<Option<Query>> {
        let number = |value: &Option<String>| value.as_deref().map(parse_number).transpose();

        let mut query = Query::new();
        if let Some(address) = number(&self.search_accessory)? {
            query = query.accessory(address)?;
        }
        if let Some(address) = number(&self.search_decoder)? {
            query = query.decoder(address)?;
        }
        if let Some(cv) = number(&self.search_cv)? {
            query = query.cv(cv)?;
        }
        if let Some(value) = number(&self.search_byte)? {
            let mask = number(&self.search_mask)?.unwrap_or(0xff);
            query = query.byte(value, mask)?;
        }
        if let Some(text) = &self.search_command {
            query = query.command(text);
        }
        Ok((!query.is_empty()).then_some(query))
    }
}

fn parsed<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DecodeError;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]);
        assert_eq!(c.sample_rate, 2_000_000);
        assert_eq!(c.timing_mode, TimingMode::NmraDecoder);
        assert_eq!(c.min_preamble_bits, 17);
        assert_eq!(c.output, OutputFormat::Text);
        assert!(c.capture_path.is_none());
        assert!(c.query().unwrap().is_none());
        assert_eq!(c.interpret_context(), InterpretContext::default());

        let registry = c.profile_registry().unwrap();
        assert_eq!(registry.active().ignore_pulse_leq, None);
        assert!(registry.comparison().is_none());
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let c = config(&[
            ("DCC_SAMPLE_RATE", "fast"),
            ("DCC_TIMING_MODE", "bogus"),
            ("DCC_ACCESSORY_OFFSET", "x"),
        ]);
        assert_eq!(c.sample_rate, 2_000_000);
        assert_eq!(c.timing_mode, TimingMode::NmraDecoder);
        assert_eq!(c.accessory_offset, 0);
    }

    #[test]
    fn test_profile_options() {
        let c = config(&[
            ("DCC_TIMING_MODE", "rcn-track"),
            ("DCC_ALLOW_STRETCHED_ZERO", "true"),
            ("DCC_MIN_PREAMBLE_BITS", "12"),
            ("DCC_IGNORE_SHORT_PULSE", "1"),
            ("DCC_SHORT_PULSE_US", "2.5"),
            ("DCC_TIMING_COMPARE", "yes"),
        ]);
        let registry = c.profile_registry().unwrap();
        assert_eq!(registry.mode(), TimingMode::RcnComplianceTrack);
        let profile = registry.active();
        assert_eq!(profile.mode, TimingMode::RcnComplianceTrack);
        assert!(profile.allow_stretched_zero);
        assert_eq!(profile.min_preamble_bits, 12);
        assert_eq!(profile.ignore_pulse_leq, Some(2.5));
        assert!(c.profile_registry().unwrap().comparison().is_some());
    }

    #[test]
    fn test_invalid_profiles_rejected() {
        let c = config(&[
            ("DCC_TIMING_MODE", "nmra-compliance"),
            ("DCC_MIN_PREAMBLE_BITS", "9"),
        ]);
        assert!(matches!(c.profile_registry(), Err(DecodeError::InvalidProfile(_))));

        let c = config(&[("DCC_EXP_B1MAX", "95")]);
        assert!(matches!(c.profile_registry(), Err(DecodeError::InvalidProfile(_))));
    }

    #[test]
    fn test_interpret_context() {
        let c = config(&[
            ("DCC_ACCESSORY_OFFSET", "-4"),
            ("DCC_SERVICE_MODE", "on"),
            ("DCC_SPEED_STEPS_14", "1"),
        ]);
        let ctx = c.interpret_context();
        assert_eq!(ctx.accessory_offset, -4);
        assert_eq!(ctx.mode, EvaluationMode::Service);
        assert!(ctx.speed_steps_14);
    }

    #[test]
    fn test_query_from_env() {
        let c = config(&[
            ("DCC_SEARCH_DECODER", "0x03"),
            ("DCC_SEARCH_BYTE", "0b0110"),
            ("DCC_SEARCH_MASK", "0x0f"),
            ("DCC_SEARCH_COMMAND", "POM"),
        ]);
        let q = c.query().unwrap().unwrap();
        assert_eq!(q.decoder, Some(3));
        assert_eq!(q.byte, Some((0x06, 0x0f)));
        assert_eq!(q.command.as_deref(), Some("pom"));

        let c = config(&[("DCC_SEARCH_ACCESSORY", "4096")]);
        assert!(matches!(c.query(), Err(DecodeError::InvalidSearch(_))));
    }

    #[test]
    fn test_unparseable_search_rejected() {
        for key in ["DCC_SEARCH_ACCESSORY", "DCC_SEARCH_DECODER", "DCC_SEARCH_CV", "DCC_SEARCH_BYTE"] {
            let c = config(&[(key, "abc")]);
            assert!(matches!(c.query(), Err(DecodeError::InvalidSearch(_))), "{}", key);
        }
        let c = config(&[("DCC_SEARCH_BYTE", "0x06"), ("DCC_SEARCH_MASK", "0xzz")]);
        assert!(matches!(c.query(), Err(DecodeError::InvalidSearch(_))));

        let c = config(&[("DCC_SEARCH_BYTE", "6")]);
        assert_eq!(c.query().unwrap().unwrap().byte, Some((0x06, 0xff)));
    }
}
