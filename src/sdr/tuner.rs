use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Range {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl Range {
    pub fn new(min: f64, max: f64) -> Range {
        Range { min, max, step: 0.0 }
    }

    pub fn stepped(min: f64, max: f64, step: f64) -> Range {
        Range { min, max, step }
    }

    pub fn contains(&self, v: f64) -> bool {
        v >= self.min && v <= self.max
    }

    pub fn clamp(&self, v: f64) -> f64 {
        v.max(self.min).min(self.max)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TunerType {
    Unknown,
    E4000,
    Fc0012,
    Fc0013,
    Fc2580,
    R820t,
    R828d,
}

impl TunerType {
    pub fn name(self) -> &'static str {
        match self {
            TunerType::Unknown => "UNKNOWN",
            TunerType::E4000 => "E4000",
            TunerType::Fc0012 => "FC0012",
            TunerType::Fc0013 => "FC0013",
            TunerType::Fc2580 => "FC2580",
            TunerType::R820t => "R820T",
            TunerType::R828d => "R828D",
        }
    }

    /// Published tuning ranges in Hz.
    pub fn rf_ranges(self) -> Vec<Range> {
        match self {
            TunerType::E4000 => vec![Range::new(52e6, 2.2e9)],
            TunerType::Fc0012 => vec![Range::new(22e6, 948.6e6)],
            TunerType::Fc0013 => vec![Range::new(22e6, 1.1e9)],
            TunerType::Fc2580 => vec![Range::new(146e6, 308e6), Range::new(438e6, 924e6)],
            TunerType::R820t | TunerType::R828d => vec![Range::new(24e6, 1.766e9)],
            TunerType::Unknown => vec![Range::new(24e6, 1.764e9)],
        }
    }

    /// Published discrete tuner gains, tenths of a dB.
    pub fn gains(self) -> &'static [i32] {
        match self {
            TunerType::E4000 => &[
                -10, 15, 40, 65, 90, 115, 140, 165, 190, 215, 240, 290, 340, 420,
            ],
            TunerType::Fc0012 => &[-99, -40, 71, 179, 192],
            TunerType::Fc0013 => &[
                -99, -73, -65, -63, -60, -58, -54, 58, 61, 63, 65, 67, 68, 70, 71, 179, 181, 182,
                184, 186, 188, 191, 197,
            ],
            TunerType::Fc2580 => &[0],
            TunerType::R820t | TunerType::R828d => &[
                0, 9, 14, 27, 37, 77, 87, 125, 144, 157, 166, 197, 207, 229, 254, 280, 297, 328,
                338, 364, 372, 386, 402, 421, 434, 439, 445, 480, 496,
            ],
            TunerType::Unknown => &[0],
        }
    }

    /// The tuner whose published gain table is `gains`. R828D shares the
    /// R820T table and is reported as R820T.
    pub fn from_gains(gains: &[i32]) -> TunerType {
        [
            TunerType::E4000,
            TunerType::Fc0012,
            TunerType::Fc0013,
            TunerType::Fc2580,
            TunerType::R820t,
        ]
        .iter()
        .copied()
        .find(|t| t.gains() == gains)
        .unwrap_or(TunerType::Unknown)
    }

    /// Gain ranges of the IF stages, in dB. Only the E4000 exposes them.
    pub fn if_stages(self) -> &'static [Range] {
        match self {
            TunerType::E4000 => &E4000_IF_STAGES,
            _ => &[],
        }
    }
}

const E4000_IF_STAGES: [Range; 6] = [
    Range { min: -3.0, max: 6.0, step: 9.0 },
    Range { min: 0.0, max: 9.0, step: 3.0 },
    Range { min: 0.0, max: 9.0, step: 3.0 },
    Range { min: 0.0, max: 2.0, step: 1.0 },
    Range { min: 3.0, max: 15.0, step: 3.0 },
    Range { min: 3.0, max: 15.0, step: 3.0 },
];

impl fmt::Display for TunerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A gain stage that can be set on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GainElement {
    Tuner,
    /// IF stage, numbered from 1
    If(u8),
}

impl fmt::Display for GainElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GainElement::Tuner => f.write_str("TUNER"),
            GainElement::If(stage) => write!(f, "IF{}", stage),
        }
    }
}

impl FromStr for GainElement {
    type Err = Error;

    fn from_str(s: &str) -> Result<GainElement> {
        match s {
            "TUNER" => Ok(GainElement::Tuner),
            "IF1" => Ok(GainElement::If(1)),
            "IF2" => Ok(GainElement::If(2)),
            "IF3" => Ok(GainElement::If(3)),
            "IF4" => Ok(GainElement::If(4)),
            "IF5" => Ok(GainElement::If(5)),
            "IF6" => Ok(GainElement::If(6)),
            other => Err(Error::invalid_argument("gain element", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrequencyElement {
    /// RF center frequency, Hz
    Rf,
    /// frequency correction, ppm
    Corr,
}

impl fmt::Display for FrequencyElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrequencyElement::Rf => f.write_str("RF"),
            FrequencyElement::Corr => f.write_str("CORR"),
        }
    }
}

impl FromStr for FrequencyElement {
    type Err = Error;

    fn from_str(s: &str) -> Result<FrequencyElement> {
        match s {
            "RF" => Ok(FrequencyElement::Rf),
            "CORR" => Ok(FrequencyElement::Corr),
            other => Err(Error::invalid_argument("frequency element", other)),
        }
    }
}

pub const CORR_RANGE: Range = Range { min: -1000.0, max: 1000.0, step: 0.0 };

/// Sample rates the tuner is known to run cleanly at.
pub const SAMPLE_RATES: [f64; 10] = [
    250e3, 1.024e6, 1.536e6, 1.792e6, 1.92e6, 2.048e6, 2.16e6, 2.56e6, 2.88e6, 3.2e6,
];

/// Rates the RTL2832 resampler accepts.
pub const SAMPLE_RATE_WINDOWS: [Range; 2] = [
    Range { min: 225_001.0, max: 300_000.0, step: 0.0 },
    Range { min: 900_001.0, max: 3_200_000.0, step: 0.0 },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_element_names() {
        for e in [GainElement::Tuner, GainElement::If(1), GainElement::If(6)].iter() {
            assert_eq!(e.to_string().parse::<GainElement>().unwrap(), *e);
        }
        assert!("IF7".parse::<GainElement>().is_err());
        assert!("LNA".parse::<GainElement>().is_err());
    }

    #[test]
    fn only_e4000_has_if_stages() {
        assert_eq!(TunerType::E4000.if_stages().len(), 6);
        assert!(TunerType::R820t.if_stages().is_empty());
    }

    #[test]
    fn tuner_from_gain_table() {
        assert_eq!(TunerType::from_gains(TunerType::E4000.gains()), TunerType::E4000);
        assert_eq!(TunerType::from_gains(TunerType::R828d.gains()), TunerType::R820t);
        assert_eq!(TunerType::from_gains(&[0]), TunerType::Fc2580);
        assert_eq!(TunerType::from_gains(&[]), TunerType::Unknown);
        assert_eq!(TunerType::from_gains(&[10, 20]), TunerType::Unknown);
    }

    #[test]
    fn fc2580_has_a_gap() {
        let ranges = TunerType::Fc2580.rf_ranges();
        assert_eq!(ranges.len(), 2);
        assert!(!ranges.iter().any(|r| r.contains(400e6)));
    }

    #[test]
    fn listed_rates_are_accepted_by_the_hardware() {
        for rate in SAMPLE_RATES.iter() {
            assert!(SAMPLE_RATE_WINDOWS.iter().any(|w| w.contains(*rate)), "{}", rate);
        }
    }
}
