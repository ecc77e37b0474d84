//! ASIL (Automotive Safety Integrity Level) definitions and targets
//!
//! Implements ISO 26262 ASIL levels QM and A through D, the risk graph used to
//! derive an ASIL from severity/controllability/exposure ratings, the FMEDA
//! metric targets checked by [`crate::fmeda`], and the allowed decomposition
//! schemes.

use crate::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// ASIL levels according to ISO 26262
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AsilLevel {
    /// Quality Management (QM) - No safety requirements
    QM,
    /// ASIL A - Lowest safety integrity level
    A,
    /// ASIL B - Low safety integrity level
    B,
    /// ASIL C - Medium safety integrity level
    C,
    /// ASIL D - Highest safety integrity level
    D,
}

impl fmt::Display for AsilLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsilLevel::A => write!(f, "ASIL A"),
            AsilLevel::B => write!(f, "ASIL B"),
            AsilLevel::C => write!(f, "ASIL C"),
            AsilLevel::D => write!(f, "ASIL D"),
            AsilLevel::QM => write!(f, "QM"),
        }
    }
}

impl FromStr for AsilLevel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let level = trimmed
            .strip_prefix("ASIL")
            .map(str::trim)
            .unwrap_or(trimmed);
        match level.to_ascii_uppercase().as_str() {
            "QM" => Ok(AsilLevel::QM),
            "A" => Ok(AsilLevel::A),
            "B" => Ok(AsilLevel::B),
            "C" => Ok(AsilLevel::C),
            "D" => Ok(AsilLevel::D),
            _ => Err(EngineError::InvalidInput(format!(
                "unknown ASIL level '{}'",
                s
            ))),
        }
    }
}

/// Minimum FMEDA metric values a safety goal must reach.
///
/// All values are fractions in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricTargets {
    /// Diagnostic coverage
    pub dc: f64,
    /// Single point fault metric
    pub spfm: f64,
    /// Latent fault metric
    pub lpfm: f64,
}

impl MetricTargets {
    /// Targets that every figure meets
    pub const NONE: MetricTargets = MetricTargets {
        dc: 0.0,
        spfm: 0.0,
        lpfm: 0.0,
    };

    pub(crate) fn validate(&self) -> EngineResult<()> {
        for (name, value) in [("dc", self.dc), ("spfm", self.spfm), ("lpfm", self.lpfm)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::InvalidInput(format!(
                    "{} target {} outside [0, 1]",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// One side of an ASIL decomposition, e.g. `ASIL B(D)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecomposedAsil {
    /// Level assigned to the decomposed requirement
    pub level: AsilLevel,
    /// Level of the requirement before decomposition
    pub original: AsilLevel,
}

impl fmt::Display for DecomposedAsil {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = |level: AsilLevel| match level {
            AsilLevel::QM => "QM",
            AsilLevel::A => "A",
            AsilLevel::B => "B",
            AsilLevel::C => "C",
            AsilLevel::D => "D",
        };
        write!(f, "ASIL {}({})", short(self.level), short(self.original))
    }
}

impl AsilLevel {
    /// All levels, lowest first
    pub const ALL: [AsilLevel; 5] = [
        AsilLevel::QM,
        AsilLevel::A,
        AsilLevel::B,
        AsilLevel::C,
        AsilLevel::D,
    ];

    /// Default FMEDA metric targets for this ASIL level
    pub fn fmeda_targets(&self) -> MetricTargets {
        match self {
            AsilLevel::D => MetricTargets {
                dc: 0.99,
                spfm: 0.99,
                lpfm: 0.90,
            },
            AsilLevel::C => MetricTargets {
                dc: 0.97,
                spfm: 0.97,
                lpfm: 0.90,
            },
            AsilLevel::B => MetricTargets {
                dc: 0.90,
                spfm: 0.90,
                lpfm: 0.60,
            },
            AsilLevel::A | AsilLevel::QM => MetricTargets::NONE,
        }
    }

    /// PMHF target: highest acceptable top-event failure probability over
    /// the mission time
    pub fn pmhf_target(&self) -> f64 {
        match self {
            AsilLevel::D => 1e-8,
            AsilLevel::C | AsilLevel::B => 1e-7,
            AsilLevel::A => 1e-6,
            AsilLevel::QM => 1.0,
        }
    }

    /// Check if this ASIL level is compatible with another (can be decomposed to)
    pub fn is_compatible_with(&self, other: &AsilLevel) -> bool {
        self >= other
    }

    /// Decomposition schemes allowed for this level.
    ///
    /// ASIL A decomposes only into A(A) + QM(A); QM has no decomposition.
    pub fn decomposition_schemes(&self) -> Vec<(DecomposedAsil, DecomposedAsil)> {
        let original = *self;
        let pair = |a: AsilLevel, b: AsilLevel| {
            (
                DecomposedAsil { level: a, original },
                DecomposedAsil { level: b, original },
            )
        };
        match self {
            AsilLevel::D => vec![
                pair(AsilLevel::B, AsilLevel::B),
                pair(AsilLevel::C, AsilLevel::QM),
                pair(AsilLevel::A, AsilLevel::C),
                pair(AsilLevel::B, AsilLevel::QM),
            ],
            AsilLevel::C => vec![
                pair(AsilLevel::B, AsilLevel::A),
                pair(AsilLevel::C, AsilLevel::QM),
            ],
            AsilLevel::B => vec![
                pair(AsilLevel::A, AsilLevel::A),
                pair(AsilLevel::B, AsilLevel::QM),
            ],
            AsilLevel::A => vec![pair(AsilLevel::A, AsilLevel::QM)],
            AsilLevel::QM => vec![],
        }
    }
}

// ============================================================================
// Risk graph
// ============================================================================

/// ISO 26262 risk graph indexed `[severity - 1][controllability - 1][exposure - 1]`
const RISK_GRAPH: [[[AsilLevel; 4]; 3]; 3] = {
    use AsilLevel::*;
    [
        // S1
        [[QM, QM, QM, QM], [QM, QM, QM, A], [QM, QM, QM, B]],
        // S2
        [[QM, QM, QM, A], [QM, QM, A, B], [QM, A, B, C]],
        // S3
        [[QM, QM, A, B], [QM, A, B, C], [A, B, C, D]],
    ]
};

fn check_rating(name: &str, value: u8, max: u8) -> EngineResult<usize> {
    if value == 0 || value > max {
        return Err(EngineError::InvalidInput(format!(
            "{} rating {} outside 1..={}",
            name, value, max
        )));
    }
    Ok(usize::from(value - 1))
}

/// Determine the ASIL of a hazardous event from its S/C/E ratings.
///
/// Severity and controllability range over 1–3, exposure over 1–4.
pub fn determine_asil(severity: u8, controllability: u8, exposure: u8) -> EngineResult<AsilLevel> {
    let s = check_rating("severity", severity, 3)?;
    let c = check_rating("controllability", controllability, 3)?;
    let e = check_rating("exposure", exposure, 4)?;
    Ok(RISK_GRAPH[s][c][e])
}

// ============================================================================
// Validation targets (ISO 21448)
// ============================================================================

/// `P(E|HB)` for an exposure rating
pub fn exposure_to_probability(level: u8) -> f64 {
    match level {
        1 => 1e-4,
        2 => 1e-3,
        3 => 1e-2,
        4 => 1e-1,
        _ => 1.0,
    }
}

/// `P(C|E)` for a controllability rating
pub fn controllability_to_probability(level: u8) -> f64 {
    match level {
        1 => 1e-3,
        2 => 1e-2,
        3 => 1e-1,
        _ => 1.0,
    }
}

/// `P(S|C)` for a severity rating
pub fn severity_to_probability(level: u8) -> f64 {
    match level {
        1 => 1e-3,
        2 => 1e-2,
        3 => 1e-1,
        _ => 1.0,
    }
}

/// Acceptable rate of the hazardous behaviour, in events per hour:
///
/// ```text
/// R_HB = A_H / (P_E|HB * P_C|E * P_S|C)
/// ```
pub fn derive_validation_target(
    acceptance_rate: f64,
    exposure_given_hb: f64,
    uncontrollable_given_exposure: f64,
    severity_given_uncontrollable: f64,
) -> EngineResult<f64> {
    let denominator =
        exposure_given_hb * uncontrollable_given_exposure * severity_given_uncontrollable;
    if denominator.is_nan() || denominator <= 0.0 {
        return Err(EngineError::InvalidInput(
            "probability factors must be positive to derive a validation target".to_string(),
        ));
    }
    Ok(acceptance_rate / denominator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asil_ordering() {
        assert!(AsilLevel::D > AsilLevel::C);
        assert!(AsilLevel::C > AsilLevel::B);
        assert!(AsilLevel::B > AsilLevel::A);
        assert!(AsilLevel::A > AsilLevel::QM);
    }

    #[test]
    fn test_asil_compatibility() {
        assert!(AsilLevel::D.is_compatible_with(&AsilLevel::A));
        assert!(AsilLevel::C.is_compatible_with(&AsilLevel::B));
        assert!(!AsilLevel::A.is_compatible_with(&AsilLevel::D));
    }

    #[test]
    fn test_parse_asil() {
        assert_eq!("D".parse::<AsilLevel>().unwrap(), AsilLevel::D);
        assert_eq!("ASIL b".parse::<AsilLevel>().unwrap(), AsilLevel::B);
        assert_eq!(" qm ".parse::<AsilLevel>().unwrap(), AsilLevel::QM);
        assert!("E".parse::<AsilLevel>().is_err());
    }

    #[test]
    fn test_fmeda_targets() {
        let d = AsilLevel::D.fmeda_targets();
        assert_eq!(d.spfm, 0.99);
        assert_eq!(d.lpfm, 0.90);
        assert_eq!(AsilLevel::A.fmeda_targets(), MetricTargets::NONE);
        for level in AsilLevel::ALL {
            assert!(level.fmeda_targets().validate().is_ok());
        }
    }

    #[test]
    fn test_pmhf_targets() {
        assert_eq!(AsilLevel::D.pmhf_target(), 1e-8);
        assert_eq!(AsilLevel::B.pmhf_target(), AsilLevel::C.pmhf_target());
        assert_eq!(AsilLevel::QM.pmhf_target(), 1.0);
        assert!(AsilLevel::A.pmhf_target() > AsilLevel::B.pmhf_target());
    }

    #[test]
    fn test_asil_decomposition() {
        let decompositions = AsilLevel::D.decomposition_schemes();
        assert_eq!(decompositions.len(), 4);
        let (a, b) = decompositions[0];
        assert_eq!(a.to_string(), "ASIL B(D)");
        assert_eq!(b.to_string(), "ASIL B(D)");
        assert!(AsilLevel::QM.decomposition_schemes().is_empty());
        assert!(decompositions
            .iter()
            .all(|(a, b)| AsilLevel::D.is_compatible_with(&a.level.max(b.level))));
    }

    #[test]
    fn test_risk_graph() {
        assert_eq!(determine_asil(3, 3, 4).unwrap(), AsilLevel::D);
        assert_eq!(determine_asil(1, 1, 1).unwrap(), AsilLevel::QM);
        assert_eq!(determine_asil(2, 3, 3).unwrap(), AsilLevel::B);
        assert_eq!(determine_asil(3, 1, 3).unwrap(), AsilLevel::A);
        assert!(determine_asil(4, 1, 1).is_err());
        assert!(determine_asil(1, 1, 0).is_err());
        assert!(determine_asil(1, 1, 4).is_ok());
    }

    #[test]
    fn test_validation_target() {
        let target = derive_validation_target(1e-8, 0.05, 0.1, 0.01).unwrap();
        assert!((target - 2e-4).abs() < 1e-12);
        assert!(derive_validation_target(1e-8, 0.0, 0.1, 0.01).is_err());
        assert_eq!(exposure_to_probability(4), 1e-1);
        assert_eq!(controllability_to_probability(9), 1.0);
        assert_eq!(severity_to_probability(2), 1e-2);
    }
}
