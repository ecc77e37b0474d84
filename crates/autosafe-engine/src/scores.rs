//! Score tables for Prototype Assurance Level (PAL) derivation
//!
//! Pure lookup functions used by [`crate::assurance`]:
//! - discretization of continuous levels into PAL 1–5
//! - base derivation from confidence and robustness ratings
//! - pairwise AND/OR aggregation of child levels
//! - top-down decomposition guidance
//!
//! Table lookups never clamp. An index outside 1–5 is a caller bug and is
//! reported as [`EngineError::InvalidInput`]; only [`discretize`] clamps.

use crate::graph::GateType;
use crate::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// Lowest PAL (least assurance required)
pub const MIN_LEVEL: u8 = 1;
/// Highest PAL (maximum assurance required)
pub const MAX_LEVEL: u8 = 5;

/// Base PAL indexed `[confidence - 1][robustness - 1]`
const BASE_TABLE: [[u8; 5]; 5] = [
    [5, 5, 4, 4, 3],
    [5, 4, 4, 3, 3],
    [4, 4, 3, 3, 2],
    [4, 3, 3, 2, 2],
    [3, 3, 2, 2, 1],
];

/// AND aggregation indexed `[level_a - 1][level_b - 1]`. Symmetric.
const AND_TABLE: [[u8; 5]; 5] = [
    [5, 4, 4, 3, 3],
    [4, 4, 3, 3, 2],
    [4, 3, 3, 2, 2],
    [3, 3, 2, 2, 1],
    [3, 2, 2, 1, 1],
];

/// `(min, max, asymmetric pair)` child targets indexed `[parent - 1]`
const DECOMPOSITION_TABLE: [(u8, u8, Option<(u8, u8)>); 5] = [
    (1, 1, None),
    (1, 2, Some((2, 1))),
    (2, 3, Some((3, 1))),
    (3, 4, Some((4, 2))),
    (4, 5, Some((5, 3))),
];

fn table_index(name: &str, level: u8) -> EngineResult<usize> {
    if !(MIN_LEVEL..=MAX_LEVEL).contains(&level) {
        return Err(EngineError::InvalidInput(format!(
            "{} {} outside {}..={}",
            name, level, MIN_LEVEL, MAX_LEVEL
        )));
    }
    Ok(usize::from(level - MIN_LEVEL))
}

fn check_continuous(name: &str, level: f64) -> EngineResult<()> {
    if !(f64::from(MIN_LEVEL)..=f64::from(MAX_LEVEL)).contains(&level) {
        return Err(EngineError::InvalidInput(format!(
            "{} {} outside [{}, {}]",
            name, level, MIN_LEVEL, MAX_LEVEL
        )));
    }
    Ok(())
}

/// Clamp a continuous level into `[1, 5]`. NaN maps to the lowest level.
pub fn clamp_level(level: f64) -> f64 {
    if level.is_nan() {
        return f64::from(MIN_LEVEL);
    }
    level.clamp(f64::from(MIN_LEVEL), f64::from(MAX_LEVEL))
}

/// Map a continuous level to a PAL using half-open bins centered on whole
/// numbers: `< 1.5 -> 1`, `[1.5, 2.5) -> 2`, ..., `>= 4.5 -> 5`.
pub fn discretize(level: f64) -> u8 {
    let clamped = clamp_level(level);
    // floor(x + 0.5) keeps the bins half-open on the upper edge
    let bin = (clamped + 0.5).floor() as u8;
    bin.clamp(MIN_LEVEL, MAX_LEVEL)
}

/// Base PAL from a confidence level and a robustness level.
///
/// Low confidence and low robustness need the most assurance (5); high and
/// high need the least (1).
pub fn base_from_confidence_robustness(confidence: u8, robustness: u8) -> EngineResult<u8> {
    let cl = table_index("confidence level", confidence)?;
    let rs = table_index("robustness level", robustness)?;
    Ok(BASE_TABLE[cl][rs])
}

/// Combine two child levels under an AND gate
pub fn and_aggregate(level_a: u8, level_b: u8) -> EngineResult<u8> {
    let a = table_index("AND input", level_a)?;
    let b = table_index("AND input", level_b)?;
    Ok(AND_TABLE[a][b])
}

/// Combine two child levels under an OR gate: the arithmetic mean
pub fn or_aggregate(level_a: f64, level_b: f64) -> EngineResult<f64> {
    check_continuous("OR input", level_a)?;
    check_continuous("OR input", level_b)?;
    Ok((level_a + level_b) / 2.0)
}

/// Left fold of [`and_aggregate`]. A single level is returned unchanged.
pub fn and_fold(levels: &[u8]) -> EngineResult<Option<u8>> {
    let Some((&first, rest)) = levels.split_first() else {
        return Ok(None);
    };
    table_index("AND input", first)?;
    rest.iter()
        .try_fold(first, |acc, &level| and_aggregate(acc, level))
        .map(Some)
}

/// Left fold of [`or_aggregate`]. A single level is returned unchanged.
pub fn or_fold(levels: &[f64]) -> EngineResult<Option<f64>> {
    let Some((&first, rest)) = levels.split_first() else {
        return Ok(None);
    };
    check_continuous("OR input", first)?;
    rest.iter()
        .try_fold(first, |acc, &level| or_aggregate(acc, level))
        .map(Some)
}

/// Complement-product combination used when a node's direct rating meets its
/// child-derived level under AND semantics:
///
/// ```text
/// level = 1 + 4 * prod((5 - L_i) / 4)
/// ```
///
/// Agrees with the AND table on its corners: two 1s give 5, any 5 gives 1.
pub fn complement_product(levels: &[f64]) -> EngineResult<f64> {
    let span = f64::from(MAX_LEVEL - MIN_LEVEL);
    let mut product = 1.0;
    for &level in levels {
        check_continuous("AND input", level)?;
        product *= (f64::from(MAX_LEVEL) - level) / span;
    }
    Ok(f64::from(MIN_LEVEL) + span * product)
}

/// Suggested child targets for a resolved parent PAL. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompositionGuidance {
    /// Lowest suggested child PAL
    pub min: u8,
    /// Highest suggested child PAL
    pub max: u8,
    /// Optional uneven split `(level_a, level_b)` between two children
    pub asymmetric: Option<(u8, u8)>,
}

/// Target range for the children of a node with the given PAL
pub fn decomposition_targets(parent_level: u8) -> EngineResult<DecompositionGuidance> {
    let idx = table_index("parent level", parent_level)?;
    let (min, max, asymmetric) = DECOMPOSITION_TABLE[idx];
    Ok(DecompositionGuidance {
        min,
        max,
        asymmetric,
    })
}

/// Child pairs `(a, b)` with `a <= b` whose AND aggregate equals `parent_level`
pub fn and_decomposition(parent_level: u8) -> EngineResult<Vec<(u8, u8)>> {
    table_index("parent level", parent_level)?;
    let mut pairs = Vec::new();
    for a in MIN_LEVEL..=MAX_LEVEL {
        for b in a..=MAX_LEVEL {
            if and_aggregate(a, b)? == parent_level {
                pairs.push((a, b));
            }
        }
    }
    Ok(pairs)
}

/// Child pairs `(a, b)` with `a <= b` whose OR mean discretizes to `parent_level`
/// and straddles it by at most one level on each side.
pub fn or_decomposition(parent_level: u8) -> EngineResult<Vec<(u8, u8)>> {
    table_index("parent level", parent_level)?;
    let mut pairs = Vec::new();
    for a in MIN_LEVEL..=MAX_LEVEL {
        for b in a..=MAX_LEVEL {
            let mean = or_aggregate(f64::from(a), f64::from(b))?;
            if discretize(mean) == parent_level && b - a <= 2 {
                pairs.push((a, b));
            }
        }
    }
    Ok(pairs)
}

/// Decomposition pairs for the given gate semantics
pub fn decomposition_for_gate(parent_level: u8, gate: GateType) -> EngineResult<Vec<(u8, u8)>> {
    match gate {
        GateType::And => and_decomposition(parent_level),
        GateType::Or => or_decomposition(parent_level),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discretize_bins() {
        assert_eq!(discretize(1.0), 1);
        assert_eq!(discretize(1.49), 1);
        assert_eq!(discretize(1.5), 2);
        assert_eq!(discretize(2.49), 2);
        assert_eq!(discretize(2.5), 3);
        assert_eq!(discretize(4.49), 4);
        assert_eq!(discretize(4.5), 5);
        assert_eq!(discretize(5.0), 5);
    }

    #[test]
    fn test_discretize_clamps() {
        assert_eq!(discretize(-3.0), 1);
        assert_eq!(discretize(0.0), 1);
        assert_eq!(discretize(9.7), 5);
        assert_eq!(discretize(f64::INFINITY), 5);
        assert_eq!(discretize(f64::NAN), 1);
    }

    #[test]
    fn test_base_table_range_and_monotonicity() {
        for cl in 1..=5 {
            for rs in 1..=5 {
                let level = base_from_confidence_robustness(cl, rs).unwrap();
                assert!((1..=5).contains(&level));
                if cl < 5 {
                    assert!(base_from_confidence_robustness(cl + 1, rs).unwrap() <= level);
                }
                if rs < 5 {
                    assert!(base_from_confidence_robustness(cl, rs + 1).unwrap() <= level);
                }
            }
        }
        assert_eq!(base_from_confidence_robustness(1, 1).unwrap(), 5);
        assert_eq!(base_from_confidence_robustness(5, 5).unwrap(), 1);
    }

    #[test]
    fn test_table_lookups_fail_fast() {
        assert!(matches!(
            base_from_confidence_robustness(0, 3),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(base_from_confidence_robustness(3, 6).is_err());
        assert!(and_aggregate(6, 1).is_err());
        assert!(or_aggregate(0.5, 3.0).is_err());
        assert!(or_aggregate(3.0, f64::NAN).is_err());
        assert!(decomposition_targets(0).is_err());
    }

    #[test]
    fn test_and_table() {
        assert_eq!(and_aggregate(5, 5).unwrap(), 1);
        assert_eq!(and_aggregate(1, 1).unwrap(), 5);
        for a in 1..=5 {
            for b in 1..=5 {
                assert_eq!(and_aggregate(a, b).unwrap(), and_aggregate(b, a).unwrap());
            }
        }
    }

    #[test]
    fn test_or_is_mean() {
        assert_eq!(or_aggregate(2.0, 5.0).unwrap(), 3.5);
        assert_eq!(or_aggregate(5.0, 2.0).unwrap(), 3.5);
        assert_eq!(or_fold(&[1.0, 3.0, 5.0]).unwrap(), Some(3.5));
    }

    #[test]
    fn test_folds() {
        assert_eq!(and_fold(&[]).unwrap(), None);
        assert_eq!(and_fold(&[3]).unwrap(), Some(3));
        assert_eq!(and_fold(&[1, 1]).unwrap(), Some(5));
        assert_eq!(and_fold(&[1, 1, 5]).unwrap(), Some(1));
        assert!(and_fold(&[7]).is_err());
        assert_eq!(or_fold(&[]).unwrap(), None);
        assert_eq!(or_fold(&[4.0]).unwrap(), Some(4.0));
    }

    #[test]
    fn test_complement_product() {
        assert_eq!(complement_product(&[1.0, 1.0]).unwrap(), 5.0);
        assert_eq!(complement_product(&[5.0, 2.0]).unwrap(), 1.0);
        assert_eq!(complement_product(&[3.0, 3.0]).unwrap(), 2.0);
        assert_eq!(complement_product(&[4.0]).unwrap(), 2.0);
        assert!(complement_product(&[0.0]).is_err());
    }

    #[test]
    fn test_decomposition_guidance() {
        let top = decomposition_targets(5).unwrap();
        assert_eq!((top.min, top.max), (4, 5));
        assert_eq!(top.asymmetric, Some((5, 3)));
        assert_eq!(decomposition_targets(1).unwrap().asymmetric, None);

        for parent in 1..=5 {
            for (a, b) in and_decomposition(parent).unwrap() {
                assert_eq!(and_aggregate(a, b).unwrap(), parent);
            }
            assert!(or_decomposition(parent).unwrap().contains(&(parent, parent)));
        }
        assert!(and_decomposition(5).unwrap().contains(&(1, 1)));
        assert_eq!(
            decomposition_for_gate(3, GateType::Or).unwrap(),
            or_decomposition(3).unwrap()
        );
    }
}
