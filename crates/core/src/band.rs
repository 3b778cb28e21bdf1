//! Confidence-band assignment over a percentile ladder.
//!
//! The ladder is scanned linearly and the first bracket containing the
//! measurement wins. Duplicate reference values therefore resolve to the
//! lowest matching bracket.

use crate::{ConfidenceLadder, SyncError, WorkerRecord};

/// Label used whenever a ladder or measurement cannot be evaluated.
pub const DEFAULT_LABEL: &str = "50";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandMode {
    /// Single label of the closer bracket endpoint; ties go to the lower index.
    Nearest,
    /// `"low~high"` label of the containing bracket.
    Range,
}

/// A ladder whose reference values all parsed as decimals.
#[derive(Debug, Clone)]
pub struct ParsedLadder<'a> {
    values: Vec<f64>,
    percentiles: &'a [String],
}

pub fn parse_decimal(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn parse_ladder(ladder: &ConfidenceLadder) -> Result<ParsedLadder<'_>, SyncError> {
    if ladder.values.is_empty() || ladder.percentiles.is_empty() {
        return Err(SyncError::InvalidLadder("empty ladder".into()));
    }
    if ladder.values.len() != ladder.percentiles.len() {
        return Err(SyncError::InvalidLadder(format!(
            "{} values vs {} percentiles",
            ladder.values.len(),
            ladder.percentiles.len()
        )));
    }
    let mut values = Vec::with_capacity(ladder.values.len());
    for (i, raw) in ladder.values.iter().enumerate() {
        let v = parse_decimal(raw)
            .ok_or_else(|| SyncError::InvalidLadder(format!("value {:?} at index {} is not a decimal", raw, i)))?;
        values.push(v);
    }
    Ok(ParsedLadder { values, percentiles: &ladder.percentiles })
}

impl ParsedLadder<'_> {
    pub fn label(&self, x: f64, mode: BandMode) -> String {
        let n = self.values.len();
        if x <= self.values[0] {
            return self.percentiles[0].clone();
        }
        if x >= self.values[n - 1] {
            return self.percentiles[n - 1].clone();
        }
        for i in 0..n - 1 {
            let (lo, hi) = (self.values[i], self.values[i + 1]);
            if x >= lo && x <= hi {
                return match mode {
                    BandMode::Nearest => {
                        if (x - lo).abs() <= (hi - x).abs() {
                            self.percentiles[i].clone()
                        } else {
                            self.percentiles[i + 1].clone()
                        }
                    }
                    BandMode::Range => format!("{}~{}", self.percentiles[i], self.percentiles[i + 1]),
                };
            }
        }
        // Only reachable when the ladder is not ascending.
        DEFAULT_LABEL.to_string()
    }
}

/// Total band assignment: falls back to [`DEFAULT_LABEL`] instead of failing.
pub fn assign_band(measurement: &str, ladder: &ConfidenceLadder, mode: BandMode) -> String {
    let Ok(parsed) = parse_ladder(ladder) else {
        return DEFAULT_LABEL.to_string();
    };
    match parse_decimal(measurement) {
        Some(x) => parsed.label(x, mode),
        None => DEFAULT_LABEL.to_string(),
    }
}

/// Fill `band` and `nearest_percentile` for every worker with an inferer value.
///
/// Workers are always annotated; an `Err` only reports that the ladder was
/// unusable and every label fell back to the default.
pub fn annotate_bands(workers: &mut [WorkerRecord], ladder: &ConfidenceLadder) -> Result<(), SyncError> {
    let parsed = parse_ladder(ladder);
    for w in workers.iter_mut() {
        let measurement = w.inferer_value.as_deref().filter(|v| !v.is_empty());
        let Some(raw) = measurement else {
            w.band = None;
            w.nearest_percentile = None;
            continue;
        };
        let (band, nearest) = match (&parsed, parse_decimal(raw)) {
            (Ok(l), Some(x)) => (l.label(x, BandMode::Range), l.label(x, BandMode::Nearest)),
            _ => (DEFAULT_LABEL.to_string(), DEFAULT_LABEL.to_string()),
        };
        w.band = Some(band);
        w.nearest_percentile = Some(nearest);
    }
    parsed.map(|_| ())
}
