//! Level (layout Z) from a plan view name
//!
//! Structural plan names carry their elevation, e.g. `6.000 structural plan`
//! or `Level 3600`. Decimal tokens and integers up to 100 are metres,
//! larger integers are millimetres.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::constants::units::MM_PER_FOOT;

static RE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:[.，]\d+)?").unwrap());

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LevelError {
    #[error("view name contains no number, cannot determine the level (e.g. \"6.000 structural plan\")")]
    NoNumber,

    #[error("cannot parse level number from view name: {0}")]
    Invalid(String),
}

/// Elevation parsed from a view name
#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    pub height_mm: f64,
    pub height_m: f64,
    /// Metres as shown to the operator
    pub label: String,
    /// Elevation in host internal units (feet)
    pub z_feet: f64,
}

/// Pick the elevation token from a view name.
///
/// The first token with a decimal separator wins; otherwise the first
/// number. Full-width commas count as decimal separators.
fn level_token(name: &str) -> Option<&str> {
    let mut tokens: Vec<&str> = Vec::new();
    for m in RE_NUMBER.find_iter(name) {
        if !tokens.contains(&m.as_str()) {
            tokens.push(m.as_str());
        }
    }

    tokens
        .iter()
        .find(|t| t.contains('.') || t.contains('，'))
        .or_else(|| tokens.first())
        .copied()
}

pub fn layout_z_from_view_name(name: &str) -> Result<Level, LevelError> {
    let token = level_token(name).ok_or(LevelError::NoNumber)?;
    let normalized = token.trim().replace('，', ".");
    let numeric: f64 = normalized
        .parse()
        .map_err(|_| LevelError::Invalid(token.to_string()))?;

    let in_metres = normalized.contains('.') || numeric <= 100.0;
    let height_mm = if in_metres { numeric * 1000.0 } else { numeric };
    let height_m = height_mm / 1000.0;
    let label = if in_metres {
        normalized
    } else {
        trim_number(height_m, 3)
    };

    Ok(Level {
        height_mm,
        height_m,
        label,
        z_feet: height_mm / MM_PER_FOOT,
    })
}

/// Format with at most `decimals` places, dropping trailing zeros
pub fn trim_number(value: f64, decimals: usize) -> String {
    let formatted = format!("{:.*}", decimals, value);
    if !formatted.contains('.') {
        return formatted;
    }
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}
