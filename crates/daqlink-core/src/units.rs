//! Engineering Unit Scaling
//!
//! Provides metric-prefix conversion for instrument readings:
//! - Scale factors between prefixed units of the same base (kohm → ohm, uF → nF)
//! - Parsing of `"<value> <unit>"` readings into [`EngineeringValue`]
//! - Normalization of LCR meter readings to their canonical base units

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while scaling engineering units
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnitError {
    /// The part of `unit` before its base unit is not in the prefix table
    #[error("Unit prefix '{prefix}' of '{unit}' not recognized")]
    UnknownPrefix {
        /// Unit as given
        unit: String,
        /// Prefix that failed the lookup
        prefix: String,
    },

    /// The two units have no base unit in common
    #[error("Units '{given}' and '{desired}' do not share a base unit")]
    IncompatibleUnits {
        /// Unit being converted from
        given: String,
        /// Unit being converted to
        desired: String,
    },

    /// Text that is not a `<number> <unit>` reading
    #[error("Invalid engineering value: {0}")]
    InvalidValue(String),
}

/// A metric prefix and its power-of-ten multiplier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prefix {
    /// Prefix symbol as it appears in a unit string ("" for the bare base unit)
    pub symbol: &'static str,
    /// Multiplier relative to the base unit
    pub scale: f64,
}

const fn prefix(symbol: &'static str, scale: f64) -> Prefix {
    Prefix { symbol, scale }
}

/// Standard prefix table, ordered from largest to smallest multiplier
pub static PREFIXES: &[Prefix] = &[
    prefix("G", 1e9),
    prefix("M", 1e6),
    prefix("k", 1e3),
    prefix("h", 1e2),
    prefix("", 1.0),
    prefix("d", 1e-1),
    prefix("c", 1e-2),
    prefix("m", 1e-3),
    prefix("u", 1e-6),
    prefix("µ", 1e-6),
    prefix("n", 1e-9),
    prefix("p", 1e-12),
    prefix("f", 1e-15),
];

/// Converts values between metric-prefixed units using an immutable prefix table
#[derive(Debug, Clone, Copy)]
pub struct UnitScaler {
    table: &'static [Prefix],
}

impl Default for UnitScaler {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitScaler {
    /// Create a scaler over the standard [`PREFIXES`] table
    pub fn new() -> Self {
        Self { table: PREFIXES }
    }

    /// Create a scaler over a custom prefix table
    pub fn with_table(table: &'static [Prefix]) -> Self {
        Self { table }
    }

    /// Look up the multiplier for a prefix symbol
    pub fn prefix_scale(&self, symbol: &str) -> Option<f64> {
        self.table
            .iter()
            .find(|p| p.symbol == symbol)
            .map(|p| p.scale)
    }

    /// Factor to multiply a value in `given` units by to express it in `desired` units
    ///
    /// Both units are first put in canonical case (see [`canonical_unit`]).
    /// Identical units short-circuit to exactly `1.0`. Otherwise the base unit
    /// suffix shared by both strings is stripped and the remaining prefixes are
    /// looked up in the table; a prefix missing from the table is an error.
    pub fn scale_factor(&self, given: &str, desired: &str) -> Result<f64, UnitError> {
        let (from, to) = (canonical_unit(given), canonical_unit(desired));
        if from == to {
            return Ok(1.0);
        }

        let base_len = shared_suffix_len(&from, &to);
        if base_len == 0 {
            return Err(UnitError::IncompatibleUnits {
                given: given.to_string(),
                desired: desired.to_string(),
            });
        }

        let given_scale = self.lookup(given, &from[..from.len() - base_len])?;
        let desired_scale = self.lookup(desired, &to[..to.len() - base_len])?;

        Ok(given_scale / desired_scale)
    }

    fn lookup(&self, unit: &str, prefix: &str) -> Result<f64, UnitError> {
        self.prefix_scale(prefix)
            .ok_or_else(|| UnitError::UnknownPrefix {
                unit: unit.to_string(),
                prefix: prefix.to_string(),
            })
    }
}

/// Rewrite a unit so its base symbol has one spelling
///
/// A case-insensitive `ohm` suffix becomes `ohm` and a trailing `f`/`h`
/// becomes `F`/`H`, so `kOhm` and `uf` scale like `kohm` and `uF`.
/// Angle units and the empty unit are returned as is.
pub fn canonical_unit(unit: &str) -> Cow<'_, str> {
    if ["deg", "th", "rad"].iter().any(|u| unit.eq_ignore_ascii_case(u)) {
        return Cow::Borrowed(unit);
    }

    if let Some(prefix) = unit.len().checked_sub(3).and_then(|i| {
        unit.get(i..)
            .filter(|base| base.eq_ignore_ascii_case("ohm"))
            .map(|_| &unit[..i])
    }) {
        return if unit.ends_with("ohm") {
            Cow::Borrowed(unit)
        } else {
            Cow::Owned(format!("{}ohm", prefix))
        };
    }

    match unit.strip_suffix('f').or_else(|| unit.strip_suffix('h')) {
        Some(prefix) => {
            let base = if unit.ends_with('f') { 'F' } else { 'H' };
            Cow::Owned(format!("{}{}", prefix, base))
        }
        None => Cow::Borrowed(unit),
    }
}

/// Byte length of the longest common suffix of two unit strings
fn shared_suffix_len(a: &str, b: &str) -> usize {
    a.chars()
        .rev()
        .zip(b.chars().rev())
        .take_while(|(x, y)| x == y)
        .map(|(c, _)| c.len_utf8())
        .sum()
}

/// Convenience wrapper around [`UnitScaler::scale_factor`] with the standard table
pub fn scale_unit(given: &str, desired: &str) -> Result<f64, UnitError> {
    UnitScaler::new().scale_factor(given, desired)
}

/// A measured magnitude together with its unit symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineeringValue {
    /// Numeric magnitude in `unit`
    pub magnitude: f64,
    /// Unit symbol, e.g. "kohm", "nF", "mH"
    pub unit: String,
}

impl EngineeringValue {
    /// Create a new value
    pub fn new(magnitude: f64, unit: impl Into<String>) -> Self {
        Self {
            magnitude,
            unit: unit.into(),
        }
    }

    /// Parse a reading such as `"1.234 kohm"` or `"47.0nF"`
    pub fn parse(text: &str) -> Result<Self, UnitError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(UnitError::InvalidValue("empty reading".to_string()));
        }

        if let Some((number, unit)) = text.split_once(char::is_whitespace) {
            let magnitude = number
                .parse::<f64>()
                .map_err(|_| UnitError::InvalidValue(text.to_string()))?;
            return Ok(Self::new(magnitude, unit.trim()));
        }

        // No separator: take the longest leading slice that parses as a number
        let split = text
            .char_indices()
            .map(|(i, c)| i + c.len_utf8())
            .rev()
            .find(|&end| text[..end].parse::<f64>().is_ok())
            .ok_or_else(|| UnitError::InvalidValue(text.to_string()))?;

        let magnitude = text[..split]
            .parse::<f64>()
            .map_err(|_| UnitError::InvalidValue(text.to_string()))?;
        Ok(Self::new(magnitude, &text[split..]))
    }

    /// Express this value in another unit of the same base
    pub fn convert(&self, scaler: &UnitScaler, desired: &str) -> Result<Self, UnitError> {
        let factor = scaler.scale_factor(&self.unit, desired)?;
        Ok(Self::new(self.magnitude * factor, desired))
    }
}

impl fmt::Display for EngineeringValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.magnitude, self.unit)
    }
}

/// Canonical base unit for an LCR reading
///
/// Resistance-like units map to `ohm`, capacitance to `nF`, inductance to `mH`.
/// Phase angles and dimensionless factors (Q, D) keep their own unit.
pub fn base_unit(unit: &str) -> &str {
    let canonical = canonical_unit(unit);
    match canonical.as_ref() {
        "" => unit,
        u if u.ends_with("ohm") => "ohm",
        u if u.ends_with('F') => "nF",
        u if u.ends_with('H') => "mH",
        _ => unit,
    }
}

/// Rescale a reading to its canonical base unit (see [`base_unit`])
pub fn normalize(scaler: &UnitScaler, value: &EngineeringValue) -> Result<EngineeringValue, UnitError> {
    let target = base_unit(&value.unit).to_string();
    value.convert(scaler, &target)
}

/// Parse a two-channel meter response of the form `"<v> <unit>, <v> <unit>"`
///
/// Returns the (primary, secondary) readings in the units the meter reported.
pub fn parse_reading_pair(text: &str) -> Result<(EngineeringValue, EngineeringValue), UnitError> {
    let mut fields = text.trim().split(',');
    let primary = fields
        .next()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| UnitError::InvalidValue(text.to_string()))?;
    let secondary = fields
        .next()
        .ok_or_else(|| UnitError::InvalidValue(text.to_string()))?;

    Ok((EngineeringValue::parse(primary)?, EngineeringValue::parse(secondary)?))
}
