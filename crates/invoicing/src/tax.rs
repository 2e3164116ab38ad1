//! Tax selection: a small closed set of named presets plus one custom slot.
//!
//! The selection is ephemeral caller input at invoice-generation time; once a
//! document is projected, the resolved name/rate are frozen into it.

use serde::{Deserialize, Serialize};

use gearshop_core::{DomainError, DomainResult, ValueObject};

/// A named flat tax rate, stored in basis points (2100 = 21%).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxSelection {
    name: String,
    rate_bps: u32,
}

impl ValueObject for TaxSelection {}

impl TaxSelection {
    /// Standard rate preset: 21%.
    pub fn standard() -> Self {
        Self {
            name: "Standard".to_string(),
            rate_bps: 2_100,
        }
    }

    /// Reduced rate preset: 10.5%.
    pub fn reduced() -> Self {
        Self {
            name: "Reduced".to_string(),
            rate_bps: 1_050,
        }
    }

    /// No-tax preset: 0%.
    pub fn zero() -> Self {
        Self {
            name: "None".to_string(),
            rate_bps: 0,
        }
    }

    /// Custom name + percentage. The percentage must be finite and
    /// non-negative; it is converted to basis points with rounding.
    pub fn custom(name: impl Into<String>, rate_percent: f64) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("tax name must not be empty"));
        }
        if !rate_percent.is_finite() || rate_percent < 0.0 {
            return Err(DomainError::validation("tax rate must be a non-negative number"));
        }
        Ok(Self {
            name,
            rate_bps: (rate_percent * 100.0).round() as u32,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rate_bps(&self) -> u32 {
        self.rate_bps
    }

    /// Rate as a display percentage (e.g. `10.5`).
    pub fn rate_percent(&self) -> f64 {
        f64::from(self.rate_bps) / 100.0
    }
}

impl core::fmt::Display for TaxSelection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} ({}%)", self.name, self.rate_percent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_carry_expected_rates() {
        assert_eq!(TaxSelection::standard().rate_bps(), 2_100);
        assert_eq!(TaxSelection::reduced().rate_bps(), 1_050);
        assert_eq!(TaxSelection::zero().rate_bps(), 0);
    }

    #[test]
    fn custom_converts_percent_to_basis_points() {
        let tax = TaxSelection::custom("Municipal", 3.25).unwrap();
        assert_eq!(tax.name(), "Municipal");
        assert_eq!(tax.rate_bps(), 325);
        assert_eq!(tax.to_string(), "Municipal (3.25%)");
    }

    #[test]
    fn custom_rejects_bad_rates_and_names() {
        assert!(TaxSelection::custom("Negative", -1.0).is_err());
        assert!(TaxSelection::custom("NaN", f64::NAN).is_err());
        assert!(TaxSelection::custom("  ", 5.0).is_err());
    }

    #[test]
    fn zero_rate_custom_is_allowed() {
        let tax = TaxSelection::custom("Exempt", 0.0).unwrap();
        assert_eq!(tax.rate_bps(), 0);
    }
}
