use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Free-form metadata attached to entries, beneficiaries, and decisions.
///
/// Ordered so that hash material is reproducible across serialization round-trips.
pub type Metadata = BTreeMap<String, String>;

/// Minor units per fund unit.
pub const MINOR_PER_UNIT: u64 = 100;

/// Basis points representing 100%.
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Fixed-point fund amount counted in minor units (hundredths of a unit).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(pub u64);

impl Amount {
    pub const fn zero() -> Self {
        Self(0)
    }

    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    /// Whole fund units, e.g. `Amount::from_units(700)` is `700.00`.
    pub const fn from_units(units: u64) -> Self {
        Self(units * MINOR_PER_UNIT)
    }

    pub const fn minor(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }

    /// Apply a fraction, flooring to the nearest minor unit.
    pub fn apply_bps(self, fraction: BasisPoints) -> Amount {
        let scaled = u128::from(self.0) * u128::from(fraction.0) / u128::from(BPS_DENOMINATOR);
        Amount(scaled as u64)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:02}",
            self.0 / MINOR_PER_UNIT,
            self.0 % MINOR_PER_UNIT
        )
    }
}

/// Error returned when an amount string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid amount '{0}': expected units with at most two decimal places")]
pub struct ParseAmountError(pub String);

impl FromStr for Amount {
    type Err = ParseAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseAmountError(s.to_string());
        let trimmed = s.trim().replace('_', "");
        let (units, fraction) = match trimmed.split_once('.') {
            Some((units, fraction)) => (units, fraction),
            None => (trimmed.as_str(), ""),
        };

        if units.is_empty() || fraction.len() > 2 {
            return Err(invalid());
        }
        if !units.bytes().all(|b| b.is_ascii_digit())
            || !fraction.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        let units: u64 = units.parse().map_err(|_| invalid())?;
        let cents: u64 = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<u64>().map_err(|_| invalid())? * 10,
            _ => fraction.parse().map_err(|_| invalid())?,
        };

        units
            .checked_mul(MINOR_PER_UNIT)
            .and_then(|minor| minor.checked_add(cents))
            .map(Amount)
            .ok_or_else(invalid)
    }
}

/// A fraction expressed in basis points (1/10,000).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BasisPoints(pub u32);

impl BasisPoints {
    pub const fn new(bps: u32) -> Self {
        Self(bps)
    }

    pub const fn percent(percent: u32) -> Self {
        Self(percent * 100)
    }

    pub const fn full() -> Self {
        Self(BPS_DENOMINATOR)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for BasisPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}

/// Beneficiary classification by legal shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BeneficiaryKind {
    #[default]
    Individual,
    Organization,
    Emergency,
}

/// Priority tier. Declaration order is payout order: urgent is served first.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Urgent,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Urgent => "urgent",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Priority::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown priority '{s}'"))
    }
}

/// Spending category used by the allocation table.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Emergency,
    Bills,
    Utilities,
    Education,
    #[default]
    General,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Emergency,
        Category::Bills,
        Category::Utilities,
        Category::Education,
        Category::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Emergency => "emergency",
            Category::Bills => "bills",
            Category::Utilities => "utilities",
            Category::Education => "education",
            Category::General => "general",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown category '{s}'"))
    }
}

impl FromStr for BeneficiaryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "individual" => Ok(BeneficiaryKind::Individual),
            "organization" => Ok(BeneficiaryKind::Organization),
            "emergency" => Ok(BeneficiaryKind::Emergency),
            other => Err(format!("unknown beneficiary kind '{other}'")),
        }
    }
}
