use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Cents;

pub type FixedAssetId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FixedAssetKind {
    Vehicle,
    RealEstate,
}

impl FixedAssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixedAssetKind::Vehicle => "vehicle",
            FixedAssetKind::RealEstate => "real-estate",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "vehicle" => Some(FixedAssetKind::Vehicle),
            "real-estate" => Some(FixedAssetKind::RealEstate),
            _ => None,
        }
    }
}

impl std::fmt::Display for FixedAssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A non-ledger asset (car, apartment) counted in net worth at its most
/// recent appraisal. Only the latest value is kept; there is no price
/// history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedAsset {
    pub id: FixedAssetId,
    pub name: String,
    pub kind: FixedAssetKind,
    /// External reference for market lookups (license plate, registry id)
    pub reference: Option<String>,
    pub current_value_cents: Cents,
    pub valued_at: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl FixedAsset {
    pub fn new(
        name: String,
        kind: FixedAssetKind,
        current_value_cents: Cents,
        valued_at: NaiveDate,
    ) -> Self {
        assert!(current_value_cents >= 0, "asset value cannot be negative");
        Self {
            id: Uuid::new_v4(),
            name,
            kind,
            reference: None,
            current_value_cents,
            valued_at,
            created_at: Utc::now(),
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Replace the appraisal; the previous value is discarded.
    pub fn set_value(&mut self, value_cents: Cents, valued_at: NaiveDate) {
        assert!(value_cents >= 0, "asset value cannot be negative");
        self.current_value_cents = value_cents;
        self.valued_at = valued_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_value_replaces_previous_appraisal() {
        let mut asset = FixedAsset::new(
            "city car".into(),
            FixedAssetKind::Vehicle,
            3_200_000,
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
        );

        asset.set_value(2_950_000, NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());

        assert_eq!(asset.current_value_cents, 2_950_000);
        assert_eq!(asset.valued_at, NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());
    }

    #[test]
    fn test_kind_roundtrip() {
        for kind in [FixedAssetKind::Vehicle, FixedAssetKind::RealEstate] {
            assert_eq!(FixedAssetKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(FixedAssetKind::from_str("REAL-ESTATE"), Some(FixedAssetKind::RealEstate));
        assert_eq!(FixedAssetKind::from_str("boat"), None);
    }
}
