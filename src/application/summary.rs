use chrono::NaiveDate;
use serde::Serialize;

use crate::domain::{Cents, IndicatorStatus, PotentialBill};

#[derive(Debug, Clone, Serialize)]
pub struct NetWorthReport {
    pub as_of: NaiveDate,
    pub total_assets: Cents,
    pub total_liabilities: Cents,
    pub net_worth: Cents,
    pub assets: Vec<AssetLine>,
    pub liabilities: Vec<LiabilityLine>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetLine {
    pub name: String,
    pub kind: String,
    pub value: Cents,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiabilityLine {
    pub name: String,
    pub kind: String,
    pub amount: Cents,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub as_of: NaiveDate,
    pub window_from: NaiveDate,
    pub window_to: NaiveDate,
    pub readings: Vec<IndicatorReading>,
    pub overall: IndicatorStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndicatorReading {
    pub name: String,
    pub value: f64,
    pub status: IndicatorStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct BillsView {
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub bills: Vec<PotentialBill>,
    pub future: Vec<PotentialBill>,
    pub total_due: Cents,
    pub total_included: Cents,
}
