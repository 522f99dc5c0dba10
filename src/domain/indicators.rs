use serde::Serialize;

use super::{Cents, cents_to_units};

/// Which direction of an indicator's value is healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    HigherIsBetter,
    LowerIsBetter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorStatus {
    Good,
    Watch,
    Alert,
}

impl IndicatorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorStatus::Good => "good",
            IndicatorStatus::Watch => "watch",
            IndicatorStatus::Alert => "alert",
        }
    }
}

impl std::fmt::Display for IndicatorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Two cut points and a polarity. For higher-is-better the value must reach
/// `good` (then `watch`) from below; for lower-is-better it must stay at or
/// under them.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub polarity: Polarity,
    pub good: f64,
    pub watch: f64,
}

impl Thresholds {
    pub const fn higher_is_better(good: f64, watch: f64) -> Self {
        Self { polarity: Polarity::HigherIsBetter, good, watch }
    }

    pub const fn lower_is_better(good: f64, watch: f64) -> Self {
        Self { polarity: Polarity::LowerIsBetter, good, watch }
    }

    pub fn classify(&self, value: f64) -> IndicatorStatus {
        match self.polarity {
            Polarity::HigherIsBetter => {
                if value >= self.good {
                    IndicatorStatus::Good
                } else if value >= self.watch {
                    IndicatorStatus::Watch
                } else {
                    IndicatorStatus::Alert
                }
            }
            Polarity::LowerIsBetter => {
                if value <= self.good {
                    IndicatorStatus::Good
                } else if value <= self.watch {
                    IndicatorStatus::Watch
                } else {
                    IndicatorStatus::Alert
                }
            }
        }
    }
}

/// Months of average spending the liquid balances cover.
pub const LIQUIDITY: Thresholds = Thresholds::higher_is_better(6.0, 3.0);
/// Share of total assets owed as debt.
pub const DEBT_RATIO: Thresholds = Thresholds::lower_is_better(0.30, 0.50);
/// Share of income left after spending.
pub const SAVINGS_MARGIN: Thresholds = Thresholds::higher_is_better(0.20, 0.05);

/// Liquid balances over average monthly outflow. Zero outflow means the
/// balances cover any horizon, which reads as infinity.
pub fn liquidity_ratio(liquid_cents: Cents, avg_monthly_outflow_cents: Cents) -> f64 {
    if avg_monthly_outflow_cents <= 0 {
        return f64::INFINITY;
    }
    cents_to_units(liquid_cents) / cents_to_units(avg_monthly_outflow_cents)
}

/// Liabilities over assets. Debt with no assets behind it reads as infinity;
/// no debt and no assets is a clean zero.
pub fn debt_ratio(liabilities_cents: Cents, assets_cents: Cents) -> f64 {
    if assets_cents <= 0 {
        return if liabilities_cents <= 0 { 0.0 } else { f64::INFINITY };
    }
    cents_to_units(liabilities_cents) / cents_to_units(assets_cents)
}

/// Fraction of window income not spent. Spending with no income pins the
/// margin at -1; a window with no flows at all reads zero.
pub fn savings_margin(income_cents: Cents, expense_cents: Cents) -> f64 {
    if income_cents <= 0 {
        return if expense_cents <= 0 { 0.0 } else { -1.0 };
    }
    cents_to_units(income_cents - expense_cents) / cents_to_units(income_cents)
}
