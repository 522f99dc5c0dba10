use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, cents_to_units, format_cents, round_cents};

pub type LoanId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Active,
    /// Registered without a rate quote yet; excluded from schedules and
    /// bill projections until configured
    PendingConfig,
    PaidOff,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Active => "active",
            LoanStatus::PendingConfig => "pending_config",
            LoanStatus::PaidOff => "paid_off",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(LoanStatus::Active),
            "pending_config" => Some(LoanStatus::PendingConfig),
            "paid_off" => Some(LoanStatus::PaidOff),
            _ => None,
        }
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A fixed-installment (French/Price) loan. Terms are immutable after
/// registration; only `installments_paid` and `status` move, and only through
/// the reconciliation flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanContract {
    pub id: LoanId,
    pub name: String,
    pub principal_cents: Cents,
    pub installment_cents: Cents,
    pub monthly_rate_percent: f64,
    pub term_months: u32,
    /// First installment falls due on this date's day-of-month
    pub start_date: NaiveDate,
    pub installments_paid: u32,
    pub status: LoanStatus,
    pub created_at: DateTime<Utc>,
}

impl LoanContract {
    pub fn new(
        name: String,
        principal_cents: Cents,
        monthly_rate_percent: f64,
        term_months: u32,
        start_date: NaiveDate,
    ) -> Self {
        assert!(principal_cents > 0, "loan principal must be positive");
        assert!(term_months > 0, "loan term must be at least one month");
        assert!(monthly_rate_percent >= 0.0, "monthly rate cannot be negative");

        Self {
            id: Uuid::new_v4(),
            name,
            principal_cents,
            installment_cents: price_installment(principal_cents, monthly_rate_percent, term_months),
            monthly_rate_percent,
            term_months,
            start_date,
            installments_paid: 0,
            status: LoanStatus::Active,
            created_at: Utc::now(),
        }
    }

    /// Register a contract whose rate quote is not known yet. It carries no
    /// installment and stays out of schedules and projections until
    /// [`configure`](Self::configure) completes it.
    pub fn pending(
        name: String,
        principal_cents: Cents,
        term_months: u32,
        start_date: NaiveDate,
    ) -> Self {
        assert!(principal_cents > 0, "loan principal must be positive");
        assert!(term_months > 0, "loan term must be at least one month");

        Self {
            id: Uuid::new_v4(),
            name,
            principal_cents,
            installment_cents: 0,
            monthly_rate_percent: 0.0,
            term_months,
            start_date,
            installments_paid: 0,
            status: LoanStatus::PendingConfig,
            created_at: Utc::now(),
        }
    }

    /// Override the derived installment with the bank's contractual figure
    /// (their rounding sometimes differs by a cent).
    pub fn with_installment(mut self, installment_cents: Cents) -> Self {
        assert!(installment_cents > 0, "loan installment must be positive");
        self.installment_cents = installment_cents;
        self
    }

    /// Complete a pending contract with its rate quote. Without an explicit
    /// installment the Price formula derives it.
    pub fn configure(&mut self, monthly_rate_percent: f64, installment_cents: Option<Cents>) {
        assert!(monthly_rate_percent >= 0.0, "monthly rate cannot be negative");
        self.monthly_rate_percent = monthly_rate_percent;
        self.installment_cents = installment_cents.unwrap_or_else(|| {
            price_installment(self.principal_cents, monthly_rate_percent, self.term_months)
        });
        if self.status == LoanStatus::PendingConfig {
            self.status = LoanStatus::Active;
        }
    }

    /// Advance the reconciliation counter; reaching the full term pays the
    /// contract off.
    pub fn record_payment(&mut self) {
        self.installments_paid = (self.installments_paid + 1).min(self.term_months);
        if self.installments_paid >= self.term_months {
            self.status = LoanStatus::PaidOff;
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == LoanStatus::Active
    }

    pub fn is_configured(&self) -> bool {
        self.status != LoanStatus::PendingConfig
    }

    pub fn remaining_term(&self) -> u32 {
        self.term_months.saturating_sub(self.installments_paid)
    }
}

/// One row of an amortization schedule: the split of installment `number`
/// into interest and principal, and the balance left after paying it.
/// Always derived from the contract, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScheduleEntry {
    pub number: u32,
    pub interest_cents: Cents,
    pub principal_cents: Cents,
    pub balance_cents: Cents,
}

/// Fixed installment for a Price loan: `P·r·(1+r)^n / ((1+r)^n − 1)`,
/// rounded to cents. A zero rate degenerates to straight division.
pub fn price_installment(principal_cents: Cents, monthly_rate_percent: f64, term_months: u32) -> Cents {
    assert!(term_months > 0, "term must be at least one month");

    let principal = cents_to_units(principal_cents);
    if monthly_rate_percent == 0.0 {
        return round_cents(principal / term_months as f64);
    }

    let r = monthly_rate_percent / 100.0;
    let growth = (1.0 + r).powi(term_months as i32);
    round_cents(principal * r * growth / (growth - 1.0))
}

/// Full amortization table in integer cents. Interest is rounded per period
/// (`round(balance·r)`), the principal portion is the remainder of the fixed
/// installment, and the last period's principal absorbs the accumulated
/// rounding residual so the final balance is exactly zero.
pub fn generate_schedule(loan: &LoanContract) -> Vec<ScheduleEntry> {
    let r = loan.monthly_rate_percent / 100.0;
    let mut balance = loan.principal_cents;
    let mut entries = Vec::with_capacity(loan.term_months as usize);

    for number in 1..=loan.term_months {
        let interest = if r == 0.0 {
            0
        } else {
            (balance as f64 * r).round() as Cents
        };
        let principal = if number == loan.term_months {
            balance
        } else {
            loan.installment_cents - interest
        };
        balance -= principal;

        entries.push(ScheduleEntry {
            number,
            interest_cents: interest,
            principal_cents: principal,
            balance_cents: balance,
        });
    }

    entries
}

/// Outstanding balance after `installments_paid` payments: the schedule
/// balance at that row, `P` before the first payment, zero at or past term.
pub fn remaining_principal(loan: &LoanContract, installments_paid: u32) -> Cents {
    if installments_paid == 0 {
        return loan.principal_cents;
    }
    if installments_paid >= loan.term_months {
        return 0;
    }
    generate_schedule(loan)
        .get(installments_paid as usize - 1)
        .map(|entry| entry.balance_cents)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateSolveError {
    /// The installment does not even cover straight-line principal
    /// repayment, so no non-negative rate can produce it.
    PaymentTooLow { payment_cents: Cents, floor_cents: Cents },
    /// No rate at or below 100% per month produces an installment this
    /// large; the input is almost certainly mistyped.
    RateAboveCeiling { payment_cents: Cents },
}

impl std::fmt::Display for RateSolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateSolveError::PaymentTooLow { payment_cents, floor_cents } => write!(
                f,
                "installment {} cannot amortize the principal: it must exceed {} per month",
                format_cents(*payment_cents),
                format_cents(*floor_cents)
            ),
            RateSolveError::RateAboveCeiling { payment_cents } => write!(
                f,
                "no monthly rate at or below 100% yields an installment of {}",
                format_cents(*payment_cents)
            ),
        }
    }
}

impl std::error::Error for RateSolveError {}

/// Invert the Price formula: find the monthly rate (as a percentage) whose
/// fixed installment over `periods` months equals `payment_cents`.
///
/// The installment is strictly increasing in the rate, so the root is
/// bracketed by doubling an upper bound from 0.01%/month (capped at
/// 100%/month) and narrowed by bisection until the bracket is tighter than
/// 1e-9 as a rate fraction, or 96 halvings, whichever comes first.
pub fn solve_monthly_rate(
    principal_cents: Cents,
    payment_cents: Cents,
    periods: u32,
) -> Result<f64, RateSolveError> {
    assert!(principal_cents > 0, "principal must be positive");
    assert!(periods > 0, "periods must be at least one");

    let principal = cents_to_units(principal_cents);
    let payment = cents_to_units(payment_cents);

    // f(0) = P/n: anything at or below that floor has no positive-rate root.
    let floor = principal / periods as f64;
    if payment <= floor {
        return Err(RateSolveError::PaymentTooLow {
            payment_cents,
            floor_cents: round_cents(floor),
        });
    }

    let installment_at = |rate: f64| -> f64 {
        let growth = (1.0 + rate).powi(periods as i32);
        principal * rate * growth / (growth - 1.0)
    };

    let mut lower = 0.0_f64;
    let mut upper = 0.0001_f64;
    loop {
        if installment_at(upper) >= payment {
            break;
        }
        if upper >= 1.0 {
            return Err(RateSolveError::RateAboveCeiling { payment_cents });
        }
        lower = upper;
        upper = (upper * 2.0).min(1.0);
    }

    for _ in 0..96 {
        if upper - lower < 1e-9 {
            break;
        }
        let mid = (lower + upper) / 2.0;
        if installment_at(mid) < payment {
            lower = mid;
        } else {
            upper = mid;
        }
    }

    Ok((lower + upper) / 2.0 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample_loan() -> LoanContract {
        // 10_000.00 at 2%/month over 12 months
        LoanContract::new("car".into(), 1_000_000, 2.0, 12, date(2024, 1, 5))
    }

    #[test]
    fn test_price_installment_worked_example() {
        assert_eq!(price_installment(1_000_000, 2.0, 12), 94_560);
    }

    #[test]
    fn test_schedule_first_row_split() {
        let schedule = generate_schedule(&sample_loan());

        let first = schedule[0];
        assert_eq!(first.interest_cents, 20_000);
        assert_eq!(first.principal_cents, 74_560);
        assert_eq!(first.balance_cents, 925_440);
    }

    #[test]
    fn test_schedule_principal_sums_to_loan_and_ends_at_zero() {
        let loan = sample_loan();
        let schedule = generate_schedule(&loan);

        assert_eq!(schedule.len(), 12);
        let total_principal: Cents = schedule.iter().map(|e| e.principal_cents).sum();
        assert_eq!(total_principal, loan.principal_cents);
        assert_eq!(schedule.last().map(|e| e.balance_cents), Some(0));
    }

    #[test]
    fn test_zero_rate_schedule_has_no_interest() {
        let loan = LoanContract::new("interest-free".into(), 100_000, 0.0, 3, date(2024, 3, 1));
        let schedule = generate_schedule(&loan);

        assert!(schedule.iter().all(|e| e.interest_cents == 0));
        assert_eq!(schedule[0].principal_cents, 33_333);
        assert_eq!(schedule[1].principal_cents, 33_333);
        // final period absorbs the rounding residual
        assert_eq!(schedule[2].principal_cents, 33_334);
        assert_eq!(schedule[2].balance_cents, 0);
    }

    #[test]
    fn test_remaining_principal_tracks_schedule() {
        let loan = sample_loan();
        let schedule = generate_schedule(&loan);

        assert_eq!(remaining_principal(&loan, 0), 1_000_000);
        assert_eq!(remaining_principal(&loan, 1), schedule[0].balance_cents);
        assert_eq!(remaining_principal(&loan, 6), schedule[5].balance_cents);
        assert_eq!(remaining_principal(&loan, 12), 0);
        assert_eq!(remaining_principal(&loan, 40), 0);
    }

    #[test]
    fn test_solve_rate_worked_example() {
        let rate = solve_monthly_rate(1_000_000, 94_560, 12).unwrap();
        assert!((rate - 2.0).abs() < 0.001, "solved {rate}");
    }

    #[test]
    fn test_solve_rate_round_trips_price_installment() {
        for rate_percent in [0.35, 1.0, 2.0, 4.75] {
            let installment = price_installment(5_000_000, rate_percent, 48);
            let solved = solve_monthly_rate(5_000_000, installment, 48).unwrap();
            // cent rounding of the installment bounds how close we can get
            assert!(
                (solved - rate_percent).abs() < 0.005,
                "rate {rate_percent} solved as {solved}"
            );
        }
    }

    #[test]
    fn test_solve_rate_rejects_payment_below_floor() {
        // 10_000.00 over 12 months needs more than 833.33/month
        let err = solve_monthly_rate(1_000_000, 83_333, 12).unwrap_err();
        assert_eq!(
            err,
            RateSolveError::PaymentTooLow { payment_cents: 83_333, floor_cents: 83_333 }
        );
    }

    #[test]
    fn test_solve_rate_rejects_absurd_payment() {
        // more than double the principal every month
        let err = solve_monthly_rate(1_000_000, 2_100_000, 12).unwrap_err();
        assert_eq!(err, RateSolveError::RateAboveCeiling { payment_cents: 2_100_000 });
    }

    #[test]
    fn test_record_payment_pays_off_at_term() {
        let mut loan = LoanContract::new("short".into(), 30_000, 1.0, 2, date(2024, 1, 10));

        loan.record_payment();
        assert_eq!(loan.installments_paid, 1);
        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(loan.remaining_term(), 1);

        loan.record_payment();
        assert_eq!(loan.installments_paid, 2);
        assert_eq!(loan.status, LoanStatus::PaidOff);

        // counter never overshoots the term
        loan.record_payment();
        assert_eq!(loan.installments_paid, 2);
    }

    #[test]
    fn test_pending_contract_configures_to_active() {
        let mut loan = LoanContract::pending("house".into(), 20_000_000, 240, date(2024, 6, 15));
        assert!(!loan.is_configured());
        assert_eq!(loan.installment_cents, 0);

        loan.configure(0.8, None);
        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(
            loan.installment_cents,
            price_installment(20_000_000, 0.8, 240)
        );
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [LoanStatus::Active, LoanStatus::PendingConfig, LoanStatus::PaidOff] {
            assert_eq!(LoanStatus::from_str(status.as_str()), Some(status));
        }
    }
}
