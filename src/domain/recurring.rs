use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, LoanContract, Month};

pub type InsurancePolicyId = Uuid;
pub type FixedExpenseTemplateId = Uuid;
pub type TrackedBillId = Uuid;

/// An insurance contract paid as a fixed monthly premium over a closed term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsurancePolicy {
    pub id: InsurancePolicyId,
    pub name: String,
    pub premium_cents: Cents,
    pub term_months: u32,
    /// First premium falls due on this date's day-of-month
    pub start_date: NaiveDate,
    pub installments_paid: u32,
    pub created_at: DateTime<Utc>,
}

impl InsurancePolicy {
    pub fn new(
        name: String,
        premium_cents: Cents,
        term_months: u32,
        start_date: NaiveDate,
    ) -> Self {
        assert!(premium_cents > 0, "premium must be positive");
        assert!(term_months > 0, "policy term must be at least one month");
        Self {
            id: Uuid::new_v4(),
            name,
            premium_cents,
            term_months,
            start_date,
            installments_paid: 0,
            created_at: Utc::now(),
        }
    }

    pub fn record_payment(&mut self) {
        self.installments_paid = (self.installments_paid + 1).min(self.term_months);
    }
}

/// An open-ended recurring expense (rent, tuition, subscription) due every
/// month on the start date's day until an optional end date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedExpenseTemplate {
    pub id: FixedExpenseTemplateId,
    pub name: String,
    pub amount_cents: Cents,
    /// The day-of-month of this date is the due day
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl FixedExpenseTemplate {
    pub fn new(name: String, amount_cents: Cents, start_date: NaiveDate) -> Self {
        assert!(amount_cents > 0, "expense amount must be positive");
        Self {
            id: Uuid::new_v4(),
            name,
            amount_cents,
            start_date,
            end_date: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_end_date(mut self, end_date: NaiveDate) -> Self {
        assert!(end_date >= self.start_date, "end date cannot precede start date");
        self.end_date = Some(end_date);
        self
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillSourceKind {
    Loan,
    Insurance,
    FixedExpense,
    /// Hand-entered one-off bill, not backed by any contract
    Manual,
}

impl BillSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillSourceKind::Loan => "loan",
            BillSourceKind::Insurance => "insurance",
            BillSourceKind::FixedExpense => "fixed_expense",
            BillSourceKind::Manual => "manual",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "loan" => Some(BillSourceKind::Loan),
            "insurance" => Some(BillSourceKind::Insurance),
            "fixed_expense" => Some(BillSourceKind::FixedExpense),
            "manual" => Some(BillSourceKind::Manual),
            _ => None,
        }
    }
}

impl std::fmt::Display for BillSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Natural key of one due instance: which contract, which installment. Two
/// sources of different kinds can share a `source_id` without colliding, and
/// the same installment never materializes twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BillKey {
    pub kind: BillSourceKind,
    pub source_id: Uuid,
    pub installment: u32,
}

impl BillKey {
    pub fn new(kind: BillSourceKind, source_id: Uuid, installment: u32) -> Self {
        Self { kind, source_id, installment }
    }
}

impl std::fmt::Display for BillKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.source_id, self.installment)
    }
}

/// A persisted due instance. Created when the user includes a projection (or
/// enters a manual bill), deleted on exclusion; `is_paid` is set by the
/// reconciliation flow, never by the projector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedBill {
    pub id: TrackedBillId,
    pub description: String,
    pub due_date: NaiveDate,
    pub amount_cents: Cents,
    pub key: BillKey,
    pub is_paid: bool,
    pub is_included: bool,
    pub created_at: DateTime<Utc>,
}

impl TrackedBill {
    pub fn from_potential(bill: &PotentialBill) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: bill.description.clone(),
            due_date: bill.due_date,
            amount_cents: bill.amount_cents,
            key: bill.key,
            is_paid: false,
            is_included: true,
            created_at: Utc::now(),
        }
    }

    /// A hand-entered bill with no backing contract; it gets a fresh id as
    /// its key's source so it can never collide with a projection.
    pub fn manual(description: String, due_date: NaiveDate, amount_cents: Cents) -> Self {
        assert!(amount_cents > 0, "bill amount must be positive");
        Self {
            id: Uuid::new_v4(),
            description,
            due_date,
            amount_cents,
            key: BillKey::new(BillSourceKind::Manual, Uuid::new_v4(), 1),
            is_paid: false,
            is_included: true,
            created_at: Utc::now(),
        }
    }

    pub fn mark_paid(&mut self) {
        self.is_paid = true;
    }
}

/// A projected due instance, computed fresh on every query and never
/// persisted. Including one materializes a [`TrackedBill`] with the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PotentialBill {
    pub description: String,
    pub due_date: NaiveDate,
    pub amount_cents: Cents,
    pub key: BillKey,
    pub is_paid: bool,
    pub is_included: bool,
}

/// Everything that generates recurring due instances. A closed set: adding a
/// source kind is a compile-checked change in every `match` below.
#[derive(Debug, Clone)]
pub enum RecurringSource {
    Loan(LoanContract),
    Insurance(InsurancePolicy),
    FixedExpense(FixedExpenseTemplate),
}

impl RecurringSource {
    pub fn kind(&self) -> BillSourceKind {
        match self {
            RecurringSource::Loan(_) => BillSourceKind::Loan,
            RecurringSource::Insurance(_) => BillSourceKind::Insurance,
            RecurringSource::FixedExpense(_) => BillSourceKind::FixedExpense,
        }
    }

    pub fn source_id(&self) -> Uuid {
        match self {
            RecurringSource::Loan(loan) => loan.id,
            RecurringSource::Insurance(policy) => policy.id,
            RecurringSource::FixedExpense(template) => template.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            RecurringSource::Loan(loan) => &loan.name,
            RecurringSource::Insurance(policy) => &policy.name,
            RecurringSource::FixedExpense(template) => &template.name,
        }
    }

    pub fn start_date(&self) -> NaiveDate {
        match self {
            RecurringSource::Loan(loan) => loan.start_date,
            RecurringSource::Insurance(policy) => policy.start_date,
            RecurringSource::FixedExpense(template) => template.start_date,
        }
    }

    /// None for open-ended templates
    pub fn term(&self) -> Option<u32> {
        match self {
            RecurringSource::Loan(loan) => Some(loan.term_months),
            RecurringSource::Insurance(policy) => Some(policy.term_months),
            RecurringSource::FixedExpense(_) => None,
        }
    }

    /// Contract counter; templates have none and rely on tracked rows.
    pub fn installments_paid(&self) -> u32 {
        match self {
            RecurringSource::Loan(loan) => loan.installments_paid,
            RecurringSource::Insurance(policy) => policy.installments_paid,
            RecurringSource::FixedExpense(_) => 0,
        }
    }

    pub fn amount_at(&self, _installment: u32) -> Cents {
        match self {
            RecurringSource::Loan(loan) => loan.installment_cents,
            RecurringSource::Insurance(policy) => policy.premium_cents,
            RecurringSource::FixedExpense(template) => template.amount_cents,
        }
    }

    /// Whether this source currently generates projections at all.
    pub fn projects(&self) -> bool {
        match self {
            RecurringSource::Loan(loan) => loan.is_active(),
            RecurringSource::Insurance(_) => true,
            RecurringSource::FixedExpense(template) => template.active,
        }
    }

    /// Due date of installment `k`: the start day clamped into the k-th
    /// month of the contract.
    pub fn due_date(&self, installment: u32) -> NaiveDate {
        assert!(installment >= 1, "installments are numbered from 1");
        let start = self.start_date();
        Month::containing(start)
            .add_months(installment as i32 - 1)
            .day_clamped(start.day())
    }

    pub fn key_for(&self, installment: u32) -> BillKey {
        BillKey::new(self.kind(), self.source_id(), installment)
    }

    /// Materialize installment `k` as a projected bill, or `None` when the
    /// source has no k-th installment.
    pub fn bill_at(&self, installment: u32) -> Option<PotentialBill> {
        self.installment_exists(installment)
            .then(|| self.project(installment))
    }

    fn installment_exists(&self, installment: u32) -> bool {
        if installment < 1 {
            return false;
        }
        match self {
            RecurringSource::Loan(loan) => installment <= loan.term_months,
            RecurringSource::Insurance(policy) => installment <= policy.term_months,
            RecurringSource::FixedExpense(template) => template
                .end_date
                .map(|end| self.due_date(installment) <= end)
                .unwrap_or(true),
        }
    }

    /// Position of this source's installment inside `month`, if one exists.
    pub fn installment_in(&self, month: Month) -> Option<u32> {
        let offset = month.months_since(Month::containing(self.start_date()));
        if offset < 0 {
            return None;
        }
        let installment = offset as u32 + 1;
        self.installment_exists(installment).then_some(installment)
    }

    fn bill_description(&self, installment: u32) -> String {
        match self.term() {
            Some(term) => format!("{} ({}/{})", self.name(), installment, term),
            None => self.name().to_string(),
        }
    }

    fn project(&self, installment: u32) -> PotentialBill {
        PotentialBill {
            description: self.bill_description(installment),
            due_date: self.due_date(installment),
            amount_cents: self.amount_at(installment),
            key: self.key_for(installment),
            is_paid: false,
            is_included: false,
        }
    }
}

/// A tracked row surfaces wholesale: its description, amount and flags win
/// over whatever the source would project today.
pub fn surface_tracked(tracked: &TrackedBill) -> PotentialBill {
    PotentialBill {
        description: tracked.description.clone(),
        due_date: tracked.due_date,
        amount_cents: tracked.amount_cents,
        key: tracked.key,
        is_paid: tracked.is_paid,
        is_included: tracked.is_included,
    }
}

/// Every source's due instance positioned in `month` that the contract
/// counter still counts as unpaid. Keys already tracked surface the tracked
/// row (its amount and flags); untracked ones project with both flags false.
pub fn potential_bills(
    month: Month,
    sources: &[RecurringSource],
    tracked: &[TrackedBill],
) -> Vec<PotentialBill> {
    let by_key: HashMap<BillKey, &TrackedBill> = tracked.iter().map(|t| (t.key, t)).collect();

    let mut bills = Vec::new();
    for source in sources {
        if !source.projects() {
            continue;
        }
        let Some(installment) = source.installment_in(month) else {
            continue;
        };
        if installment <= source.installments_paid() {
            continue;
        }
        let bill = match by_key.get(&source.key_for(installment)) {
            Some(row) => surface_tracked(row),
            None => source.project(installment),
        };
        bills.push(bill);
    }

    bills.sort_by(|a, b| (a.due_date, &a.description).cmp(&(b.due_date, &b.description)));
    bills
}

/// The first unpaid, untracked due instance per source falling strictly
/// after `month`. Tracked keys are skipped (they were already advanced into
/// an earlier view), so the union with [`potential_bills`] for the same
/// month never repeats a key.
pub fn future_bills(
    month: Month,
    sources: &[RecurringSource],
    tracked: &[TrackedBill],
) -> Vec<PotentialBill> {
    let tracked_keys: HashSet<BillKey> = tracked.iter().map(|t| t.key).collect();
    let month_end = month.last_day();

    let mut bills = Vec::new();
    for source in sources {
        if !source.projects() {
            continue;
        }
        let mut installment = source.installments_paid() + 1;
        while source.installment_exists(installment) {
            if source.due_date(installment) > month_end {
                if !tracked_keys.contains(&source.key_for(installment)) {
                    bills.push(source.project(installment));
                    break;
                }
                // already materialized somewhere; offer the next one
            }
            installment += 1;
        }
    }

    bills.sort_by(|a, b| (a.due_date, &a.description).cmp(&(b.due_date, &b.description)));
    bills
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn car_loan() -> LoanContract {
        LoanContract::new("car".into(), 1_000_000, 2.0, 12, date(2024, 1, 5))
    }

    #[test]
    fn test_loan_installment_positions_in_month() {
        let sources = vec![RecurringSource::Loan(car_loan())];

        let march = potential_bills(Month::new(2024, 3), &sources, &[]);
        assert_eq!(march.len(), 1);
        assert_eq!(march[0].due_date, date(2024, 3, 5));
        assert_eq!(march[0].key.installment, 3);
        assert_eq!(march[0].amount_cents, 94_560);
        assert_eq!(march[0].description, "car (3/12)");
        assert!(!march[0].is_paid);
        assert!(!march[0].is_included);
    }

    #[test]
    fn test_projection_respects_term_bounds() {
        let sources = vec![RecurringSource::Loan(car_loan())];

        // before the first installment and past the last one
        assert!(potential_bills(Month::new(2023, 12), &sources, &[]).is_empty());
        assert!(potential_bills(Month::new(2025, 1), &sources, &[]).is_empty());
        // the last one still projects
        assert_eq!(potential_bills(Month::new(2024, 12), &sources, &[]).len(), 1);
    }

    #[test]
    fn test_projection_skips_installments_the_counter_covers() {
        let mut loan = car_loan();
        loan.record_payment();
        loan.record_payment();
        loan.record_payment();
        let sources = vec![RecurringSource::Loan(loan)];

        assert!(potential_bills(Month::new(2024, 3), &sources, &[]).is_empty());
        let april = potential_bills(Month::new(2024, 4), &sources, &[]);
        assert_eq!(april.len(), 1);
        assert_eq!(april[0].key.installment, 4);
    }

    #[test]
    fn test_pending_and_paid_off_loans_do_not_project() {
        let pending = LoanContract::pending("new house".into(), 20_000_000, 240, date(2024, 1, 10));
        let mut done = LoanContract::new("old tv".into(), 50_000, 1.0, 2, date(2024, 1, 20));
        done.record_payment();
        done.record_payment();
        let sources = vec![RecurringSource::Loan(pending), RecurringSource::Loan(done)];

        assert!(potential_bills(Month::new(2024, 2), &sources, &[]).is_empty());
        assert!(future_bills(Month::new(2024, 1), &sources, &[]).is_empty());
    }

    #[test]
    fn test_due_day_clamps_into_short_months() {
        let template = FixedExpenseTemplate::new("rent".into(), 120_000, date(2024, 1, 31));
        let sources = vec![RecurringSource::FixedExpense(template)];

        let feb = potential_bills(Month::new(2024, 2), &sources, &[]);
        assert_eq!(feb[0].due_date, date(2024, 2, 29));
        let april = potential_bills(Month::new(2024, 4), &sources, &[]);
        assert_eq!(april[0].due_date, date(2024, 4, 30));
        // months long enough go back to the real day
        let march = potential_bills(Month::new(2024, 3), &sources, &[]);
        assert_eq!(march[0].due_date, date(2024, 3, 31));
    }

    #[test]
    fn test_template_respects_end_date_and_active_flag() {
        let mut template = FixedExpenseTemplate::new("gym".into(), 8_000, date(2024, 1, 10))
            .with_end_date(date(2024, 3, 31));
        let sources = vec![RecurringSource::FixedExpense(template.clone())];

        assert_eq!(potential_bills(Month::new(2024, 3), &sources, &[]).len(), 1);
        assert!(potential_bills(Month::new(2024, 4), &sources, &[]).is_empty());

        template.set_active(false);
        let sources = vec![RecurringSource::FixedExpense(template)];
        assert!(potential_bills(Month::new(2024, 2), &sources, &[]).is_empty());
    }

    #[test]
    fn test_tracked_row_state_surfaces_in_projection() {
        let loan = car_loan();
        let sources = vec![RecurringSource::Loan(loan.clone())];

        let march = potential_bills(Month::new(2024, 3), &sources, &[]);
        let mut row = TrackedBill::from_potential(&march[0]);
        row.mark_paid();

        let tracked = vec![row];
        let march_again = potential_bills(Month::new(2024, 3), &sources, &tracked);
        assert_eq!(march_again.len(), 1);
        assert!(march_again[0].is_included);
        assert!(march_again[0].is_paid);
        assert_eq!(march_again[0].key, BillKey::new(BillSourceKind::Loan, loan.id, 3));
    }

    #[test]
    fn test_future_bills_offer_first_untracked_unpaid() {
        let mut loan = car_loan();
        loan.record_payment();
        loan.record_payment();
        let sources = vec![RecurringSource::Loan(loan)];

        // viewed from February, installment 3 (due March 5) is next
        let future = future_bills(Month::new(2024, 2), &sources, &[]);
        assert_eq!(future.len(), 1);
        assert_eq!(future[0].key.installment, 3);
        assert_eq!(future[0].due_date, date(2024, 3, 5));

        // advancing it into February moves the offer to installment 4
        let tracked = vec![TrackedBill::from_potential(&future[0])];
        let future_after = future_bills(Month::new(2024, 2), &sources, &tracked);
        assert_eq!(future_after.len(), 1);
        assert_eq!(future_after[0].key.installment, 4);
    }

    #[test]
    fn test_projection_union_never_repeats_a_key() {
        let loan = car_loan();
        let policy = InsurancePolicy::new("health".into(), 45_000, 24, date(2024, 1, 12));
        let template = FixedExpenseTemplate::new("rent".into(), 120_000, date(2023, 6, 1));
        let sources = vec![
            RecurringSource::Loan(loan),
            RecurringSource::Insurance(policy),
            RecurringSource::FixedExpense(template),
        ];

        let month = Month::new(2024, 3);
        let current = potential_bills(month, &sources, &[]);
        let future = future_bills(month, &sources, &[]);

        let mut seen = HashSet::new();
        for bill in current.iter().chain(future.iter()) {
            assert!(seen.insert(bill.key), "key {} appeared twice", bill.key);
        }
        assert_eq!(current.len(), 3);
        assert_eq!(future.len(), 3);
    }

    #[test]
    fn test_manual_bills_never_collide() {
        let first = TrackedBill::manual("plumber".into(), date(2024, 3, 14), 18_000);
        let second = TrackedBill::manual("plumber".into(), date(2024, 3, 14), 18_000);
        assert_ne!(first.key, second.key);
        assert_eq!(first.key.kind, BillSourceKind::Manual);
    }

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            BillSourceKind::Loan,
            BillSourceKind::Insurance,
            BillSourceKind::FixedExpense,
            BillSourceKind::Manual,
        ] {
            assert_eq!(BillSourceKind::from_str(kind.as_str()), Some(kind));
        }
    }
}
