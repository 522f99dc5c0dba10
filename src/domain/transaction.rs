use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, Cents};

pub type TransactionId = Uuid;
pub type TransferGroupId = Uuid;

/// What kind of operation a ledger entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Income,
    Expense,
    /// Moving money into an investment position
    Investment,
    /// Moving money out of an investment position
    Redemption,
    LoanPayment,
    /// Interest/dividends credited to the account
    Yield,
    Transfer,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Income => "income",
            OperationKind::Expense => "expense",
            OperationKind::Investment => "investment",
            OperationKind::Redemption => "redemption",
            OperationKind::LoanPayment => "loan-payment",
            OperationKind::Yield => "yield",
            OperationKind::Transfer => "transfer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "income" => Some(OperationKind::Income),
            "expense" => Some(OperationKind::Expense),
            "investment" => Some(OperationKind::Investment),
            "redemption" => Some(OperationKind::Redemption),
            "loan-payment" => Some(OperationKind::LoanPayment),
            "yield" => Some(OperationKind::Yield),
            "transfer" => Some(OperationKind::Transfer),
            _ => None,
        }
    }

    /// Earned money, counted by the savings-margin window. Transfers,
    /// investments and redemptions are internal movements and count as
    /// neither income nor spending.
    pub fn is_income_like(&self) -> bool {
        matches!(self, OperationKind::Income | OperationKind::Yield)
    }

    /// Spent money, counted by the spending window.
    pub fn is_expense_like(&self) -> bool {
        matches!(self, OperationKind::Expense | OperationKind::LoanPayment)
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The signed direction of a transaction's effect on its account balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    In,
    Out,
    TransferIn,
    TransferOut,
}

impl Flow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flow::In => "in",
            Flow::Out => "out",
            Flow::TransferIn => "transfer_in",
            Flow::TransferOut => "transfer_out",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "in" => Some(Flow::In),
            "out" => Some(Flow::Out),
            "transfer_in" => Some(Flow::TransferIn),
            "transfer_out" => Some(Flow::TransferOut),
            _ => None,
        }
    }

    pub fn is_inflow(&self) -> bool {
        matches!(self, Flow::In | Flow::TransferIn)
    }

    pub fn is_transfer(&self) -> bool {
        matches!(self, Flow::TransferIn | Flow::TransferOut)
    }
}

impl std::fmt::Display for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single ledger entry against one account. Entries are immutable and
/// append-only. Transfers between own accounts always come in pairs created
/// by [`transfer_pair`]; the pair nets to zero across the two accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    /// When the movement happened (day granularity)
    pub date: NaiveDate,
    /// Magnitude in cents, always non-negative; direction comes from `flow`
    pub amount_cents: Cents,
    pub kind: OperationKind,
    pub flow: Flow,
    pub category: Option<String>,
    /// Shared by exactly the two legs of a transfer pair
    pub transfer_group: Option<TransferGroupId>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        account_id: AccountId,
        date: NaiveDate,
        amount_cents: Cents,
        kind: OperationKind,
        flow: Flow,
    ) -> Self {
        assert!(amount_cents >= 0, "transaction magnitude must be non-negative");
        assert_eq!(
            kind == OperationKind::Transfer,
            flow.is_transfer(),
            "transfer kind and transfer flow must agree"
        );
        Self {
            id: Uuid::new_v4(),
            account_id,
            date,
            amount_cents,
            kind,
            flow,
            category: None,
            transfer_group: None,
            description: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The entry's effect on its account balance: positive for inflows,
    /// negative for outflows.
    pub fn signed_cents(&self) -> Cents {
        if self.flow.is_inflow() {
            self.amount_cents
        } else {
            -self.amount_cents
        }
    }
}

/// Build the two legs of a transfer between own accounts: equal magnitude,
/// same date, shared transfer group. This is the only way transfer legs are
/// created, which keeps the pairing invariant by construction.
pub fn transfer_pair(
    from_account: AccountId,
    to_account: AccountId,
    amount_cents: Cents,
    date: NaiveDate,
) -> (Transaction, Transaction) {
    let group = Uuid::new_v4();

    let mut out_leg = Transaction::new(
        from_account,
        date,
        amount_cents,
        OperationKind::Transfer,
        Flow::TransferOut,
    );
    out_leg.transfer_group = Some(group);

    let mut in_leg = Transaction::new(
        to_account,
        date,
        amount_cents,
        OperationKind::Transfer,
        Flow::TransferIn,
    );
    in_leg.transfer_group = Some(group);

    (out_leg, in_leg)
}
