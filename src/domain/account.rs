use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Cents;

pub type AccountId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccountKind {
    /// Day-to-day bank account
    Checking,
    /// Interest-bearing savings account
    Savings,
    /// CDB/treasury-style fixed-income holdings
    FixedIncome,
    /// Emergency reserve
    Reserve,
    /// Earmarked savings goal
    Goal,
    /// Revolving credit-card balance (a debt, not an asset)
    CreditCard,
    /// Crypto holdings at their ledger value
    Crypto,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Checking => "checking",
            AccountKind::Savings => "savings",
            AccountKind::FixedIncome => "fixed-income",
            AccountKind::Reserve => "reserve",
            AccountKind::Goal => "goal",
            AccountKind::CreditCard => "credit-card",
            AccountKind::Crypto => "crypto",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "checking" => Some(AccountKind::Checking),
            "savings" => Some(AccountKind::Savings),
            "fixed-income" => Some(AccountKind::FixedIncome),
            "reserve" => Some(AccountKind::Reserve),
            "goal" => Some(AccountKind::Goal),
            "credit-card" => Some(AccountKind::CreditCard),
            "crypto" => Some(AccountKind::Crypto),
            _ => None,
        }
    }

    /// Counts toward assets in the net-worth aggregate. Credit cards are the
    /// only revolving liability among the account kinds.
    pub fn is_asset_class(&self) -> bool {
        !matches!(self, AccountKind::CreditCard)
    }

    /// Cash or near-cash, usable within days. Feeds the liquidity indicator.
    pub fn is_liquid(&self) -> bool {
        matches!(
            self,
            AccountKind::Checking | AccountKind::Savings | AccountKind::Reserve
        )
    }

    pub fn is_revolving(&self) -> bool {
        matches!(self, AccountKind::CreditCard)
    }
}

impl std::fmt::Display for AccountKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub kind: AccountKind,
    pub currency: String,
    /// Balance the account opened with; the ledger evaluator adds
    /// transactions on top of this.
    pub initial_balance_cents: Cents,
    /// No transaction referencing the account may be dated before this.
    pub start_date: NaiveDate,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        name: String,
        kind: AccountKind,
        currency: String,
        initial_balance_cents: Cents,
        start_date: NaiveDate,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            kind,
            currency,
            initial_balance_cents,
            start_date,
            description: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_kind_roundtrip() {
        for kind in [
            AccountKind::Checking,
            AccountKind::Savings,
            AccountKind::FixedIncome,
            AccountKind::Reserve,
            AccountKind::Goal,
            AccountKind::CreditCard,
            AccountKind::Crypto,
        ] {
            let s = kind.as_str();
            let parsed = AccountKind::from_str(s).unwrap();
            assert_eq!(kind, parsed);
        }
    }

    #[test]
    fn test_credit_card_is_not_an_asset() {
        assert!(!AccountKind::CreditCard.is_asset_class());
        assert!(AccountKind::CreditCard.is_revolving());
        for kind in [
            AccountKind::Checking,
            AccountKind::Savings,
            AccountKind::FixedIncome,
            AccountKind::Reserve,
            AccountKind::Goal,
            AccountKind::Crypto,
        ] {
            assert!(kind.is_asset_class(), "{kind} should be an asset class");
        }
    }

    #[test]
    fn test_liquidity_classification() {
        assert!(AccountKind::Checking.is_liquid());
        assert!(AccountKind::Savings.is_liquid());
        assert!(AccountKind::Reserve.is_liquid());
        assert!(!AccountKind::FixedIncome.is_liquid());
        assert!(!AccountKind::Goal.is_liquid());
        assert!(!AccountKind::Crypto.is_liquid());
    }
}
