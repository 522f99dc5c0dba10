use std::collections::HashMap;

use chrono::NaiveDate;

use super::{Account, AccountId, Cents, Transaction};

/// Balance of one account at end of day `as_of`, derived from the initial
/// balance plus every entry dated on or before that day. Dates before the
/// account's start date evaluate to the initial balance: the account did not
/// move yet.
///
/// `entries` must all belong to `account`; callers fetch per account.
pub fn balance_as_of(account: &Account, entries: &[Transaction], as_of: NaiveDate) -> Cents {
    debug_assert!(entries.iter().all(|t| t.account_id == account.id));

    if as_of < account.start_date {
        return account.initial_balance_cents;
    }

    let movement: Cents = entries
        .iter()
        .filter(|t| t.date <= as_of)
        .map(|t| t.signed_cents())
        .sum();

    account.initial_balance_cents + movement
}

/// One sweep over a mixed entry set, for multi-account reports. Entries
/// whose account id matches none of `accounts` are ignored here; the service
/// layer surfaces those as data-integrity warnings.
pub fn balances_as_of(
    accounts: &[Account],
    entries: &[Transaction],
    as_of: NaiveDate,
) -> HashMap<AccountId, Cents> {
    let mut movements: HashMap<AccountId, Cents> = HashMap::new();
    for entry in entries.iter().filter(|t| t.date <= as_of) {
        *movements.entry(entry.account_id).or_insert(0) += entry.signed_cents();
    }

    accounts
        .iter()
        .map(|account| {
            let balance = if as_of < account.start_date {
                account.initial_balance_cents
            } else {
                account.initial_balance_cents + movements.get(&account.id).copied().unwrap_or(0)
            };
            (account.id, balance)
        })
        .collect()
}

/// Pre-sorted prefix-sum index over one account's entries, for callers that
/// evaluate many dates against the same ledger. `balance_at` answers in
/// O(log n) and agrees with [`balance_as_of`] on every date.
#[derive(Debug, Clone)]
pub struct BalanceTimeline {
    start_date: NaiveDate,
    initial_cents: Cents,
    /// entry dates ascending, parallel to `running_cents`
    dates: Vec<NaiveDate>,
    /// balance after applying every entry up to and including `dates[i]`
    running_cents: Vec<Cents>,
}

impl BalanceTimeline {
    pub fn build(account: &Account, entries: &[Transaction]) -> Self {
        debug_assert!(entries.iter().all(|t| t.account_id == account.id));

        let mut sorted: Vec<&Transaction> = entries.iter().collect();
        sorted.sort_by_key(|t| t.date);

        let mut dates = Vec::with_capacity(sorted.len());
        let mut running_cents = Vec::with_capacity(sorted.len());
        let mut balance = account.initial_balance_cents;
        for entry in sorted {
            balance += entry.signed_cents();
            dates.push(entry.date);
            running_cents.push(balance);
        }

        Self {
            start_date: account.start_date,
            initial_cents: account.initial_balance_cents,
            dates,
            running_cents,
        }
    }

    pub fn balance_at(&self, as_of: NaiveDate) -> Cents {
        if as_of < self.start_date {
            return self.initial_cents;
        }
        // number of entries dated on or before `as_of`
        let applied = self.dates.partition_point(|d| *d <= as_of);
        if applied == 0 {
            self.initial_cents
        } else {
            self.running_cents[applied - 1]
        }
    }
}

/// Money earned and spent over a closed date window, across all accounts.
/// Only real income/spending counts: transfers between own accounts and
/// investment/redemption movements are internal and excluded on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowFlows {
    pub income_cents: Cents,
    pub expense_cents: Cents,
}

impl WindowFlows {
    pub fn net_cents(&self) -> Cents {
        self.income_cents - self.expense_cents
    }
}

pub fn window_flows(entries: &[Transaction], from: NaiveDate, to: NaiveDate) -> WindowFlows {
    let mut flows = WindowFlows::default();

    for entry in entries.iter().filter(|t| t.date >= from && t.date <= to) {
        if entry.kind.is_income_like() {
            flows.income_cents += entry.amount_cents;
        } else if entry.kind.is_expense_like() {
            flows.expense_cents += entry.amount_cents;
        }
    }

    flows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountKind, Flow, OperationKind};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn checking_account() -> Account {
        Account::new(
            "Main checking".into(),
            AccountKind::Checking,
            "EUR".into(),
            100_000,
            date(2024, 1, 1),
        )
    }

    fn entry(
        account: &Account,
        on: NaiveDate,
        amount: Cents,
        kind: OperationKind,
        flow: Flow,
    ) -> Transaction {
        Transaction::new(account.id, on, amount, kind, flow)
    }

    #[test]
    fn test_balance_before_start_date_is_initial() {
        let account = checking_account();
        let entries = vec![entry(
            &account,
            date(2024, 1, 5),
            5_000,
            OperationKind::Income,
            Flow::In,
        )];

        assert_eq!(
            balance_as_of(&account, &entries, date(2023, 12, 31)),
            100_000
        );
    }

    #[test]
    fn test_balance_is_inclusive_of_query_date() {
        let account = checking_account();
        let entries = vec![
            entry(&account, date(2024, 1, 5), 5_000, OperationKind::Income, Flow::In),
            entry(&account, date(2024, 1, 10), 2_000, OperationKind::Expense, Flow::Out),
            entry(&account, date(2024, 1, 20), 1_500, OperationKind::Expense, Flow::Out),
        ];

        // On the 10th the expense of that same day already counts.
        assert_eq!(balance_as_of(&account, &entries, date(2024, 1, 10)), 103_000);
        // The 19th still excludes the entry on the 20th.
        assert_eq!(balance_as_of(&account, &entries, date(2024, 1, 19)), 103_000);
        assert_eq!(balance_as_of(&account, &entries, date(2024, 1, 20)), 101_500);
    }

    #[test]
    fn test_balance_with_no_entries() {
        let account = checking_account();
        assert_eq!(balance_as_of(&account, &[], date(2024, 6, 1)), 100_000);
    }

    #[test]
    fn test_window_flows_exclude_internal_movements() {
        let account = checking_account();
        let entries = vec![
            entry(&account, date(2024, 2, 1), 300_000, OperationKind::Income, Flow::In),
            entry(&account, date(2024, 2, 3), 40_000, OperationKind::Expense, Flow::Out),
            entry(&account, date(2024, 2, 5), 60_000, OperationKind::LoanPayment, Flow::Out),
            entry(&account, date(2024, 2, 7), 1_000, OperationKind::Yield, Flow::In),
            // Internal movements: none of these count on either side.
            entry(&account, date(2024, 2, 9), 50_000, OperationKind::Investment, Flow::Out),
            entry(&account, date(2024, 2, 11), 20_000, OperationKind::Redemption, Flow::In),
            entry(
                &account,
                date(2024, 2, 13),
                10_000,
                OperationKind::Transfer,
                Flow::TransferOut,
            ),
        ];

        let flows = window_flows(&entries, date(2024, 2, 1), date(2024, 2, 29));
        assert_eq!(flows.income_cents, 301_000);
        assert_eq!(flows.expense_cents, 100_000);
        assert_eq!(flows.net_cents(), 201_000);
    }

    #[test]
    fn test_balance_worked_example() {
        // 1000.00 initial, +500.00 on Jan 10, -200.00 on Jan 15
        let account = checking_account();
        let entries = vec![
            entry(&account, date(2024, 1, 10), 50_000, OperationKind::Income, Flow::In),
            entry(&account, date(2024, 1, 15), 20_000, OperationKind::Expense, Flow::Out),
        ];

        assert_eq!(balance_as_of(&account, &entries, date(2024, 1, 12)), 150_000);
        assert_eq!(balance_as_of(&account, &entries, date(2024, 1, 20)), 130_000);
    }

    #[test]
    fn test_balances_as_of_ignores_orphan_entries() {
        let account = checking_account();
        let other = Account::new(
            "Savings".into(),
            AccountKind::Savings,
            "EUR".into(),
            50_000,
            date(2024, 1, 1),
        );
        let mut entries = vec![
            entry(&account, date(2024, 1, 5), 10_000, OperationKind::Income, Flow::In),
            entry(&other, date(2024, 1, 6), 5_000, OperationKind::Income, Flow::In),
        ];
        // entry pointing at an account record that no longer exists
        entries.push(Transaction::new(
            uuid::Uuid::new_v4(),
            date(2024, 1, 7),
            99_000,
            OperationKind::Income,
            Flow::In,
        ));

        let accounts = vec![account.clone(), other.clone()];
        let balances = balances_as_of(&accounts, &entries, date(2024, 1, 31));

        assert_eq!(balances.len(), 2);
        assert_eq!(balances[&account.id], 110_000);
        assert_eq!(balances[&other.id], 55_000);
    }

    #[test]
    fn test_timeline_agrees_with_balance_as_of() {
        let account = checking_account();
        // deliberately unsorted, with two entries on the same day
        let entries = vec![
            entry(&account, date(2024, 3, 20), 7_000, OperationKind::Expense, Flow::Out),
            entry(&account, date(2024, 1, 10), 50_000, OperationKind::Income, Flow::In),
            entry(&account, date(2024, 1, 10), 4_000, OperationKind::Expense, Flow::Out),
            entry(&account, date(2024, 2, 1), 12_000, OperationKind::Income, Flow::In),
        ];
        let timeline = BalanceTimeline::build(&account, &entries);

        for probe in [
            date(2023, 12, 25),
            date(2024, 1, 1),
            date(2024, 1, 9),
            date(2024, 1, 10),
            date(2024, 1, 11),
            date(2024, 2, 1),
            date(2024, 3, 20),
            date(2024, 12, 31),
        ] {
            assert_eq!(
                timeline.balance_at(probe),
                balance_as_of(&account, &entries, probe),
                "diverged at {probe}"
            );
        }
    }

    #[test]
    fn test_window_flows_respect_bounds() {
        let account = checking_account();
        let entries = vec![
            entry(&account, date(2024, 1, 31), 1_000, OperationKind::Income, Flow::In),
            entry(&account, date(2024, 2, 1), 2_000, OperationKind::Income, Flow::In),
            entry(&account, date(2024, 2, 29), 3_000, OperationKind::Income, Flow::In),
            entry(&account, date(2024, 3, 1), 4_000, OperationKind::Income, Flow::In),
        ];

        let flows = window_flows(&entries, date(2024, 2, 1), date(2024, 2, 29));
        assert_eq!(flows.income_cents, 5_000);
    }
}
