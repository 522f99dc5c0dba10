use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use super::{Account, AccountId, Cents, Flow, Transaction, TransactionId, format_cents};

/// One inconsistency found in the stored ledger. The constructors uphold
/// these invariants for everything created through the service, so issues
/// point at hand-edited or damaged database files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum IntegrityIssue {
    /// A transfer-flow entry without a group, or in a group that does not
    /// contain exactly one out leg and one in leg
    UnpairedTransfer {
        transaction_id: TransactionId,
        transfer_group: Option<Uuid>,
    },
    /// A transfer pair whose legs disagree on magnitude or date
    MismatchedTransferPair {
        transfer_group: Uuid,
        out_cents: Cents,
        in_cents: Cents,
    },
    /// An entry dated before its account existed
    EntryBeforeAccountStart {
        transaction_id: TransactionId,
        account_id: AccountId,
        date: NaiveDate,
        start_date: NaiveDate,
    },
    /// An entry referencing an account record that does not exist
    OrphanEntry {
        transaction_id: TransactionId,
        account_id: AccountId,
    },
    /// A stored magnitude below zero
    NegativeAmount {
        transaction_id: TransactionId,
        amount_cents: Cents,
    },
}

impl std::fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegrityIssue::UnpairedTransfer { transaction_id, .. } => {
                write!(f, "transfer entry {transaction_id} has no matching opposite leg")
            }
            IntegrityIssue::MismatchedTransferPair { transfer_group, out_cents, in_cents } => {
                write!(
                    f,
                    "transfer group {transfer_group} moves {} out but {} in",
                    format_cents(*out_cents),
                    format_cents(*in_cents)
                )
            }
            IntegrityIssue::EntryBeforeAccountStart { transaction_id, date, start_date, .. } => {
                write!(
                    f,
                    "entry {transaction_id} dated {date} precedes its account's start date {start_date}"
                )
            }
            IntegrityIssue::OrphanEntry { transaction_id, account_id } => {
                write!(f, "entry {transaction_id} references missing account {account_id}")
            }
            IntegrityIssue::NegativeAmount { transaction_id, amount_cents } => {
                write!(f, "entry {transaction_id} stores negative magnitude {amount_cents}")
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Sweep the whole ledger for broken invariants: transfer pairing, account
/// start dates, referential integrity, amount signs.
pub fn check_ledger(accounts: &[Account], entries: &[Transaction]) -> IntegrityReport {
    let mut report = IntegrityReport::default();

    let accounts_by_id: HashMap<AccountId, &Account> =
        accounts.iter().map(|a| (a.id, a)).collect();
    let mut groups: HashMap<Uuid, Vec<&Transaction>> = HashMap::new();

    for entry in entries {
        if entry.amount_cents < 0 {
            report.issues.push(IntegrityIssue::NegativeAmount {
                transaction_id: entry.id,
                amount_cents: entry.amount_cents,
            });
        }

        match accounts_by_id.get(&entry.account_id) {
            None => report.issues.push(IntegrityIssue::OrphanEntry {
                transaction_id: entry.id,
                account_id: entry.account_id,
            }),
            Some(account) if entry.date < account.start_date => {
                report.issues.push(IntegrityIssue::EntryBeforeAccountStart {
                    transaction_id: entry.id,
                    account_id: account.id,
                    date: entry.date,
                    start_date: account.start_date,
                });
            }
            Some(_) => {}
        }

        if entry.flow.is_transfer() {
            match entry.transfer_group {
                Some(group) => groups.entry(group).or_default().push(entry),
                None => report.issues.push(IntegrityIssue::UnpairedTransfer {
                    transaction_id: entry.id,
                    transfer_group: None,
                }),
            }
        }
    }

    for (group, legs) in groups {
        let out_leg = legs.iter().find(|t| t.flow == Flow::TransferOut);
        let in_leg = legs.iter().find(|t| t.flow == Flow::TransferIn);

        match (legs.len(), out_leg, in_leg) {
            (2, Some(out_leg), Some(in_leg)) => {
                if out_leg.amount_cents != in_leg.amount_cents || out_leg.date != in_leg.date {
                    report.issues.push(IntegrityIssue::MismatchedTransferPair {
                        transfer_group: group,
                        out_cents: out_leg.amount_cents,
                        in_cents: in_leg.amount_cents,
                    });
                }
            }
            _ => {
                for leg in legs {
                    report.issues.push(IntegrityIssue::UnpairedTransfer {
                        transaction_id: leg.id,
                        transfer_group: Some(group),
                    });
                }
            }
        }
    }

    report
}

/// Ids of accounts referenced by entries but missing from `accounts`;
/// aggregate sweeps degrade these to zero and surface them as warnings.
pub fn missing_account_ids(accounts: &[Account], entries: &[Transaction]) -> Vec<AccountId> {
    let known: HashSet<AccountId> = accounts.iter().map(|a| a.id).collect();
    let mut missing: Vec<AccountId> = entries
        .iter()
        .map(|t| t.account_id)
        .filter(|id| !known.contains(id))
        .collect();
    missing.sort();
    missing.dedup();
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountKind, OperationKind, transfer_pair};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn account(name: &str) -> Account {
        Account::new(name.into(), AccountKind::Checking, "EUR".into(), 0, date(2024, 1, 1))
    }

    #[test]
    fn test_clean_ledger_reports_no_issues() {
        let a = account("a");
        let b = account("b");
        let (out_leg, in_leg) = transfer_pair(a.id, b.id, 10_000, date(2024, 2, 1));
        let entries = vec![
            Transaction::new(a.id, date(2024, 1, 5), 5_000, OperationKind::Income, Flow::In),
            out_leg,
            in_leg,
        ];

        let report = check_ledger(&[a, b], &entries);
        assert!(report.is_clean(), "unexpected issues: {:?}", report.issues);
    }

    #[test]
    fn test_detects_half_transfer() {
        let a = account("a");
        let b = account("b");
        let (out_leg, _dropped) = transfer_pair(a.id, b.id, 10_000, date(2024, 2, 1));
        let group = out_leg.transfer_group;

        let report = check_ledger(&[a, b], &[out_leg.clone()]);
        assert_eq!(
            report.issues,
            vec![IntegrityIssue::UnpairedTransfer {
                transaction_id: out_leg.id,
                transfer_group: group,
            }]
        );
    }

    #[test]
    fn test_detects_mismatched_pair() {
        let a = account("a");
        let b = account("b");
        let (out_leg, mut in_leg) = transfer_pair(a.id, b.id, 10_000, date(2024, 2, 1));
        in_leg.amount_cents = 9_999;

        let report = check_ledger(&[a, b], &[out_leg, in_leg]);
        assert_eq!(report.issues.len(), 1);
        assert!(matches!(
            report.issues[0],
            IntegrityIssue::MismatchedTransferPair { out_cents: 10_000, in_cents: 9_999, .. }
        ));
    }

    #[test]
    fn test_detects_entry_before_start_and_orphan() {
        let a = account("a");
        let early = Transaction::new(a.id, date(2023, 12, 20), 100, OperationKind::Expense, Flow::Out);
        let orphan = Transaction::new(
            Uuid::new_v4(),
            date(2024, 3, 1),
            200,
            OperationKind::Expense,
            Flow::Out,
        );

        let report = check_ledger(&[a.clone()], &[early.clone(), orphan.clone()]);
        assert_eq!(report.issues.len(), 2);
        assert!(report.issues.contains(&IntegrityIssue::EntryBeforeAccountStart {
            transaction_id: early.id,
            account_id: a.id,
            date: date(2023, 12, 20),
            start_date: date(2024, 1, 1),
        }));
        assert!(report.issues.contains(&IntegrityIssue::OrphanEntry {
            transaction_id: orphan.id,
            account_id: orphan.account_id,
        }));

        assert_eq!(missing_account_ids(&[a], &[early, orphan.clone()]), vec![orphan.account_id]);
    }
}
