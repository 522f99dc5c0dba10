use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::application::FinanceService;
use crate::domain::{
    Account, FixedAsset, FixedExpenseTemplate, InsurancePolicy, LoanContract, TrackedBill,
    Transaction,
};

/// Database snapshot for full export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub accounts: Vec<Account>,
    pub transactions: Vec<Transaction>,
    pub loans: Vec<LoanContract>,
    pub insurance_policies: Vec<InsurancePolicy>,
    pub fixed_expense_templates: Vec<FixedExpenseTemplate>,
    pub fixed_assets: Vec<FixedAsset>,
    pub tracked_bills: Vec<TrackedBill>,
}

/// Exporter for converting ledger data to external formats.
pub struct Exporter<'a> {
    service: &'a FinanceService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a FinanceService) -> Self {
        Self { service }
    }

    /// Export transactions to CSV format.
    pub async fn export_transactions_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let transactions = self.service.list_transactions(None).await?;
        let account_names = self.service.get_account_names().await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "account",
            "date",
            "amount_cents",
            "kind",
            "flow",
            "category",
            "transfer_group",
            "description",
        ])?;

        let mut count = 0;
        for entry in &transactions {
            let account = account_names
                .get(&entry.account_id)
                .cloned()
                .unwrap_or_else(|| entry.account_id.to_string());

            csv_writer.write_record([
                entry.id.to_string(),
                account,
                entry.date.to_string(),
                entry.amount_cents.to_string(),
                entry.kind.as_str().to_string(),
                entry.flow.as_str().to_string(),
                entry.category.clone().unwrap_or_default(),
                entry
                    .transfer_group
                    .map(|g| g.to_string())
                    .unwrap_or_default(),
                entry.description.clone().unwrap_or_default(),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export account balances as of a date to CSV format.
    pub async fn export_balances_csv<W: Write>(
        &self,
        writer: W,
        as_of: NaiveDate,
    ) -> Result<usize> {
        let balances = self.service.all_balances(as_of).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record(["account", "kind", "currency", "balance_cents"])?;

        let mut count = 0;
        for entry in &balances {
            csv_writer.write_record([
                entry.account.name.clone(),
                entry.account.kind.as_str().to_string(),
                entry.account.currency.clone(),
                entry.balance.to_string(),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export the full database as a JSON snapshot.
    pub async fn export_full_json<W: Write>(&self, mut writer: W) -> Result<DatabaseSnapshot> {
        let snapshot = DatabaseSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            accounts: self.service.list_accounts().await?,
            transactions: self.service.list_transactions(None).await?,
            loans: self.service.list_loans().await?,
            insurance_policies: self.service.list_policies().await?,
            fixed_expense_templates: self.service.list_templates().await?,
            fixed_assets: self.service.list_assets().await?,
            tracked_bills: self.service.list_tracked_bills().await?,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }
}
