// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use chrono::NaiveDate;
use patrimonio::application::FinanceService;
use patrimonio::domain::{AccountKind, Flow, OperationKind};
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(FinanceService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = FinanceService::init(db_path.to_str().unwrap()).await?;
    Ok((service, temp_dir))
}

/// Helper to parse a date string into NaiveDate
pub fn parse_date(date_str: &str) -> NaiveDate {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d").unwrap()
}

/// Test fixture: standard account setup
pub struct StandardAccounts;

impl StandardAccounts {
    /// Create a checking account with 1000.00 opening balance from 2024-01-01
    pub async fn create_checking(service: &FinanceService) -> Result<()> {
        service
            .create_account(
                "Checking".into(),
                AccountKind::Checking,
                "EUR".into(),
                100_000,
                parse_date("2024-01-01"),
                None,
            )
            .await?;
        Ok(())
    }

    /// Create checking plus an empty savings account
    pub async fn create_basic(service: &FinanceService) -> Result<()> {
        Self::create_checking(service).await?;
        service
            .create_account(
                "Savings".into(),
                AccountKind::Savings,
                "EUR".into(),
                0,
                parse_date("2024-01-01"),
                None,
            )
            .await?;
        Ok(())
    }

    /// Record a salary inflow on the checking account
    pub async fn pay_salary(service: &FinanceService, amount: i64, date: &str) -> Result<()> {
        service
            .record_transaction(
                "Checking",
                parse_date(date),
                amount,
                OperationKind::Income,
                Flow::In,
                Some("salary".into()),
                None,
            )
            .await?;
        Ok(())
    }

    /// Record a generic expense on the checking account
    pub async fn spend(service: &FinanceService, amount: i64, date: &str) -> Result<()> {
        service
            .record_transaction(
                "Checking",
                parse_date(date),
                amount,
                OperationKind::Expense,
                Flow::Out,
                None,
                None,
            )
            .await?;
        Ok(())
    }
}
