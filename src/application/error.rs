use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::RateSolveError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account already exists: {0}")]
    AccountAlreadyExists(String),

    #[error("Loan not found: {0}")]
    LoanNotFound(String),

    #[error("Loan already exists: {0}")]
    LoanAlreadyExists(String),

    #[error("Loan '{0}' has no rate configured yet")]
    LoanNotConfigured(String),

    #[error("Loan '{0}' is already configured")]
    LoanAlreadyConfigured(String),

    #[error("Insurance policy not found: {0}")]
    PolicyNotFound(String),

    #[error("Insurance policy already exists: {0}")]
    PolicyAlreadyExists(String),

    #[error("Expense template not found: {0}")]
    TemplateNotFound(String),

    #[error("Expense template already exists: {0}")]
    TemplateAlreadyExists(String),

    #[error("Fixed asset not found: {0}")]
    AssetNotFound(String),

    #[error("Fixed asset already exists: {0}")]
    AssetAlreadyExists(String),

    #[error("No recurring source behind bill key: {0}")]
    BillSourceNotFound(String),

    #[error("Bill is already settled: {0}")]
    BillAlreadyPaid(String),

    #[error("Entry for '{account_name}' dated {date} precedes the account start date {start_date}")]
    EntryBeforeAccountStart {
        account_name: String,
        date: NaiveDate,
        start_date: NaiveDate,
    },

    #[error("Currency mismatch between accounts: {from_currency} vs {to_currency}")]
    CurrencyMismatch {
        from_currency: String,
        to_currency: String,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Rate solve failed: {0}")]
    RateSolve(#[from] RateSolveError),

    #[error("Valuation lookup failed for '{reference}': {message}")]
    Valuation { reference: String, message: String },

    #[error("Import failed at line {line}: {message}")]
    ImportParse { line: usize, message: String },

    #[error("Import already in progress for account: {0}")]
    ImportInProgress(String),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}
