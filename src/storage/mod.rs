mod repository;

pub use repository::*;

/// SQL migration for the core ledger schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// SQL migration for contracts and fixed assets
pub const MIGRATION_002_CONTRACTS: &str = include_str!("migrations/002_contracts.sql");

/// SQL migration for tracked bills
pub const MIGRATION_003_BILLS: &str = include_str!("migrations/003_bills.sql");
