use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::{
    Account, AccountId, AccountKind, BillKey, BillSourceKind, FixedAsset, FixedAssetKind,
    FixedExpenseTemplate, FixedExpenseTemplateId, Flow, InsurancePolicy, InsurancePolicyId,
    LoanContract, LoanId, LoanStatus, OperationKind, TrackedBill, Transaction,
};

use super::{MIGRATION_001_INITIAL, MIGRATION_002_CONTRACTS, MIGRATION_003_BILLS};

/// Repository for persisting and querying the household ledger, contracts
/// and tracked bills.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given path.
    /// Creates the database file if it doesn't exist.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;

        sqlx::query(MIGRATION_002_CONTRACTS)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 002")?;

        sqlx::query(MIGRATION_003_BILLS)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 003")?;

        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    // ========================
    // Account operations
    // ========================

    /// Save a new account to the database.
    pub async fn save_account(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, name, kind, currency, initial_balance_cents, start_date, description, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account.id.to_string())
        .bind(&account.name)
        .bind(account.kind.as_str())
        .bind(&account.currency)
        .bind(account.initial_balance_cents)
        .bind(account.start_date.to_string())
        .bind(&account.description)
        .bind(account.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save account")?;
        Ok(())
    }

    /// Get an account by ID.
    pub async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, kind, currency, initial_balance_cents, start_date, description, created_at
            FROM accounts
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_account(&row)?)),
            None => Ok(None),
        }
    }

    /// Get an account by name.
    pub async fn get_account_by_name(&self, name: &str) -> Result<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, kind, currency, initial_balance_cents, start_date, description, created_at
            FROM accounts
            WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account by name")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_account(&row)?)),
            None => Ok(None),
        }
    }

    /// List all accounts, ordered by name.
    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, kind, currency, initial_balance_cents, start_date, description, created_at
            FROM accounts
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list accounts")?;

        rows.iter().map(Self::row_to_account).collect()
    }

    fn row_to_account(row: &sqlx::sqlite::SqliteRow) -> Result<Account> {
        let id_str: String = row.get("id");
        let kind_str: String = row.get("kind");

        Ok(Account {
            id: Uuid::parse_str(&id_str).context("Invalid account ID")?,
            name: row.get("name"),
            kind: AccountKind::from_str(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid account kind: {}", kind_str))?,
            currency: row.get("currency"),
            initial_balance_cents: row.get("initial_balance_cents"),
            start_date: parse_date(row.get("start_date"))?,
            description: row.get("description"),
            created_at: parse_timestamp(row.get("created_at"))?,
        })
    }

    // ========================
    // Transaction operations
    // ========================

    /// Save a single ledger transaction.
    pub async fn save_transaction(&self, transaction: &Transaction) -> Result<()> {
        sqlx::query(INSERT_TRANSACTION)
            .bind(transaction.id.to_string())
            .bind(transaction.account_id.to_string())
            .bind(transaction.date.to_string())
            .bind(transaction.amount_cents)
            .bind(transaction.kind.as_str())
            .bind(transaction.flow.as_str())
            .bind(&transaction.category)
            .bind(transaction.transfer_group.map(|g| g.to_string()))
            .bind(&transaction.description)
            .bind(transaction.created_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .context("Failed to save transaction")?;
        Ok(())
    }

    /// Save both legs of a transfer pair in one database transaction, so a
    /// half-written pair can never exist.
    pub async fn save_transfer_pair(
        &self,
        out_leg: &Transaction,
        in_leg: &Transaction,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transfer transaction")?;

        for leg in [out_leg, in_leg] {
            sqlx::query(INSERT_TRANSACTION)
                .bind(leg.id.to_string())
                .bind(leg.account_id.to_string())
                .bind(leg.date.to_string())
                .bind(leg.amount_cents)
                .bind(leg.kind.as_str())
                .bind(leg.flow.as_str())
                .bind(&leg.category)
                .bind(leg.transfer_group.map(|g| g.to_string()))
                .bind(&leg.description)
                .bind(leg.created_at.to_rfc3339())
                .execute(&mut *tx)
                .await
                .context("Failed to save transfer leg")?;
        }

        tx.commit()
            .await
            .context("Failed to commit transfer pair")?;
        Ok(())
    }

    /// Save a batch of transactions atomically: either every row lands or
    /// none does. Used by the statement import commit.
    pub async fn save_transactions_atomic(&self, transactions: &[Transaction]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin import transaction")?;

        for transaction in transactions {
            sqlx::query(INSERT_TRANSACTION)
                .bind(transaction.id.to_string())
                .bind(transaction.account_id.to_string())
                .bind(transaction.date.to_string())
                .bind(transaction.amount_cents)
                .bind(transaction.kind.as_str())
                .bind(transaction.flow.as_str())
                .bind(&transaction.category)
                .bind(transaction.transfer_group.map(|g| g.to_string()))
                .bind(&transaction.description)
                .bind(transaction.created_at.to_rfc3339())
                .execute(&mut *tx)
                .await
                .context("Failed to save imported transaction")?;
        }

        tx.commit().await.context("Failed to commit import")?;
        Ok(())
    }

    /// List all transactions, ordered by date.
    pub async fn list_transactions(&self) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, date, amount_cents, kind, flow, category, transfer_group, description, created_at
            FROM transactions
            ORDER BY date, created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list transactions")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// List transactions for one account, ordered by date.
    pub async fn list_transactions_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, date, amount_cents, kind, flow, category, transfer_group, description, created_at
            FROM transactions
            WHERE account_id = ?
            ORDER BY date, created_at
            "#,
        )
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list transactions for account")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// List transactions in a closed date window across all accounts.
    pub async fn list_transactions_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, date, amount_cents, kind, flow, category, transfer_group, description, created_at
            FROM transactions
            WHERE date >= ? AND date <= ?
            ORDER BY date, created_at
            "#,
        )
        .bind(from.to_string())
        .bind(to.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list transactions in window")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    fn row_to_transaction(row: &sqlx::sqlite::SqliteRow) -> Result<Transaction> {
        let id_str: String = row.get("id");
        let account_id_str: String = row.get("account_id");
        let kind_str: String = row.get("kind");
        let flow_str: String = row.get("flow");
        let transfer_group_str: Option<String> = row.get("transfer_group");

        Ok(Transaction {
            id: Uuid::parse_str(&id_str).context("Invalid transaction ID")?,
            account_id: Uuid::parse_str(&account_id_str).context("Invalid account ID")?,
            date: parse_date(row.get("date"))?,
            amount_cents: row.get("amount_cents"),
            kind: OperationKind::from_str(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid operation kind: {}", kind_str))?,
            flow: Flow::from_str(&flow_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid flow: {}", flow_str))?,
            category: row.get("category"),
            transfer_group: transfer_group_str
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .context("Invalid transfer group ID")?,
            description: row.get("description"),
            created_at: parse_timestamp(row.get("created_at"))?,
        })
    }

    // ========================
    // Loan operations
    // ========================

    /// Save a new loan contract.
    pub async fn save_loan(&self, loan: &LoanContract) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO loans (id, name, principal_cents, installment_cents, monthly_rate_percent, term_months, start_date, installments_paid, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(loan.id.to_string())
        .bind(&loan.name)
        .bind(loan.principal_cents)
        .bind(loan.installment_cents)
        .bind(loan.monthly_rate_percent)
        .bind(loan.term_months as i64)
        .bind(loan.start_date.to_string())
        .bind(loan.installments_paid as i64)
        .bind(loan.status.as_str())
        .bind(loan.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save loan")?;
        Ok(())
    }

    /// Get a loan by ID.
    pub async fn get_loan(&self, id: LoanId) -> Result<Option<LoanContract>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, principal_cents, installment_cents, monthly_rate_percent, term_months, start_date, installments_paid, status, created_at
            FROM loans
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch loan")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_loan(&row)?)),
            None => Ok(None),
        }
    }

    /// Get a loan by name.
    pub async fn get_loan_by_name(&self, name: &str) -> Result<Option<LoanContract>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, principal_cents, installment_cents, monthly_rate_percent, term_months, start_date, installments_paid, status, created_at
            FROM loans
            WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch loan by name")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_loan(&row)?)),
            None => Ok(None),
        }
    }

    /// List all loans, ordered by name.
    pub async fn list_loans(&self) -> Result<Vec<LoanContract>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, principal_cents, installment_cents, monthly_rate_percent, term_months, start_date, installments_paid, status, created_at
            FROM loans
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list loans")?;

        rows.iter().map(Self::row_to_loan).collect()
    }

    /// Persist the mutable part of a loan: rate, installment, counter, status.
    pub async fn update_loan(&self, loan: &LoanContract) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE loans
            SET installment_cents = ?, monthly_rate_percent = ?, installments_paid = ?, status = ?
            WHERE id = ?
            "#,
        )
        .bind(loan.installment_cents)
        .bind(loan.monthly_rate_percent)
        .bind(loan.installments_paid as i64)
        .bind(loan.status.as_str())
        .bind(loan.id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to update loan")?;
        Ok(())
    }

    fn row_to_loan(row: &sqlx::sqlite::SqliteRow) -> Result<LoanContract> {
        let id_str: String = row.get("id");
        let status_str: String = row.get("status");

        Ok(LoanContract {
            id: Uuid::parse_str(&id_str).context("Invalid loan ID")?,
            name: row.get("name"),
            principal_cents: row.get("principal_cents"),
            installment_cents: row.get("installment_cents"),
            monthly_rate_percent: row.get("monthly_rate_percent"),
            term_months: row.get::<i64, _>("term_months") as u32,
            start_date: parse_date(row.get("start_date"))?,
            installments_paid: row.get::<i64, _>("installments_paid") as u32,
            status: LoanStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid loan status: {}", status_str))?,
            created_at: parse_timestamp(row.get("created_at"))?,
        })
    }

    // ========================
    // Insurance operations
    // ========================

    /// Save a new insurance policy.
    pub async fn save_policy(&self, policy: &InsurancePolicy) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO insurance_policies (id, name, premium_cents, term_months, start_date, installments_paid, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(policy.id.to_string())
        .bind(&policy.name)
        .bind(policy.premium_cents)
        .bind(policy.term_months as i64)
        .bind(policy.start_date.to_string())
        .bind(policy.installments_paid as i64)
        .bind(policy.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save insurance policy")?;
        Ok(())
    }

    /// Get an insurance policy by ID.
    pub async fn get_policy(&self, id: InsurancePolicyId) -> Result<Option<InsurancePolicy>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, premium_cents, term_months, start_date, installments_paid, created_at
            FROM insurance_policies
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch insurance policy")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_policy(&row)?)),
            None => Ok(None),
        }
    }

    /// Get an insurance policy by name.
    pub async fn get_policy_by_name(&self, name: &str) -> Result<Option<InsurancePolicy>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, premium_cents, term_months, start_date, installments_paid, created_at
            FROM insurance_policies
            WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch insurance policy by name")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_policy(&row)?)),
            None => Ok(None),
        }
    }

    /// List all insurance policies, ordered by name.
    pub async fn list_policies(&self) -> Result<Vec<InsurancePolicy>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, premium_cents, term_months, start_date, installments_paid, created_at
            FROM insurance_policies
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list insurance policies")?;

        rows.iter().map(Self::row_to_policy).collect()
    }

    fn row_to_policy(row: &sqlx::sqlite::SqliteRow) -> Result<InsurancePolicy> {
        let id_str: String = row.get("id");

        Ok(InsurancePolicy {
            id: Uuid::parse_str(&id_str).context("Invalid policy ID")?,
            name: row.get("name"),
            premium_cents: row.get("premium_cents"),
            term_months: row.get::<i64, _>("term_months") as u32,
            start_date: parse_date(row.get("start_date"))?,
            installments_paid: row.get::<i64, _>("installments_paid") as u32,
            created_at: parse_timestamp(row.get("created_at"))?,
        })
    }

    // ========================
    // Fixed expense templates
    // ========================

    /// Save a new fixed expense template.
    pub async fn save_template(&self, template: &FixedExpenseTemplate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fixed_expense_templates (id, name, amount_cents, start_date, end_date, active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(template.id.to_string())
        .bind(&template.name)
        .bind(template.amount_cents)
        .bind(template.start_date.to_string())
        .bind(template.end_date.map(|d| d.to_string()))
        .bind(template.active)
        .bind(template.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save expense template")?;
        Ok(())
    }

    /// Get a fixed expense template by ID.
    pub async fn get_template(
        &self,
        id: FixedExpenseTemplateId,
    ) -> Result<Option<FixedExpenseTemplate>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, amount_cents, start_date, end_date, active, created_at
            FROM fixed_expense_templates
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch expense template")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_template(&row)?)),
            None => Ok(None),
        }
    }

    /// Get a fixed expense template by name.
    pub async fn get_template_by_name(&self, name: &str) -> Result<Option<FixedExpenseTemplate>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, amount_cents, start_date, end_date, active, created_at
            FROM fixed_expense_templates
            WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch expense template by name")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_template(&row)?)),
            None => Ok(None),
        }
    }

    /// List all fixed expense templates, ordered by name.
    pub async fn list_templates(&self) -> Result<Vec<FixedExpenseTemplate>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, amount_cents, start_date, end_date, active, created_at
            FROM fixed_expense_templates
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list expense templates")?;

        rows.iter().map(Self::row_to_template).collect()
    }

    /// Persist a template's active flag.
    pub async fn update_template(&self, template: &FixedExpenseTemplate) -> Result<()> {
        sqlx::query("UPDATE fixed_expense_templates SET active = ? WHERE id = ?")
            .bind(template.active)
            .bind(template.id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to update expense template")?;
        Ok(())
    }

    fn row_to_template(row: &sqlx::sqlite::SqliteRow) -> Result<FixedExpenseTemplate> {
        let id_str: String = row.get("id");
        let end_date_str: Option<String> = row.get("end_date");

        Ok(FixedExpenseTemplate {
            id: Uuid::parse_str(&id_str).context("Invalid template ID")?,
            name: row.get("name"),
            amount_cents: row.get("amount_cents"),
            start_date: parse_date(row.get("start_date"))?,
            end_date: end_date_str.map(parse_date).transpose()?,
            active: row.get::<i32, _>("active") != 0,
            created_at: parse_timestamp(row.get("created_at"))?,
        })
    }

    // ========================
    // Fixed asset operations
    // ========================

    /// Save a new fixed asset.
    pub async fn save_asset(&self, asset: &FixedAsset) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fixed_assets (id, name, kind, reference, current_value_cents, valued_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(asset.id.to_string())
        .bind(&asset.name)
        .bind(asset.kind.as_str())
        .bind(&asset.reference)
        .bind(asset.current_value_cents)
        .bind(asset.valued_at.to_string())
        .bind(asset.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save fixed asset")?;
        Ok(())
    }

    /// Get a fixed asset by name.
    pub async fn get_asset_by_name(&self, name: &str) -> Result<Option<FixedAsset>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, kind, reference, current_value_cents, valued_at, created_at
            FROM fixed_assets
            WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch fixed asset by name")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_asset(&row)?)),
            None => Ok(None),
        }
    }

    /// List all fixed assets, ordered by name.
    pub async fn list_assets(&self) -> Result<Vec<FixedAsset>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, kind, reference, current_value_cents, valued_at, created_at
            FROM fixed_assets
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list fixed assets")?;

        rows.iter().map(Self::row_to_asset).collect()
    }

    /// Persist a new appraisal for an asset.
    pub async fn update_asset_value(&self, asset: &FixedAsset) -> Result<()> {
        sqlx::query("UPDATE fixed_assets SET current_value_cents = ?, valued_at = ? WHERE id = ?")
            .bind(asset.current_value_cents)
            .bind(asset.valued_at.to_string())
            .bind(asset.id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to update fixed asset value")?;
        Ok(())
    }

    fn row_to_asset(row: &sqlx::sqlite::SqliteRow) -> Result<FixedAsset> {
        let id_str: String = row.get("id");
        let kind_str: String = row.get("kind");

        Ok(FixedAsset {
            id: Uuid::parse_str(&id_str).context("Invalid asset ID")?,
            name: row.get("name"),
            kind: FixedAssetKind::from_str(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid asset kind: {}", kind_str))?,
            reference: row.get("reference"),
            current_value_cents: row.get("current_value_cents"),
            valued_at: parse_date(row.get("valued_at"))?,
            created_at: parse_timestamp(row.get("created_at"))?,
        })
    }

    // ========================
    // Tracked bill operations
    // ========================

    /// Insert a tracked bill if its natural key is not tracked yet. Returns
    /// whether a row was inserted; the unique index makes a second include a
    /// no-op rather than a duplicate.
    pub async fn insert_tracked_bill(&self, bill: &TrackedBill) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO tracked_bills (id, description, due_date, amount_cents, source_kind, source_id, installment, is_paid, is_included, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_kind, source_id, installment) DO NOTHING
            "#,
        )
        .bind(bill.id.to_string())
        .bind(&bill.description)
        .bind(bill.due_date.to_string())
        .bind(bill.amount_cents)
        .bind(bill.key.kind.as_str())
        .bind(bill.key.source_id.to_string())
        .bind(bill.key.installment as i64)
        .bind(bill.is_paid)
        .bind(bill.is_included)
        .bind(bill.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to insert tracked bill")?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete the tracked bill with this natural key, if any. Returns
    /// whether a row existed.
    pub async fn delete_tracked_bill(&self, key: &BillKey) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM tracked_bills WHERE source_kind = ? AND source_id = ? AND installment = ?",
        )
        .bind(key.kind.as_str())
        .bind(key.source_id.to_string())
        .bind(key.installment as i64)
        .execute(&self.pool)
        .await
        .context("Failed to delete tracked bill")?;

        Ok(result.rows_affected() > 0)
    }

    /// Get the tracked bill with this natural key.
    pub async fn get_tracked_bill(&self, key: &BillKey) -> Result<Option<TrackedBill>> {
        let row = sqlx::query(
            r#"
            SELECT id, description, due_date, amount_cents, source_kind, source_id, installment, is_paid, is_included, created_at
            FROM tracked_bills
            WHERE source_kind = ? AND source_id = ? AND installment = ?
            "#,
        )
        .bind(key.kind.as_str())
        .bind(key.source_id.to_string())
        .bind(key.installment as i64)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch tracked bill")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_bill(&row)?)),
            None => Ok(None),
        }
    }

    /// List all tracked bills, ordered by due date.
    pub async fn list_tracked_bills(&self) -> Result<Vec<TrackedBill>> {
        let rows = sqlx::query(
            r#"
            SELECT id, description, due_date, amount_cents, source_kind, source_id, installment, is_paid, is_included, created_at
            FROM tracked_bills
            ORDER BY due_date, description
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list tracked bills")?;

        rows.iter().map(Self::row_to_bill).collect()
    }

    /// Count tracked bills marked paid for one source, optionally only
    /// those due on or before a date.
    pub async fn count_paid_bills_for_source(
        &self,
        kind: BillSourceKind,
        source_id: Uuid,
        due_on_or_before: Option<NaiveDate>,
    ) -> Result<i64> {
        let count: i64 = match due_on_or_before {
            Some(limit) => sqlx::query(
                r#"
                SELECT COUNT(*) as count
                FROM tracked_bills
                WHERE source_kind = ? AND source_id = ? AND is_paid = 1 AND due_date <= ?
                "#,
            )
            .bind(kind.as_str())
            .bind(source_id.to_string())
            .bind(limit.to_string())
            .fetch_one(&self.pool)
            .await
            .context("Failed to count paid bills")?
            .get("count"),
            None => sqlx::query(
                r#"
                SELECT COUNT(*) as count
                FROM tracked_bills
                WHERE source_kind = ? AND source_id = ? AND is_paid = 1
                "#,
            )
            .bind(kind.as_str())
            .bind(source_id.to_string())
            .fetch_one(&self.pool)
            .await
            .context("Failed to count paid bills")?
            .get("count"),
        };

        Ok(count)
    }

    fn row_to_bill(row: &sqlx::sqlite::SqliteRow) -> Result<TrackedBill> {
        let id_str: String = row.get("id");
        let source_kind_str: String = row.get("source_kind");
        let source_id_str: String = row.get("source_id");

        Ok(TrackedBill {
            id: Uuid::parse_str(&id_str).context("Invalid bill ID")?,
            description: row.get("description"),
            due_date: parse_date(row.get("due_date"))?,
            amount_cents: row.get("amount_cents"),
            key: BillKey {
                kind: BillSourceKind::from_str(&source_kind_str)
                    .ok_or_else(|| anyhow::anyhow!("Invalid bill source kind: {}", source_kind_str))?,
                source_id: Uuid::parse_str(&source_id_str).context("Invalid bill source ID")?,
                installment: row.get::<i64, _>("installment") as u32,
            },
            is_paid: row.get::<i32, _>("is_paid") != 0,
            is_included: row.get::<i32, _>("is_included") != 0,
            created_at: parse_timestamp(row.get("created_at"))?,
        })
    }

    // ========================
    // Settlement
    // ========================

    /// Apply one bill settlement atomically: the ledger entry, the bill's
    /// paid flag (inserting the row first when the key was untracked), and
    /// the contract counter all land in a single database transaction.
    pub async fn apply_settlement(
        &self,
        entry: &Transaction,
        bill: &TrackedBill,
        bill_is_new: bool,
        loan: Option<&LoanContract>,
        policy: Option<&InsurancePolicy>,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin settlement transaction")?;

        sqlx::query(INSERT_TRANSACTION)
            .bind(entry.id.to_string())
            .bind(entry.account_id.to_string())
            .bind(entry.date.to_string())
            .bind(entry.amount_cents)
            .bind(entry.kind.as_str())
            .bind(entry.flow.as_str())
            .bind(&entry.category)
            .bind(entry.transfer_group.map(|g| g.to_string()))
            .bind(&entry.description)
            .bind(entry.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .context("Failed to save settlement transaction")?;

        if bill_is_new {
            sqlx::query(
                r#"
                INSERT INTO tracked_bills (id, description, due_date, amount_cents, source_kind, source_id, installment, is_paid, is_included, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(bill.id.to_string())
            .bind(&bill.description)
            .bind(bill.due_date.to_string())
            .bind(bill.amount_cents)
            .bind(bill.key.kind.as_str())
            .bind(bill.key.source_id.to_string())
            .bind(bill.key.installment as i64)
            .bind(bill.is_paid)
            .bind(bill.is_included)
            .bind(bill.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .context("Failed to save settled bill")?;
        } else {
            sqlx::query("UPDATE tracked_bills SET is_paid = 1 WHERE id = ?")
                .bind(bill.id.to_string())
                .execute(&mut *tx)
                .await
                .context("Failed to mark bill paid")?;
        }

        if let Some(loan) = loan {
            sqlx::query("UPDATE loans SET installments_paid = ?, status = ? WHERE id = ?")
                .bind(loan.installments_paid as i64)
                .bind(loan.status.as_str())
                .bind(loan.id.to_string())
                .execute(&mut *tx)
                .await
                .context("Failed to update loan counter")?;
        }

        if let Some(policy) = policy {
            sqlx::query("UPDATE insurance_policies SET installments_paid = ? WHERE id = ?")
                .bind(policy.installments_paid as i64)
                .bind(policy.id.to_string())
                .execute(&mut *tx)
                .await
                .context("Failed to update policy counter")?;
        }

        tx.commit().await.context("Failed to commit settlement")?;
        Ok(())
    }
}

const INSERT_TRANSACTION: &str = r#"
INSERT INTO transactions (id, account_id, date, amount_cents, kind, flow, category, transfer_group, description, created_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

fn parse_date(s: String) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| format!("Invalid date: {}", s))
}

fn parse_timestamp(s: String) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&s)
        .with_context(|| format!("Invalid timestamp: {}", s))?
        .with_timezone(&Utc))
}
