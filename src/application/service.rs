use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::domain::{
    balance_as_of, balances_as_of, check_ledger, debt_ratio, future_bills, generate_schedule,
    liquidity_ratio, missing_account_ids, potential_bills, remaining_principal, savings_margin,
    solve_monthly_rate, surface_tracked, transfer_pair, window_flows, Account, AccountId,
    AccountKind, BillKey, BillSourceKind, Cents, FixedAsset, FixedAssetKind, FixedExpenseTemplate,
    Flow, IndicatorStatus, InsurancePolicy, IntegrityReport, LoanContract, LoanStatus, Month,
    OperationKind, RecurringSource, ScheduleEntry, TrackedBill, Transaction, DEBT_RATIO, LIQUIDITY,
    SAVINGS_MARGIN,
};
use crate::io::import::{parse_statement, ImportOutcome};
use crate::storage::Repository;

use super::{
    AppError, AssetLine, BillsView, HealthReport, IndicatorReading, LiabilityLine, NetWorthReport,
};

/// Application service providing high-level operations over the household
/// ledger. This is the primary interface for any client (CLI, TUI, etc.).
pub struct FinanceService {
    repo: Repository,
    imports_in_flight: Mutex<HashSet<AccountId>>,
}

/// Balance entry for one account.
pub struct BalanceEntry {
    pub account: Account,
    pub balance: Cents,
}

/// Result of recording a transfer between own accounts.
pub struct TransferResult {
    pub out_leg: Transaction,
    pub in_leg: Transaction,
    pub from_account_name: String,
    pub to_account_name: String,
}

/// Result of settling a bill.
pub struct PaymentResult {
    pub entry: Transaction,
    pub bill: TrackedBill,
    pub loan: Option<LoanContract>,
}

/// External market-value lookup for fixed assets: anything that can price a
/// reference identifier can plug in. The crate ships no vendor client.
pub trait ValuationProvider {
    fn current_value(&self, reference: &str) -> anyhow::Result<Cents>;
}

impl FinanceService {
    /// Create a new service with the given repository.
    pub fn new(repo: Repository) -> Self {
        Self {
            repo,
            imports_in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url).await?;
        Ok(Self::new(repo))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url).await?;
        Ok(Self::new(repo))
    }

    // ========================
    // Account operations
    // ========================

    /// Create a new account.
    pub async fn create_account(
        &self,
        name: String,
        kind: AccountKind,
        currency: String,
        initial_balance_cents: Cents,
        start_date: NaiveDate,
        description: Option<String>,
    ) -> Result<Account, AppError> {
        if self.repo.get_account_by_name(&name).await?.is_some() {
            return Err(AppError::AccountAlreadyExists(name));
        }

        let mut account = Account::new(name, kind, currency, initial_balance_cents, start_date);
        if let Some(desc) = description {
            account = account.with_description(desc);
        }

        self.repo.save_account(&account).await?;
        info!(account = %account.name, kind = account.kind.as_str(), "account created");
        Ok(account)
    }

    /// Get an account by name.
    pub async fn get_account(&self, name: &str) -> Result<Account, AppError> {
        self.repo
            .get_account_by_name(name)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(name.to_string()))
    }

    /// List all accounts.
    pub async fn list_accounts(&self) -> Result<Vec<Account>, AppError> {
        Ok(self.repo.list_accounts().await?)
    }

    /// Balance of one account as of a date.
    pub async fn account_balance(
        &self,
        name: &str,
        as_of: NaiveDate,
    ) -> Result<BalanceEntry, AppError> {
        let account = self.get_account(name).await?;
        let entries = self.repo.list_transactions_for_account(account.id).await?;
        let balance = balance_as_of(&account, &entries, as_of);
        Ok(BalanceEntry { account, balance })
    }

    /// Balances of every account as of a date.
    pub async fn all_balances(&self, as_of: NaiveDate) -> Result<Vec<BalanceEntry>, AppError> {
        let accounts = self.repo.list_accounts().await?;
        let entries = self.repo.list_transactions().await?;
        let balances = balances_as_of(&accounts, &entries, as_of);

        Ok(accounts
            .into_iter()
            .map(|account| {
                let balance = balances.get(&account.id).copied().unwrap_or(0);
                BalanceEntry { account, balance }
            })
            .collect())
    }

    /// Map of account IDs to names (useful for display).
    pub async fn get_account_names(&self) -> Result<HashMap<AccountId, String>, AppError> {
        let accounts = self.repo.list_accounts().await?;
        Ok(accounts.into_iter().map(|a| (a.id, a.name)).collect())
    }

    // ========================
    // Transaction operations
    // ========================

    /// Record a new ledger transaction.
    pub async fn record_transaction(
        &self,
        account_name: &str,
        date: NaiveDate,
        amount_cents: Cents,
        kind: OperationKind,
        flow: Flow,
        category: Option<String>,
        description: Option<String>,
    ) -> Result<Transaction, AppError> {
        if amount_cents <= 0 {
            return Err(AppError::InvalidAmount(
                "Amount must be positive".to_string(),
            ));
        }
        if kind == OperationKind::Transfer || flow.is_transfer() {
            return Err(AppError::InvalidOperation(
                "transfers are recorded as a pair; use the transfer operation".to_string(),
            ));
        }

        let account = self.get_account(account_name).await?;
        if date < account.start_date {
            return Err(AppError::EntryBeforeAccountStart {
                account_name: account.name,
                date,
                start_date: account.start_date,
            });
        }

        let mut entry = Transaction::new(account.id, date, amount_cents, kind, flow);
        if let Some(cat) = category {
            entry = entry.with_category(cat);
        }
        if let Some(desc) = description {
            entry = entry.with_description(desc);
        }

        self.repo.save_transaction(&entry).await?;
        debug!(account = %account.name, kind = kind.as_str(), amount = amount_cents, "transaction recorded");
        Ok(entry)
    }

    /// Record a transfer between two own accounts. Both legs land
    /// atomically.
    pub async fn record_transfer(
        &self,
        from_account_name: &str,
        to_account_name: &str,
        amount_cents: Cents,
        date: NaiveDate,
        description: Option<String>,
    ) -> Result<TransferResult, AppError> {
        if amount_cents <= 0 {
            return Err(AppError::InvalidAmount(
                "Amount must be positive".to_string(),
            ));
        }

        let from_account = self.get_account(from_account_name).await?;
        let to_account = self.get_account(to_account_name).await?;

        if from_account.currency != to_account.currency {
            return Err(AppError::CurrencyMismatch {
                from_currency: from_account.currency.clone(),
                to_currency: to_account.currency.clone(),
            });
        }
        for account in [&from_account, &to_account] {
            if date < account.start_date {
                return Err(AppError::EntryBeforeAccountStart {
                    account_name: account.name.clone(),
                    date,
                    start_date: account.start_date,
                });
            }
        }

        let (mut out_leg, mut in_leg) =
            transfer_pair(from_account.id, to_account.id, amount_cents, date);
        if let Some(desc) = description {
            out_leg = out_leg.with_description(desc.clone());
            in_leg = in_leg.with_description(desc);
        }

        self.repo.save_transfer_pair(&out_leg, &in_leg).await?;
        info!(
            from = %from_account.name,
            to = %to_account.name,
            amount = amount_cents,
            "transfer recorded"
        );

        Ok(TransferResult {
            out_leg,
            in_leg,
            from_account_name: from_account.name,
            to_account_name: to_account.name,
        })
    }

    /// List transactions, optionally restricted to one account.
    pub async fn list_transactions(
        &self,
        account_name: Option<&str>,
    ) -> Result<Vec<Transaction>, AppError> {
        match account_name {
            Some(name) => {
                let account = self.get_account(name).await?;
                Ok(self.repo.list_transactions_for_account(account.id).await?)
            }
            None => Ok(self.repo.list_transactions().await?),
        }
    }

    // ========================
    // Loan operations
    // ========================

    /// Register a loan contract. With a rate the installment is derived (or
    /// taken verbatim when the bank's figure is supplied); with only an
    /// installment the rate is solved from it; with neither the contract
    /// stays pending until configured.
    pub async fn register_loan(
        &self,
        name: String,
        principal_cents: Cents,
        monthly_rate_percent: Option<f64>,
        installment_cents: Option<Cents>,
        term_months: u32,
        start_date: NaiveDate,
    ) -> Result<LoanContract, AppError> {
        if principal_cents <= 0 {
            return Err(AppError::InvalidAmount(
                "Loan principal must be positive".to_string(),
            ));
        }
        if installment_cents.is_some_and(|i| i <= 0) {
            return Err(AppError::InvalidAmount(
                "Loan installment must be positive".to_string(),
            ));
        }
        if monthly_rate_percent.is_some_and(|r| r < 0.0) {
            return Err(AppError::InvalidOperation(
                "Monthly rate cannot be negative".to_string(),
            ));
        }
        if term_months == 0 {
            return Err(AppError::InvalidOperation(
                "Loan term must be at least one month".to_string(),
            ));
        }
        if self.repo.get_loan_by_name(&name).await?.is_some() {
            return Err(AppError::LoanAlreadyExists(name));
        }

        let loan = match (monthly_rate_percent, installment_cents) {
            (Some(rate), None) => {
                LoanContract::new(name, principal_cents, rate, term_months, start_date)
            }
            (Some(rate), Some(installment)) => {
                LoanContract::new(name, principal_cents, rate, term_months, start_date)
                    .with_installment(installment)
            }
            (None, Some(installment)) => {
                let rate = solve_monthly_rate(principal_cents, installment, term_months)?;
                LoanContract::new(name, principal_cents, rate, term_months, start_date)
                    .with_installment(installment)
            }
            (None, None) => LoanContract::pending(name, principal_cents, term_months, start_date),
        };

        self.repo.save_loan(&loan).await?;
        info!(loan = %loan.name, status = loan.status.as_str(), "loan registered");
        Ok(loan)
    }

    /// Complete a pending loan with its rate quote.
    pub async fn configure_loan(
        &self,
        name: &str,
        monthly_rate_percent: f64,
        installment_cents: Option<Cents>,
    ) -> Result<LoanContract, AppError> {
        if installment_cents.is_some_and(|i| i <= 0) {
            return Err(AppError::InvalidAmount(
                "Loan installment must be positive".to_string(),
            ));
        }
        if monthly_rate_percent < 0.0 {
            return Err(AppError::InvalidOperation(
                "Monthly rate cannot be negative".to_string(),
            ));
        }
        let mut loan = self.get_loan(name).await?;
        if loan.is_configured() {
            return Err(AppError::LoanAlreadyConfigured(name.to_string()));
        }

        loan.configure(monthly_rate_percent, installment_cents);
        self.repo.update_loan(&loan).await?;
        info!(loan = %loan.name, rate = loan.monthly_rate_percent, "loan configured");
        Ok(loan)
    }

    /// Get a loan by name.
    pub async fn get_loan(&self, name: &str) -> Result<LoanContract, AppError> {
        self.repo
            .get_loan_by_name(name)
            .await?
            .ok_or_else(|| AppError::LoanNotFound(name.to_string()))
    }

    /// List all loans.
    pub async fn list_loans(&self) -> Result<Vec<LoanContract>, AppError> {
        Ok(self.repo.list_loans().await?)
    }

    /// Full amortization schedule for a loan.
    pub async fn loan_schedule(
        &self,
        name: &str,
    ) -> Result<(LoanContract, Vec<ScheduleEntry>), AppError> {
        let loan = self.get_loan(name).await?;
        if !loan.is_configured() {
            return Err(AppError::LoanNotConfigured(name.to_string()));
        }
        let schedule = generate_schedule(&loan);
        Ok((loan, schedule))
    }

    /// Solve the monthly rate implied by a fixed installment.
    pub fn solve_rate(
        &self,
        principal_cents: Cents,
        payment_cents: Cents,
        periods: u32,
    ) -> Result<f64, AppError> {
        if principal_cents <= 0 {
            return Err(AppError::InvalidAmount(
                "Principal must be positive".to_string(),
            ));
        }
        if periods == 0 {
            return Err(AppError::InvalidOperation(
                "Periods must be at least one month".to_string(),
            ));
        }
        Ok(solve_monthly_rate(principal_cents, payment_cents, periods)?)
    }

    // ========================
    // Insurance operations
    // ========================

    /// Register an insurance policy paid in monthly installments.
    pub async fn register_policy(
        &self,
        name: String,
        premium_cents: Cents,
        term_months: u32,
        start_date: NaiveDate,
    ) -> Result<InsurancePolicy, AppError> {
        if premium_cents <= 0 {
            return Err(AppError::InvalidAmount(
                "Premium must be positive".to_string(),
            ));
        }
        if term_months == 0 {
            return Err(AppError::InvalidOperation(
                "Policy term must be at least one month".to_string(),
            ));
        }
        if self.repo.get_policy_by_name(&name).await?.is_some() {
            return Err(AppError::PolicyAlreadyExists(name));
        }

        let policy = InsurancePolicy::new(name, premium_cents, term_months, start_date);
        self.repo.save_policy(&policy).await?;
        info!(policy = %policy.name, "insurance policy registered");
        Ok(policy)
    }

    /// List all insurance policies.
    pub async fn list_policies(&self) -> Result<Vec<InsurancePolicy>, AppError> {
        Ok(self.repo.list_policies().await?)
    }

    // ========================
    // Fixed expense templates
    // ========================

    /// Register an open-ended monthly expense template.
    pub async fn register_template(
        &self,
        name: String,
        amount_cents: Cents,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
    ) -> Result<FixedExpenseTemplate, AppError> {
        if amount_cents <= 0 {
            return Err(AppError::InvalidAmount(
                "Amount must be positive".to_string(),
            ));
        }
        if end_date.is_some_and(|end| end < start_date) {
            return Err(AppError::InvalidOperation(
                "End date cannot precede the start date".to_string(),
            ));
        }
        if self.repo.get_template_by_name(&name).await?.is_some() {
            return Err(AppError::TemplateAlreadyExists(name));
        }

        let mut template = FixedExpenseTemplate::new(name, amount_cents, start_date);
        if let Some(end) = end_date {
            template = template.with_end_date(end);
        }

        self.repo.save_template(&template).await?;
        info!(template = %template.name, "expense template registered");
        Ok(template)
    }

    /// List all fixed expense templates.
    pub async fn list_templates(&self) -> Result<Vec<FixedExpenseTemplate>, AppError> {
        Ok(self.repo.list_templates().await?)
    }

    /// Enable or disable a template's projections.
    pub async fn set_template_active(
        &self,
        name: &str,
        active: bool,
    ) -> Result<FixedExpenseTemplate, AppError> {
        let mut template = self
            .repo
            .get_template_by_name(name)
            .await?
            .ok_or_else(|| AppError::TemplateNotFound(name.to_string()))?;

        template.set_active(active);
        self.repo.update_template(&template).await?;
        info!(template = %template.name, active, "expense template toggled");
        Ok(template)
    }

    // ========================
    // Fixed asset operations
    // ========================

    /// Register a fixed asset (vehicle, real estate) at its current value.
    pub async fn register_asset(
        &self,
        name: String,
        kind: FixedAssetKind,
        current_value_cents: Cents,
        valued_at: NaiveDate,
        reference: Option<String>,
    ) -> Result<FixedAsset, AppError> {
        if current_value_cents < 0 {
            return Err(AppError::InvalidAmount(
                "Asset value cannot be negative".to_string(),
            ));
        }
        if self.repo.get_asset_by_name(&name).await?.is_some() {
            return Err(AppError::AssetAlreadyExists(name));
        }

        let mut asset = FixedAsset::new(name, kind, current_value_cents, valued_at);
        if let Some(reference) = reference {
            asset = asset.with_reference(reference);
        }

        self.repo.save_asset(&asset).await?;
        info!(asset = %asset.name, kind = asset.kind.as_str(), "fixed asset registered");
        Ok(asset)
    }

    /// List all fixed assets.
    pub async fn list_assets(&self) -> Result<Vec<FixedAsset>, AppError> {
        Ok(self.repo.list_assets().await?)
    }

    /// Replace an asset's appraisal.
    pub async fn revalue_asset(
        &self,
        name: &str,
        current_value_cents: Cents,
        valued_at: NaiveDate,
    ) -> Result<FixedAsset, AppError> {
        if current_value_cents < 0 {
            return Err(AppError::InvalidAmount(
                "Asset value cannot be negative".to_string(),
            ));
        }
        let mut asset = self
            .repo
            .get_asset_by_name(name)
            .await?
            .ok_or_else(|| AppError::AssetNotFound(name.to_string()))?;

        asset.set_value(current_value_cents, valued_at);
        self.repo.update_asset_value(&asset).await?;
        info!(asset = %asset.name, value = asset.current_value_cents, "fixed asset revalued");
        Ok(asset)
    }

    /// Refresh every referenced asset's value through a valuation provider.
    /// Assets without a reference keep their manual appraisal.
    pub async fn refresh_asset_values(
        &self,
        provider: &dyn ValuationProvider,
        valued_at: NaiveDate,
    ) -> Result<Vec<FixedAsset>, AppError> {
        let assets = self.repo.list_assets().await?;
        let mut refreshed = Vec::new();

        for mut asset in assets {
            let Some(reference) = asset.reference.clone() else {
                debug!(asset = %asset.name, "no reference, keeping manual value");
                continue;
            };
            let value =
                provider
                    .current_value(&reference)
                    .map_err(|e| AppError::Valuation {
                        reference: reference.clone(),
                        message: e.to_string(),
                    })?;
            if value < 0 {
                return Err(AppError::Valuation {
                    reference,
                    message: format!("provider returned a negative value: {}", value),
                });
            }
            asset.set_value(value, valued_at);
            self.repo.update_asset_value(&asset).await?;
            refreshed.push(asset);
        }

        Ok(refreshed)
    }

    // ========================
    // Bill operations
    // ========================

    async fn recurring_sources(&self) -> Result<Vec<RecurringSource>, AppError> {
        let mut sources = Vec::new();
        for loan in self.repo.list_loans().await? {
            sources.push(RecurringSource::Loan(loan));
        }
        for policy in self.repo.list_policies().await? {
            sources.push(RecurringSource::Insurance(policy));
        }
        for template in self.repo.list_templates().await? {
            sources.push(RecurringSource::FixedExpense(template));
        }
        Ok(sources)
    }

    async fn resolve_source_by_name(
        &self,
        name: &str,
    ) -> Result<Option<RecurringSource>, AppError> {
        if let Some(loan) = self.repo.get_loan_by_name(name).await? {
            return Ok(Some(RecurringSource::Loan(loan)));
        }
        if let Some(policy) = self.repo.get_policy_by_name(name).await? {
            return Ok(Some(RecurringSource::Insurance(policy)));
        }
        if let Some(template) = self.repo.get_template_by_name(name).await? {
            return Ok(Some(RecurringSource::FixedExpense(template)));
        }
        Ok(None)
    }

    async fn resolve_source_by_key(
        &self,
        key: &BillKey,
    ) -> Result<Option<RecurringSource>, AppError> {
        Ok(match key.kind {
            BillSourceKind::Loan => self
                .repo
                .get_loan(key.source_id)
                .await?
                .map(RecurringSource::Loan),
            BillSourceKind::Insurance => self
                .repo
                .get_policy(key.source_id)
                .await?
                .map(RecurringSource::Insurance),
            BillSourceKind::FixedExpense => self
                .repo
                .get_template(key.source_id)
                .await?
                .map(RecurringSource::FixedExpense),
            BillSourceKind::Manual => None,
        })
    }

    /// Resolve a source name (loan, policy, template — or a manual bill's
    /// description) plus an optional installment number into a bill key.
    /// Without an explicit installment, counted sources use the next unpaid
    /// one and templates the installment positioned in `month`.
    pub async fn find_bill_key(
        &self,
        name: &str,
        installment: Option<u32>,
        month: Month,
    ) -> Result<BillKey, AppError> {
        if let Some(source) = self.resolve_source_by_name(name).await? {
            let installment = match (installment, source.term()) {
                (Some(k), _) => k,
                (None, Some(_)) => source.installments_paid() + 1,
                (None, None) => source.installment_in(month).ok_or_else(|| {
                    AppError::InvalidOperation(format!(
                        "template '{}' has no installment due in {}",
                        name, month
                    ))
                })?,
            };
            return Ok(source.key_for(installment));
        }

        // Fall back to manual bills, matched by description.
        let tracked = self.repo.list_tracked_bills().await?;
        tracked
            .iter()
            .find(|bill| bill.description == name && !bill.is_paid)
            .map(|bill| bill.key)
            .ok_or_else(|| AppError::BillSourceNotFound(name.to_string()))
    }

    /// Bills for one month: every unpaid projected installment, tracked
    /// rows due in the month, and the first upcoming installment per source
    /// beyond it.
    pub async fn bills_for_month(&self, month: Month) -> Result<BillsView, AppError> {
        let sources = self.recurring_sources().await?;
        let tracked = self.repo.list_tracked_bills().await?;

        let mut bills = potential_bills(month, &sources, &tracked);

        // Tracked rows nothing projects anymore (manual bills, sources gone
        // inactive) still belong to the month they are due in.
        let seen: HashSet<BillKey> = bills.iter().map(|b| b.key).collect();
        for row in &tracked {
            if month.contains(row.due_date) && !seen.contains(&row.key) {
                bills.push(surface_tracked(row));
            }
        }
        bills.sort_by(|a, b| (a.due_date, &a.description).cmp(&(b.due_date, &b.description)));

        let future = future_bills(month, &sources, &tracked);

        let total_due = bills
            .iter()
            .filter(|b| !b.is_paid)
            .map(|b| b.amount_cents)
            .sum();
        let total_included = bills
            .iter()
            .filter(|b| !b.is_paid && b.is_included)
            .map(|b| b.amount_cents)
            .sum();

        Ok(BillsView {
            from_date: month.first_day(),
            to_date: month.last_day(),
            bills,
            future,
            total_due,
            total_included,
        })
    }

    /// Track a bill key as included in the plan. Idempotent: returns whether
    /// a row was actually created.
    pub async fn include_bill(&self, key: BillKey) -> Result<bool, AppError> {
        if self.repo.get_tracked_bill(&key).await?.is_some() {
            return Ok(false);
        }

        let source = self
            .resolve_source_by_key(&key)
            .await?
            .ok_or_else(|| AppError::BillSourceNotFound(key.to_string()))?;
        let potential = source
            .bill_at(key.installment)
            .ok_or_else(|| AppError::BillSourceNotFound(key.to_string()))?;

        let bill = TrackedBill::from_potential(&potential);
        let inserted = self.repo.insert_tracked_bill(&bill).await?;
        debug!(key = %key, inserted, "bill included");
        Ok(inserted)
    }

    /// Drop a bill key from the plan. Idempotent: returns whether a row
    /// existed.
    pub async fn exclude_bill(&self, key: BillKey) -> Result<bool, AppError> {
        let removed = self.repo.delete_tracked_bill(&key).await?;
        debug!(key = %key, removed, "bill excluded");
        Ok(removed)
    }

    /// List every tracked bill.
    pub async fn list_tracked_bills(&self) -> Result<Vec<TrackedBill>, AppError> {
        Ok(self.repo.list_tracked_bills().await?)
    }

    /// Track an ad-hoc bill that no contract generates.
    pub async fn track_manual_bill(
        &self,
        description: String,
        due_date: NaiveDate,
        amount_cents: Cents,
    ) -> Result<TrackedBill, AppError> {
        if amount_cents <= 0 {
            return Err(AppError::InvalidAmount(
                "Amount must be positive".to_string(),
            ));
        }

        let bill = TrackedBill::manual(description, due_date, amount_cents);
        self.repo.insert_tracked_bill(&bill).await?;
        info!(bill = %bill.description, "manual bill tracked");
        Ok(bill)
    }

    /// Settle a bill: record the matching ledger entry, mark the bill paid
    /// and advance the source contract's counter, all in one storage
    /// transaction.
    pub async fn pay_bill(
        &self,
        key: BillKey,
        account_name: &str,
        date: Option<NaiveDate>,
    ) -> Result<PaymentResult, AppError> {
        let account = self.get_account(account_name).await?;

        let tracked = self.repo.get_tracked_bill(&key).await?;
        let bill_is_new = tracked.is_none();
        let mut bill = match tracked {
            Some(row) => row,
            None => {
                let source = self
                    .resolve_source_by_key(&key)
                    .await?
                    .ok_or_else(|| AppError::BillSourceNotFound(key.to_string()))?;
                let potential = source
                    .bill_at(key.installment)
                    .ok_or_else(|| AppError::BillSourceNotFound(key.to_string()))?;
                TrackedBill::from_potential(&potential)
            }
        };

        if bill.is_paid {
            return Err(AppError::BillAlreadyPaid(bill.description));
        }

        let date = date.unwrap_or(bill.due_date);
        if date < account.start_date {
            return Err(AppError::EntryBeforeAccountStart {
                account_name: account.name,
                date,
                start_date: account.start_date,
            });
        }

        let kind = match key.kind {
            BillSourceKind::Loan => OperationKind::LoanPayment,
            _ => OperationKind::Expense,
        };
        let entry = Transaction::new(account.id, date, bill.amount_cents, kind, Flow::Out)
            .with_description(bill.description.clone());

        let loan = match key.kind {
            BillSourceKind::Loan => {
                let mut loan = self
                    .repo
                    .get_loan(key.source_id)
                    .await?
                    .ok_or_else(|| AppError::BillSourceNotFound(key.to_string()))?;
                loan.record_payment();
                Some(loan)
            }
            _ => None,
        };
        let policy = match key.kind {
            BillSourceKind::Insurance => {
                let mut policy = self
                    .repo
                    .get_policy(key.source_id)
                    .await?
                    .ok_or_else(|| AppError::BillSourceNotFound(key.to_string()))?;
                policy.record_payment();
                Some(policy)
            }
            _ => None,
        };

        bill.mark_paid();
        self.repo
            .apply_settlement(&entry, &bill, bill_is_new, loan.as_ref(), policy.as_ref())
            .await?;

        if let Some(loan) = &loan {
            if loan.status == LoanStatus::PaidOff {
                info!(loan = %loan.name, "loan fully repaid");
            }
        }
        info!(bill = %bill.description, account = %account_name, "bill settled");

        Ok(PaymentResult { entry, bill, loan })
    }

    // ========================
    // Aggregation
    // ========================

    /// Reconciliation counter for a loan as seen from `as_of`: paid tracked
    /// bills due by then, plus the slice of the contract counter that
    /// predates bill tracking.
    async fn installments_paid_as_of(
        &self,
        loan: &LoanContract,
        as_of: NaiveDate,
    ) -> Result<u32, AppError> {
        let total_tracked = self
            .repo
            .count_paid_bills_for_source(BillSourceKind::Loan, loan.id, None)
            .await? as u32;
        let dated = self
            .repo
            .count_paid_bills_for_source(BillSourceKind::Loan, loan.id, Some(as_of))
            .await? as u32;
        let untracked = loan.installments_paid.saturating_sub(total_tracked);
        Ok((dated + untracked).min(loan.term_months))
    }

    /// Net worth as of a date: asset-class balances and fixed assets against
    /// remaining loan principal and revolving debt.
    pub async fn net_worth_as_of(&self, as_of: NaiveDate) -> Result<NetWorthReport, AppError> {
        let accounts = self.repo.list_accounts().await?;
        let entries = self.repo.list_transactions().await?;

        let mut warnings = Vec::new();
        for id in missing_account_ids(&accounts, &entries) {
            warn!(account_id = %id, "entries reference an unknown account, contributing zero");
            warnings.push(format!(
                "entries reference unknown account {}; treated as zero",
                id
            ));
        }

        let balances = balances_as_of(&accounts, &entries, as_of);

        let mut assets = Vec::new();
        let mut total_assets: Cents = 0;
        for account in &accounts {
            if !account.kind.is_asset_class() {
                continue;
            }
            let balance = balances.get(&account.id).copied().unwrap_or(0);
            total_assets += balance;
            assets.push(AssetLine {
                name: account.name.clone(),
                kind: account.kind.as_str().to_string(),
                value: balance,
            });
        }
        for asset in self.repo.list_assets().await? {
            total_assets += asset.current_value_cents;
            assets.push(AssetLine {
                name: asset.name,
                kind: asset.kind.as_str().to_string(),
                value: asset.current_value_cents,
            });
        }

        let mut liabilities = Vec::new();
        let mut total_liabilities: Cents = 0;
        for loan in self.repo.list_loans().await? {
            if !loan.is_active() {
                continue;
            }
            let paid = self.installments_paid_as_of(&loan, as_of).await?;
            let remaining = remaining_principal(&loan, paid);
            if remaining > 0 {
                total_liabilities += remaining;
                liabilities.push(LiabilityLine {
                    name: loan.name,
                    kind: "loan".to_string(),
                    amount: remaining,
                });
            }
        }
        for account in &accounts {
            if !account.kind.is_revolving() {
                continue;
            }
            let balance = balances.get(&account.id).copied().unwrap_or(0);
            if balance < 0 {
                total_liabilities += -balance;
                liabilities.push(LiabilityLine {
                    name: account.name.clone(),
                    kind: account.kind.as_str().to_string(),
                    amount: -balance,
                });
            }
        }

        Ok(NetWorthReport {
            as_of,
            total_assets,
            total_liabilities,
            net_worth: total_assets - total_liabilities,
            assets,
            liabilities,
            warnings,
        })
    }

    /// Financial health indicators over the aggregates and a trailing
    /// three-month window (the month of `as_of` and the two before it).
    pub async fn health_report(&self, as_of: NaiveDate) -> Result<HealthReport, AppError> {
        let net_worth = self.net_worth_as_of(as_of).await?;

        let window_from = Month::containing(as_of).add_months(-2).first_day();
        let entries = self
            .repo
            .list_transactions_between(window_from, as_of)
            .await?;
        let flows = window_flows(&entries, window_from, as_of);
        let avg_monthly_outflow = flows.expense_cents / 3;

        let accounts = self.repo.list_accounts().await?;
        let all_entries = self.repo.list_transactions().await?;
        let balances = balances_as_of(&accounts, &all_entries, as_of);
        let liquid: Cents = accounts
            .iter()
            .filter(|a| a.kind.is_liquid())
            .map(|a| balances.get(&a.id).copied().unwrap_or(0))
            .sum();

        let liquidity = liquidity_ratio(liquid, avg_monthly_outflow);
        let debt = debt_ratio(net_worth.total_liabilities, net_worth.total_assets);
        let margin = savings_margin(flows.income_cents, flows.expense_cents);

        let readings = vec![
            IndicatorReading {
                name: "liquidity_ratio".to_string(),
                value: liquidity,
                status: LIQUIDITY.classify(liquidity),
            },
            IndicatorReading {
                name: "debt_ratio".to_string(),
                value: debt,
                status: DEBT_RATIO.classify(debt),
            },
            IndicatorReading {
                name: "savings_margin".to_string(),
                value: margin,
                status: SAVINGS_MARGIN.classify(margin),
            },
        ];
        let overall = readings
            .iter()
            .map(|r| r.status)
            .max()
            .unwrap_or(IndicatorStatus::Good);

        Ok(HealthReport {
            as_of,
            window_from,
            window_to: as_of,
            readings,
            overall,
        })
    }

    /// Run the ledger integrity checks.
    pub async fn doctor(&self) -> Result<IntegrityReport, AppError> {
        let accounts = self.repo.list_accounts().await?;
        let entries = self.repo.list_transactions().await?;
        Ok(check_ledger(&accounts, &entries))
    }

    // ========================
    // Statement import
    // ========================

    /// Import a CSV bank statement into one account. Parsing is atomic
    /// (any malformed row fails the whole import before a single write),
    /// the commit is one storage transaction, and concurrent imports into
    /// the same account are rejected.
    pub async fn import_statement<R: std::io::Read>(
        &self,
        account_name: &str,
        reader: R,
    ) -> Result<ImportOutcome, AppError> {
        let account = self.get_account(account_name).await?;

        {
            let mut in_flight = self
                .imports_in_flight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !in_flight.insert(account.id) {
                return Err(AppError::ImportInProgress(account.name));
            }
        }

        let result = self.import_into(&account, reader).await;

        let mut in_flight = self
            .imports_in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        in_flight.remove(&account.id);

        result
    }

    async fn import_into<R: std::io::Read>(
        &self,
        account: &Account,
        reader: R,
    ) -> Result<ImportOutcome, AppError> {
        let candidates = parse_statement(reader)?;

        let mut entries = Vec::with_capacity(candidates.len());
        let mut inflow: Cents = 0;
        let mut outflow: Cents = 0;
        for candidate in candidates {
            if candidate.date < account.start_date {
                return Err(AppError::EntryBeforeAccountStart {
                    account_name: account.name.clone(),
                    date: candidate.date,
                    start_date: account.start_date,
                });
            }

            let (kind, flow) = if candidate.amount_cents < 0 {
                (OperationKind::Expense, Flow::Out)
            } else {
                (OperationKind::Income, Flow::In)
            };
            let magnitude = candidate.amount_cents.abs();
            if flow.is_inflow() {
                inflow += magnitude;
            } else {
                outflow += magnitude;
            }

            let mut entry = Transaction::new(account.id, candidate.date, magnitude, kind, flow);
            if let Some(category) = candidate.category {
                entry = entry.with_category(category);
            }
            entry = entry.with_description(candidate.description);
            entries.push(entry);
        }

        self.repo.save_transactions_atomic(&entries).await?;
        info!(
            account = %account.name,
            imported = entries.len(),
            "statement imported"
        );

        Ok(ImportOutcome {
            imported: entries.len(),
            inflow_cents: inflow,
            outflow_cents: outflow,
        })
    }
}
