use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};

use crate::application::FinanceService;
use crate::domain::{
    format_cents, parse_cents, AccountKind, FixedAssetKind, Flow, Month, OperationKind,
};

/// Patrimonio - Household Finance Tracker
#[derive(Parser)]
#[command(name = "patrimonio")]
#[command(about = "A local-first household finance tool: balances, loans, and upcoming bills")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "patrimonio.db")]
    pub database: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Account management commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Transaction commands
    #[command(subcommand)]
    Tx(TxCommands),

    /// Loan contract commands
    #[command(subcommand)]
    Loan(LoanCommands),

    /// Insurance policy commands
    #[command(subcommand)]
    Insurance(InsuranceCommands),

    /// Fixed monthly expense commands
    #[command(subcommand)]
    Fixed(FixedCommands),

    /// Fixed asset commands (vehicles, real estate)
    #[command(subcommand)]
    Asset(AssetCommands),

    /// Upcoming bill commands
    #[command(subcommand)]
    Bills(BillsCommands),

    /// Reports and analytics
    #[command(subcommand)]
    Report(ReportCommands),

    /// Import a CSV bank statement into an account
    Import {
        /// Target account name
        #[arg(short, long)]
        account: String,

        /// Input file (stdin if omitted)
        #[arg(short, long)]
        input: Option<String>,
    },

    /// Export data to CSV or JSON
    Export {
        /// What to export: transactions, balances, full
        export_type: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,

        /// Balance date for the balances export (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        as_of: Option<String>,
    },

    /// Check ledger integrity
    Doctor,
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Create a new account
    Create {
        /// Account name (must be unique)
        name: String,

        /// Account kind: checking, savings, fixed-income, reserve, goal, credit-card, crypto
        #[arg(short, long)]
        kind: String,

        /// Currency code (e.g., EUR, USD)
        #[arg(short, long, default_value = "EUR")]
        currency: String,

        /// Opening balance (e.g., "1000.00")
        #[arg(long, default_value = "0")]
        initial: String,

        /// Date the account enters the ledger (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        start_date: Option<String>,

        /// Description
        #[arg(long)]
        description: Option<String>,
    },

    /// List all accounts
    List,

    /// Show detailed account information
    Show {
        /// Account name
        name: String,
    },
}

#[derive(Subcommand)]
pub enum TxCommands {
    /// Record a transaction
    Add {
        /// Amount (e.g., "50.00" or "50")
        amount: String,

        /// Account name
        #[arg(short, long)]
        account: String,

        /// Operation kind: income, expense, yield, investment, redemption, loan-payment
        #[arg(short, long, default_value = "expense")]
        kind: String,

        /// Date (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<String>,

        /// Category (e.g., "groceries", "utilities")
        #[arg(short, long)]
        category: Option<String>,

        /// Description
        #[arg(long)]
        description: Option<String>,
    },

    /// Record a transfer between two own accounts
    Transfer {
        /// Amount to transfer
        amount: String,

        /// Source account name
        #[arg(long)]
        from: String,

        /// Destination account name
        #[arg(long)]
        to: String,

        /// Date (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<String>,

        /// Description
        #[arg(long)]
        description: Option<String>,
    },

    /// List transactions
    List {
        /// Filter by account name
        #[arg(long)]
        account: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum LoanCommands {
    /// Register a loan contract
    Register {
        /// Loan name (must be unique)
        name: String,

        /// Principal amount (e.g., "10000.00")
        #[arg(short, long)]
        principal: String,

        /// Monthly rate percentage (e.g., "2.0"); omit to solve it from
        /// the installment, or to leave the contract pending
        #[arg(short, long)]
        rate: Option<f64>,

        /// Contractual installment (e.g., "945.60"); overrides the derived one
        #[arg(short, long)]
        installment: Option<String>,

        /// Term in months
        #[arg(short, long)]
        term: u32,

        /// First installment month (YYYY-MM-DD, the day is the monthly due day)
        #[arg(long)]
        start_date: String,
    },

    /// Complete a pending loan with its rate quote
    Configure {
        /// Loan name
        name: String,

        /// Monthly rate percentage
        #[arg(short, long)]
        rate: f64,

        /// Contractual installment; omit to derive it from the rate
        #[arg(short, long)]
        installment: Option<String>,
    },

    /// List all loans
    List,

    /// Show the full amortization schedule
    Schedule {
        /// Loan name
        name: String,
    },

    /// Solve the monthly rate implied by a fixed installment
    SolveRate {
        /// Principal amount (e.g., "10000.00")
        #[arg(short, long)]
        principal: String,

        /// Monthly payment (e.g., "945.60")
        #[arg(long)]
        payment: String,

        /// Number of monthly payments
        #[arg(long)]
        periods: u32,
    },
}

#[derive(Subcommand)]
pub enum InsuranceCommands {
    /// Register an insurance policy paid in monthly installments
    Register {
        /// Policy name (must be unique)
        name: String,

        /// Monthly premium (e.g., "120.00")
        #[arg(long)]
        premium: String,

        /// Term in months
        #[arg(short, long)]
        term: u32,

        /// First installment month (YYYY-MM-DD)
        #[arg(long)]
        start_date: String,
    },

    /// List all insurance policies
    List,
}

#[derive(Subcommand)]
pub enum FixedCommands {
    /// Register a fixed monthly expense
    Register {
        /// Expense name (must be unique)
        name: String,

        /// Monthly amount (e.g., "800.00")
        #[arg(short, long)]
        amount: String,

        /// First due month (YYYY-MM-DD, the day is the monthly due day)
        #[arg(long)]
        start_date: String,

        /// Optional last due date (YYYY-MM-DD)
        #[arg(long)]
        end_date: Option<String>,
    },

    /// List all fixed expenses
    List,

    /// Resume projections for a fixed expense
    Enable {
        /// Expense name
        name: String,
    },

    /// Stop projections for a fixed expense
    Disable {
        /// Expense name
        name: String,
    },
}

#[derive(Subcommand)]
pub enum AssetCommands {
    /// Register a fixed asset at its current value
    Register {
        /// Asset name (must be unique)
        name: String,

        /// Asset kind: vehicle, real-estate
        #[arg(short, long)]
        kind: String,

        /// Current value (e.g., "45000.00")
        #[arg(long)]
        value: String,

        /// Appraisal date (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        valued_at: Option<String>,

        /// External reference for market lookups (e.g., a price-table code)
        #[arg(long)]
        reference: Option<String>,
    },

    /// List all fixed assets
    List,

    /// Replace an asset's appraisal
    SetValue {
        /// Asset name
        name: String,

        /// New value (e.g., "43500.00")
        #[arg(long)]
        value: String,

        /// Appraisal date (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum BillsCommands {
    /// Show the bills due in a month, plus the next upcoming ones
    View {
        /// Month (YYYY-MM, defaults to the current month)
        month: Option<String>,
    },

    /// Show only the upcoming bills beyond a month
    Future {
        /// Month (YYYY-MM, defaults to the current month)
        month: Option<String>,
    },

    /// Track a bill in the plan (advance a future installment into view)
    Include {
        /// Source name (loan, policy or fixed expense)
        name: String,

        /// Installment number (defaults to the next unpaid one)
        installment: Option<u32>,
    },

    /// Drop a tracked bill from the plan
    Exclude {
        /// Source name (loan, policy or fixed expense)
        name: String,

        /// Installment number (defaults to the next unpaid one)
        installment: Option<u32>,
    },

    /// Track an ad-hoc bill that no contract generates
    Add {
        /// Bill description
        description: String,

        /// Amount due (e.g., "250.00")
        #[arg(short, long)]
        amount: String,

        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: String,
    },

    /// Settle a bill: record the payment and mark it paid
    Pay {
        /// Source name (loan, policy, fixed expense or manual bill description)
        name: String,

        /// Installment number (defaults to the next unpaid one)
        installment: Option<u32>,

        /// Account the payment leaves from
        #[arg(short, long)]
        account: String,

        /// Payment date (YYYY-MM-DD, defaults to the bill's due date)
        #[arg(long)]
        date: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ReportCommands {
    /// Net worth summary
    NetWorth {
        /// Valuation date (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        as_of: Option<String>,

        /// Output format: table, json
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Financial health indicators
    Health {
        /// Valuation date (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        as_of: Option<String>,

        /// Output format: table, json
        #[arg(long, default_value = "table")]
        format: String,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        init_tracing(self.verbose);

        match self.command {
            Commands::Init => {
                FinanceService::init(&self.database).await?;
                println!("Database initialized: {}", self.database);
            }

            Commands::Account(account_cmd) => {
                let service = FinanceService::connect(&self.database).await?;
                run_account_command(&service, account_cmd).await?;
            }

            Commands::Tx(tx_cmd) => {
                let service = FinanceService::connect(&self.database).await?;
                run_tx_command(&service, tx_cmd).await?;
            }

            Commands::Loan(loan_cmd) => {
                let service = FinanceService::connect(&self.database).await?;
                run_loan_command(&service, loan_cmd).await?;
            }

            Commands::Insurance(insurance_cmd) => {
                let service = FinanceService::connect(&self.database).await?;
                run_insurance_command(&service, insurance_cmd).await?;
            }

            Commands::Fixed(fixed_cmd) => {
                let service = FinanceService::connect(&self.database).await?;
                run_fixed_command(&service, fixed_cmd).await?;
            }

            Commands::Asset(asset_cmd) => {
                let service = FinanceService::connect(&self.database).await?;
                run_asset_command(&service, asset_cmd).await?;
            }

            Commands::Bills(bills_cmd) => {
                let service = FinanceService::connect(&self.database).await?;
                run_bills_command(&service, bills_cmd).await?;
            }

            Commands::Report(report_cmd) => {
                let service = FinanceService::connect(&self.database).await?;
                run_report_command(&service, report_cmd).await?;
            }

            Commands::Import { account, input } => {
                let service = FinanceService::connect(&self.database).await?;
                run_import_command(&service, &account, input.as_deref()).await?;
            }

            Commands::Export {
                export_type,
                output,
                as_of,
            } => {
                let service = FinanceService::connect(&self.database).await?;
                run_export_command(&service, &export_type, output.as_deref(), as_of.as_deref())
                    .await?;
            }

            Commands::Doctor => {
                let service = FinanceService::connect(&self.database).await?;
                run_doctor_command(&service).await?;
            }
        }

        Ok(())
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = if verbose {
        "patrimonio=debug"
    } else {
        "patrimonio=warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run_account_command(service: &FinanceService, cmd: AccountCommands) -> Result<()> {
    match cmd {
        AccountCommands::Create {
            name,
            kind,
            currency,
            initial,
            start_date,
            description,
        } => {
            let kind = AccountKind::from_str(&kind).ok_or_else(|| {
                anyhow::anyhow!(
                    "Invalid account kind '{}'. Valid kinds: checking, savings, fixed-income, reserve, goal, credit-card, crypto",
                    kind
                )
            })?;
            let initial_cents =
                parse_cents(&initial).context("Invalid amount format. Use '1000.00' or '1000'")?;
            let start = match start_date {
                Some(s) => parse_date(&s)?,
                None => today(),
            };

            let account = service
                .create_account(name, kind, currency, initial_cents, start, description)
                .await?;
            println!("Created account: {} ({})", account.name, account.kind);
        }

        AccountCommands::List => {
            let accounts = service.list_accounts().await?;
            if accounts.is_empty() {
                println!("No accounts found.");
            } else {
                println!(
                    "{:<20} {:<14} {:<8} {:<12}",
                    "NAME", "KIND", "CURRENCY", "START"
                );
                println!("{}", "-".repeat(58));
                for account in accounts {
                    println!(
                        "{:<20} {:<14} {:<8} {:<12}",
                        account.name, account.kind, account.currency, account.start_date
                    );
                }
            }
        }

        AccountCommands::Show { name } => {
            let entry = service.account_balance(&name, today()).await?;
            let entries = service.list_transactions(Some(&name)).await?;
            let account = &entry.account;

            println!("Account: {}", account.name);
            println!("  ID:         {}", account.id);
            println!("  Kind:       {}", account.kind);
            println!("  Currency:   {}", account.currency);
            println!("  Start date: {}", account.start_date);
            println!(
                "  Initial:    {}",
                format_cents(account.initial_balance_cents)
            );
            if let Some(desc) = &account.description {
                println!("  Description: {}", desc);
            }
            println!();
            println!(
                "  Balance:    {} {}",
                format_cents(entry.balance),
                account.currency
            );
            println!("  Entries:    {}", entries.len());
        }
    }
    Ok(())
}

async fn run_tx_command(service: &FinanceService, cmd: TxCommands) -> Result<()> {
    match cmd {
        TxCommands::Add {
            amount,
            account,
            kind,
            date,
            category,
            description,
        } => {
            let amount_cents =
                parse_cents(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
            let kind = OperationKind::from_str(&kind).ok_or_else(|| {
                anyhow::anyhow!(
                    "Invalid operation kind '{}'. Valid kinds: income, expense, yield, investment, redemption, loan-payment",
                    kind
                )
            })?;
            let date = match date {
                Some(s) => parse_date(&s)?,
                None => today(),
            };

            let entry = service
                .record_transaction(
                    &account,
                    date,
                    amount_cents,
                    kind,
                    default_flow(kind),
                    category,
                    description,
                )
                .await?;
            println!(
                "Recorded {}: {} on {} ({})",
                entry.kind,
                format_cents(entry.signed_cents()),
                account,
                entry.id
            );
        }

        TxCommands::Transfer {
            amount,
            from,
            to,
            date,
            description,
        } => {
            let amount_cents =
                parse_cents(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
            let date = match date {
                Some(s) => parse_date(&s)?,
                None => today(),
            };

            let result = service
                .record_transfer(&from, &to, amount_cents, date, description)
                .await?;
            println!(
                "Recorded transfer: {} {} -> {}",
                format_cents(result.out_leg.amount_cents),
                result.from_account_name,
                result.to_account_name
            );
        }

        TxCommands::List { account } => {
            let entries = service.list_transactions(account.as_deref()).await?;
            if entries.is_empty() {
                println!("No transactions found.");
            } else {
                let account_names = service.get_account_names().await?;

                println!(
                    "{:<12} {:>12} {:<14} {:<16} DESCRIPTION",
                    "DATE", "AMOUNT", "KIND", "ACCOUNT"
                );
                println!("{}", "-".repeat(76));
                for entry in &entries {
                    let account_name = account_names
                        .get(&entry.account_id)
                        .map(|s| s.as_str())
                        .unwrap_or("?");
                    println!(
                        "{:<12} {:>12} {:<14} {:<16} {}",
                        entry.date.to_string(),
                        format_cents(entry.signed_cents()),
                        entry.kind.as_str(),
                        truncate(account_name, 16),
                        truncate(entry.description.as_deref().unwrap_or(""), 30)
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run_loan_command(service: &FinanceService, cmd: LoanCommands) -> Result<()> {
    match cmd {
        LoanCommands::Register {
            name,
            principal,
            rate,
            installment,
            term,
            start_date,
        } => {
            let principal_cents = parse_cents(&principal).context("Invalid principal format")?;
            let installment_cents = installment
                .map(|i| parse_cents(&i))
                .transpose()
                .context("Invalid installment format")?;
            let start = parse_date(&start_date)?;

            let loan = service
                .register_loan(name, principal_cents, rate, installment_cents, term, start)
                .await?;

            println!("Registered loan: {} ({})", loan.name, loan.status);
            println!("  Principal:   {}", format_cents(loan.principal_cents));
            println!("  Term:        {} months", loan.term_months);
            if loan.is_configured() {
                println!("  Rate:        {:.4}%/month", loan.monthly_rate_percent);
                println!("  Installment: {}", format_cents(loan.installment_cents));
            } else {
                println!("  Rate:        pending (run 'loan configure')");
            }
        }

        LoanCommands::Configure {
            name,
            rate,
            installment,
        } => {
            let installment_cents = installment
                .map(|i| parse_cents(&i))
                .transpose()
                .context("Invalid installment format")?;

            let loan = service.configure_loan(&name, rate, installment_cents).await?;
            println!(
                "Configured loan: {} at {:.4}%/month, installment {}",
                loan.name,
                loan.monthly_rate_percent,
                format_cents(loan.installment_cents)
            );
        }

        LoanCommands::List => {
            let loans = service.list_loans().await?;
            if loans.is_empty() {
                println!("No loans found.");
            } else {
                println!(
                    "{:<20} {:<14} {:>12} {:>9} {:>12} {:>9}",
                    "NAME", "STATUS", "PRINCIPAL", "RATE", "INSTALLMENT", "PAID"
                );
                println!("{}", "-".repeat(82));
                for loan in loans {
                    println!(
                        "{:<20} {:<14} {:>12} {:>8.2}% {:>12} {:>5}/{:<3}",
                        truncate(&loan.name, 20),
                        loan.status.as_str(),
                        format_cents(loan.principal_cents),
                        loan.monthly_rate_percent,
                        format_cents(loan.installment_cents),
                        loan.installments_paid,
                        loan.term_months
                    );
                }
            }
        }

        LoanCommands::Schedule { name } => {
            let (loan, schedule) = service.loan_schedule(&name).await?;

            println!("Amortization schedule: {}", loan.name);
            println!(
                "  {} at {:.4}%/month over {} months, installment {}",
                format_cents(loan.principal_cents),
                loan.monthly_rate_percent,
                loan.term_months,
                format_cents(loan.installment_cents)
            );
            println!();
            println!(
                "{:>4} {:>12} {:>12} {:>14}",
                "#", "INTEREST", "PRINCIPAL", "BALANCE"
            );
            println!("{}", "-".repeat(46));
            for entry in &schedule {
                println!(
                    "{:>4} {:>12} {:>12} {:>14}",
                    entry.number,
                    format_cents(entry.interest_cents),
                    format_cents(entry.principal_cents),
                    format_cents(entry.balance_cents)
                );
            }
        }

        LoanCommands::SolveRate {
            principal,
            payment,
            periods,
        } => {
            let principal_cents = parse_cents(&principal).context("Invalid principal format")?;
            let payment_cents = parse_cents(&payment).context("Invalid payment format")?;

            let rate = service.solve_rate(principal_cents, payment_cents, periods)?;
            println!(
                "Implied rate: {:.4}%/month ({} over {} months repays {})",
                rate,
                format_cents(payment_cents),
                periods,
                format_cents(principal_cents)
            );
        }
    }
    Ok(())
}

async fn run_insurance_command(service: &FinanceService, cmd: InsuranceCommands) -> Result<()> {
    match cmd {
        InsuranceCommands::Register {
            name,
            premium,
            term,
            start_date,
        } => {
            let premium_cents = parse_cents(&premium).context("Invalid premium format")?;
            let start = parse_date(&start_date)?;

            let policy = service
                .register_policy(name, premium_cents, term, start)
                .await?;
            println!(
                "Registered policy: {} ({} x {} months)",
                policy.name,
                format_cents(policy.premium_cents),
                policy.term_months
            );
        }

        InsuranceCommands::List => {
            let policies = service.list_policies().await?;
            if policies.is_empty() {
                println!("No insurance policies found.");
            } else {
                println!(
                    "{:<20} {:>12} {:>9} {:<12}",
                    "NAME", "PREMIUM", "PAID", "START"
                );
                println!("{}", "-".repeat(56));
                for policy in policies {
                    println!(
                        "{:<20} {:>12} {:>5}/{:<3} {:<12}",
                        truncate(&policy.name, 20),
                        format_cents(policy.premium_cents),
                        policy.installments_paid,
                        policy.term_months,
                        policy.start_date
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run_fixed_command(service: &FinanceService, cmd: FixedCommands) -> Result<()> {
    match cmd {
        FixedCommands::Register {
            name,
            amount,
            start_date,
            end_date,
        } => {
            let amount_cents = parse_cents(&amount).context("Invalid amount format")?;
            let start = parse_date(&start_date)?;
            let end = end_date.as_deref().map(parse_date).transpose()?;

            let template = service
                .register_template(name, amount_cents, start, end)
                .await?;
            println!(
                "Registered fixed expense: {} ({} monthly from {})",
                template.name,
                format_cents(template.amount_cents),
                template.start_date
            );
        }

        FixedCommands::List => {
            let templates = service.list_templates().await?;
            if templates.is_empty() {
                println!("No fixed expenses found.");
            } else {
                println!(
                    "{:<20} {:>12} {:<12} {:<12} {:<8}",
                    "NAME", "AMOUNT", "START", "END", "ACTIVE"
                );
                println!("{}", "-".repeat(68));
                for template in templates {
                    println!(
                        "{:<20} {:>12} {:<12} {:<12} {:<8}",
                        truncate(&template.name, 20),
                        format_cents(template.amount_cents),
                        template.start_date.to_string(),
                        template
                            .end_date
                            .map(|d| d.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                        if template.active { "yes" } else { "no" }
                    );
                }
            }
        }

        FixedCommands::Enable { name } => {
            service.set_template_active(&name, true).await?;
            println!("Enabled fixed expense: {}", name);
        }

        FixedCommands::Disable { name } => {
            service.set_template_active(&name, false).await?;
            println!("Disabled fixed expense: {}", name);
        }
    }
    Ok(())
}

async fn run_asset_command(service: &FinanceService, cmd: AssetCommands) -> Result<()> {
    match cmd {
        AssetCommands::Register {
            name,
            kind,
            value,
            valued_at,
            reference,
        } => {
            let kind = FixedAssetKind::from_str(&kind).ok_or_else(|| {
                anyhow::anyhow!("Invalid asset kind '{}'. Valid kinds: vehicle, real-estate", kind)
            })?;
            let value_cents = parse_cents(&value).context("Invalid value format")?;
            let valued = match valued_at {
                Some(s) => parse_date(&s)?,
                None => today(),
            };

            let asset = service
                .register_asset(name, kind, value_cents, valued, reference)
                .await?;
            println!(
                "Registered asset: {} ({}, {})",
                asset.name,
                asset.kind,
                format_cents(asset.current_value_cents)
            );
        }

        AssetCommands::List => {
            let assets = service.list_assets().await?;
            if assets.is_empty() {
                println!("No fixed assets found.");
            } else {
                println!(
                    "{:<20} {:<12} {:>14} {:<12} {:<14}",
                    "NAME", "KIND", "VALUE", "VALUED AT", "REFERENCE"
                );
                println!("{}", "-".repeat(76));
                for asset in assets {
                    println!(
                        "{:<20} {:<12} {:>14} {:<12} {:<14}",
                        truncate(&asset.name, 20),
                        asset.kind.as_str(),
                        format_cents(asset.current_value_cents),
                        asset.valued_at.to_string(),
                        asset.reference.as_deref().unwrap_or("-")
                    );
                }
            }
        }

        AssetCommands::SetValue { name, value, date } => {
            let value_cents = parse_cents(&value).context("Invalid value format")?;
            let valued = match date {
                Some(s) => parse_date(&s)?,
                None => today(),
            };

            let asset = service.revalue_asset(&name, value_cents, valued).await?;
            println!(
                "Revalued asset: {} at {} ({})",
                asset.name,
                format_cents(asset.current_value_cents),
                asset.valued_at
            );
        }
    }
    Ok(())
}

async fn run_bills_command(service: &FinanceService, cmd: BillsCommands) -> Result<()> {
    match cmd {
        BillsCommands::View { month } => {
            let month = parse_month_or_current(month.as_deref())?;
            let view = service.bills_for_month(month).await?;

            println!("Bills: {} to {}", view.from_date, view.to_date);
            if view.bills.is_empty() {
                println!("  Nothing due this month.");
            } else {
                println!();
                println!(
                    "{:<12} {:<28} {:>12} {:<6} {:<6}",
                    "DUE", "DESCRIPTION", "AMOUNT", "PAID", "INCL"
                );
                println!("{}", "-".repeat(68));
                for bill in &view.bills {
                    println!(
                        "{:<12} {:<28} {:>12} {:<6} {:<6}",
                        bill.due_date.to_string(),
                        truncate(&bill.description, 28),
                        format_cents(bill.amount_cents),
                        if bill.is_paid { "yes" } else { "no" },
                        if bill.is_included { "yes" } else { "no" }
                    );
                }
                println!("{}", "-".repeat(68));
                println!(
                    "{:<41} {:>12} (included {})",
                    "TOTAL DUE",
                    format_cents(view.total_due),
                    format_cents(view.total_included)
                );
            }

            if !view.future.is_empty() {
                println!();
                println!("Upcoming:");
                for bill in &view.future {
                    println!(
                        "  {:<12} {:<28} {:>12}",
                        bill.due_date.to_string(),
                        truncate(&bill.description, 28),
                        format_cents(bill.amount_cents)
                    );
                }
            }
        }

        BillsCommands::Future { month } => {
            let month = parse_month_or_current(month.as_deref())?;
            let view = service.bills_for_month(month).await?;

            if view.future.is_empty() {
                println!("No upcoming bills beyond {}.", view.to_date);
            } else {
                println!(
                    "{:<12} {:<28} {:>12}",
                    "DUE", "DESCRIPTION", "AMOUNT"
                );
                println!("{}", "-".repeat(54));
                for bill in &view.future {
                    println!(
                        "{:<12} {:<28} {:>12}",
                        bill.due_date.to_string(),
                        truncate(&bill.description, 28),
                        format_cents(bill.amount_cents)
                    );
                }
            }
        }

        BillsCommands::Include { name, installment } => {
            let month = Month::containing(today());
            let key = service.find_bill_key(&name, installment, month).await?;
            let inserted = service.include_bill(key).await?;
            if inserted {
                println!("Included bill: {} (installment {})", name, key.installment);
            } else {
                println!("Bill already tracked: {} (installment {})", name, key.installment);
            }
        }

        BillsCommands::Exclude { name, installment } => {
            let month = Month::containing(today());
            let key = service.find_bill_key(&name, installment, month).await?;
            let removed = service.exclude_bill(key).await?;
            if removed {
                println!("Excluded bill: {} (installment {})", name, key.installment);
            } else {
                println!("Bill was not tracked: {} (installment {})", name, key.installment);
            }
        }

        BillsCommands::Add {
            description,
            amount,
            due,
        } => {
            let amount_cents = parse_cents(&amount).context("Invalid amount format")?;
            let due_date = parse_date(&due)?;

            let bill = service
                .track_manual_bill(description, due_date, amount_cents)
                .await?;
            println!(
                "Tracked bill: {} ({} due {})",
                bill.description,
                format_cents(bill.amount_cents),
                bill.due_date
            );
        }

        BillsCommands::Pay {
            name,
            installment,
            account,
            date,
        } => {
            let month = Month::containing(today());
            let key = service.find_bill_key(&name, installment, month).await?;
            let pay_date = date.as_deref().map(parse_date).transpose()?;

            let result = service.pay_bill(key, &account, pay_date).await?;
            println!(
                "Paid {}: {} from {} on {}",
                result.bill.description,
                format_cents(result.entry.amount_cents),
                account,
                result.entry.date
            );
            if let Some(loan) = &result.loan {
                println!(
                    "  Loan progress: {}/{} installments",
                    loan.installments_paid, loan.term_months
                );
                if loan.remaining_term() == 0 {
                    println!("  Loan fully repaid.");
                }
            }
        }
    }
    Ok(())
}

async fn run_report_command(service: &FinanceService, cmd: ReportCommands) -> Result<()> {
    match cmd {
        ReportCommands::NetWorth { as_of, format } => {
            let as_of = match as_of {
                Some(s) => parse_date(&s)?,
                None => today(),
            };
            let report = service.net_worth_as_of(as_of).await?;

            match format.as_str() {
                "json" => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                _ => {
                    println!("Net Worth Report");
                    println!("As of: {}", report.as_of);
                    println!();

                    if !report.assets.is_empty() {
                        println!("Assets:");
                        for asset in &report.assets {
                            println!(
                                "  {:<25} {:<14} {:>15}",
                                truncate(&asset.name, 25),
                                asset.kind,
                                format_cents(asset.value)
                            );
                        }
                        println!("  {:<40} {:>15}", "", "-".repeat(15));
                        println!(
                            "  {:<40} {:>15}",
                            "Total Assets",
                            format_cents(report.total_assets)
                        );
                        println!();
                    }

                    if !report.liabilities.is_empty() {
                        println!("Liabilities:");
                        for liability in &report.liabilities {
                            println!(
                                "  {:<25} {:<14} {:>15}",
                                truncate(&liability.name, 25),
                                liability.kind,
                                format_cents(liability.amount)
                            );
                        }
                        println!("  {:<40} {:>15}", "", "-".repeat(15));
                        println!(
                            "  {:<40} {:>15}",
                            "Total Liabilities",
                            format_cents(report.total_liabilities)
                        );
                        println!();
                    }

                    println!("{}", "=".repeat(58));
                    println!(
                        "{:<42} {:>15}",
                        "Net Worth",
                        format_cents(report.net_worth)
                    );

                    if !report.warnings.is_empty() {
                        println!();
                        println!("Warnings:");
                        for warning in &report.warnings {
                            println!("  - {}", warning);
                        }
                    }
                }
            }
        }

        ReportCommands::Health { as_of, format } => {
            let as_of = match as_of {
                Some(s) => parse_date(&s)?,
                None => today(),
            };
            let report = service.health_report(as_of).await?;

            match format.as_str() {
                "json" => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                _ => {
                    println!("Financial Health Report");
                    println!(
                        "As of: {} (window {} to {})",
                        report.as_of, report.window_from, report.window_to
                    );
                    println!();
                    println!("{:<20} {:>10} {:<8}", "INDICATOR", "VALUE", "STATUS");
                    println!("{}", "-".repeat(40));
                    for reading in &report.readings {
                        println!(
                            "{:<20} {:>10} {:<8}",
                            reading.name,
                            format_ratio(reading.value),
                            reading.status.as_str()
                        );
                    }
                    println!("{}", "-".repeat(40));
                    println!("{:<20} {:>10} {:<8}", "overall", "", report.overall.as_str());
                }
            }
        }
    }
    Ok(())
}

async fn run_import_command(
    service: &FinanceService,
    account: &str,
    input: Option<&str>,
) -> Result<()> {
    use std::fs::File;
    use std::io::{stdin, Read};

    let reader: Box<dyn Read> = match input {
        Some(path) => {
            let file =
                File::open(path).with_context(|| format!("Failed to open input file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdin()),
    };

    let outcome = service.import_statement(account, reader).await?;

    println!("Import complete");
    println!("  Imported: {} transactions", outcome.imported);
    println!("  Inflow:   {}", format_cents(outcome.inflow_cents));
    println!("  Outflow:  {}", format_cents(outcome.outflow_cents));

    Ok(())
}

async fn run_export_command(
    service: &FinanceService,
    export_type: &str,
    output: Option<&str>,
    as_of: Option<&str>,
) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{stdout, Write};

    let exporter = Exporter::new(service);

    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    match export_type {
        "transactions" => {
            let count = exporter.export_transactions_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} transactions", count);
            }
        }
        "balances" => {
            let date = match as_of {
                Some(s) => parse_date(s)?,
                None => today(),
            };
            let count = exporter.export_balances_csv(writer, date).await?;
            if output.is_some() {
                eprintln!("Exported {} balances", count);
            }
        }
        "full" => {
            let snapshot = exporter.export_full_json(writer).await?;
            if output.is_some() {
                eprintln!(
                    "Exported full database: {} accounts, {} transactions, {} loans, {} tracked bills",
                    snapshot.accounts.len(),
                    snapshot.transactions.len(),
                    snapshot.loans.len(),
                    snapshot.tracked_bills.len()
                );
            }
        }
        _ => {
            anyhow::bail!(
                "Invalid export type '{}'. Valid types: transactions, balances, full",
                export_type
            );
        }
    }

    Ok(())
}

async fn run_doctor_command(service: &FinanceService) -> Result<()> {
    println!("Checking ledger integrity...\n");

    let report = service.doctor().await?;

    if report.is_clean() {
        println!("Ledger is consistent.");
    } else {
        println!("Issues found:");
        for issue in &report.issues {
            println!("  - {}", issue);
        }
        anyhow::bail!("Ledger integrity check failed");
    }

    Ok(())
}

fn default_flow(kind: OperationKind) -> Flow {
    match kind {
        OperationKind::Income | OperationKind::Yield | OperationKind::Redemption => Flow::In,
        _ => Flow::Out,
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len - 3])
    }
}

fn format_ratio(value: f64) -> String {
    if value.is_infinite() {
        "inf".to_string()
    } else {
        format!("{:.2}", value)
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn parse_date(date_str: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d").context("Date must be in YYYY-MM-DD format")
}

fn parse_month_or_current(month: Option<&str>) -> Result<Month> {
    match month {
        Some(s) => Month::parse(s).context("Month must be in YYYY-MM format"),
        None => Ok(Month::containing(today())),
    }
}
