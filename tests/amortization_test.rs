mod common;

use anyhow::Result;
use common::{parse_date, test_service};
use patrimonio::application::AppError;
use patrimonio::domain::LoanStatus;

#[tokio::test]
async fn test_schedule_matches_the_contract_arithmetic() -> Result<()> {
    let (service, _temp) = test_service().await?;

    // 10000.00 at 2%/month over 12 months
    let loan = service
        .register_loan(
            "Car".into(),
            1_000_000,
            Some(2.0),
            None,
            12,
            parse_date("2024-01-05"),
        )
        .await?;
    assert_eq!(loan.installment_cents, 94_560);
    assert_eq!(loan.status, LoanStatus::Active);

    let (_, schedule) = service.loan_schedule("Car").await?;
    assert_eq!(schedule.len(), 12);

    let first = &schedule[0];
    assert_eq!(first.number, 1);
    assert_eq!(first.interest_cents, 20_000);
    assert_eq!(first.principal_cents, 74_560);
    assert_eq!(first.balance_cents, 925_440);

    // Principal portions repay the principal to the cent
    let total_principal: i64 = schedule.iter().map(|row| row.principal_cents).sum();
    assert_eq!(total_principal, 1_000_000);
    assert_eq!(schedule.last().map(|row| row.balance_cents), Some(0));

    Ok(())
}

#[tokio::test]
async fn test_contractual_installment_overrides_the_derived_one() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let loan = service
        .register_loan(
            "Bike".into(),
            1_000_000,
            Some(2.0),
            Some(95_000),
            12,
            parse_date("2024-01-05"),
        )
        .await?;
    assert_eq!(loan.installment_cents, 95_000);

    // The fatter installment retires the balance within the term
    let (_, schedule) = service.loan_schedule("Bike").await?;
    assert_eq!(schedule.last().map(|row| row.balance_cents), Some(0));
    let total_principal: i64 = schedule.iter().map(|row| row.principal_cents).sum();
    assert_eq!(total_principal, 1_000_000);

    Ok(())
}

#[tokio::test]
async fn test_missing_rate_is_solved_from_the_installment() -> Result<()> {
    let (service, _temp) = test_service().await?;

    // Banks quote the installment, not the rate
    let loan = service
        .register_loan(
            "Van".into(),
            1_000_000,
            None,
            Some(94_560),
            12,
            parse_date("2024-01-05"),
        )
        .await?;
    assert!(loan.is_configured());
    assert!((loan.monthly_rate_percent - 2.0).abs() < 0.01);
    assert_eq!(loan.installment_cents, 94_560);

    Ok(())
}

#[tokio::test]
async fn test_pending_loan_until_configured() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let loan = service
        .register_loan(
            "Mortgage".into(),
            30_000_000,
            None,
            None,
            240,
            parse_date("2024-03-01"),
        )
        .await?;
    assert_eq!(loan.status, LoanStatus::PendingConfig);

    let result = service.loan_schedule("Mortgage").await;
    assert!(matches!(result, Err(AppError::LoanNotConfigured(_))));

    let loan = service.configure_loan("Mortgage", 0.4, None).await?;
    assert_eq!(loan.status, LoanStatus::Active);
    assert!(loan.installment_cents > 0);

    let (_, schedule) = service.loan_schedule("Mortgage").await?;
    assert_eq!(schedule.len(), 240);

    // A configured contract's rate is settled
    let result = service.configure_loan("Mortgage", 0.5, None).await;
    assert!(matches!(result, Err(AppError::LoanAlreadyConfigured(_))));

    Ok(())
}

#[tokio::test]
async fn test_solve_rate_recovers_the_quoted_rate() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let rate = service.solve_rate(1_000_000, 94_560, 12)?;
    assert!((rate - 2.0).abs() < 0.01);

    Ok(())
}

#[tokio::test]
async fn test_solve_rate_rejects_a_payment_that_never_repays() -> Result<()> {
    let (service, _temp) = test_service().await?;

    // 12 x 800.00 cannot repay 10000.00 at any non-negative rate
    let result = service.solve_rate(1_000_000, 80_000, 12);
    assert!(matches!(result, Err(AppError::RateSolve(_))));

    Ok(())
}

#[tokio::test]
async fn test_duplicate_loan_name_is_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;

    service
        .register_loan(
            "Car".into(),
            1_000_000,
            Some(2.0),
            None,
            12,
            parse_date("2024-01-05"),
        )
        .await?;
    let result = service
        .register_loan(
            "Car".into(),
            500_000,
            Some(1.0),
            None,
            6,
            parse_date("2024-02-05"),
        )
        .await;
    assert!(matches!(result, Err(AppError::LoanAlreadyExists(_))));

    Ok(())
}
