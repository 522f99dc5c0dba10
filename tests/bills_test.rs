mod common;

use std::collections::HashSet;

use anyhow::Result;
use common::{parse_date, test_service, StandardAccounts};
use patrimonio::application::AppError;
use patrimonio::domain::{BillKey, BillSourceKind, LoanStatus, Month, OperationKind};

#[tokio::test]
async fn test_loan_projects_the_unpaid_installment_due_in_the_month() -> Result<()> {
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

    let view = service.bills_for_month(Month::parse("2024-03")?).await?;
    assert_eq!(view.bills.len(), 1);

    let bill = &view.bills[0];
    assert_eq!(bill.key.kind, BillSourceKind::Loan);
    assert_eq!(bill.key.installment, 3);
    assert_eq!(bill.due_date, parse_date("2024-03-05"));
    assert_eq!(bill.amount_cents, 94_560);
    assert!(!bill.is_paid);
    assert!(!bill.is_included);

    assert_eq!(view.total_due, 94_560);
    assert_eq!(view.total_included, 0);

    Ok(())
}

#[tokio::test]
async fn test_include_is_idempotent_and_future_stops_offering_the_key() -> Result<()> {
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

    let february = Month::parse("2024-02")?;

    // Before tracking anything, February offers installment 3 as upcoming
    let view = service.bills_for_month(february).await?;
    assert_eq!(view.future.len(), 1);
    assert_eq!(view.future[0].key.installment, 3);

    let key = service
        .find_bill_key("Car", Some(3), Month::parse("2024-03")?)
        .await?;
    assert!(service.include_bill(key).await?);
    assert!(!service.include_bill(key).await?);
    assert_eq!(service.list_tracked_bills().await?.len(), 1);

    // The tracked key no longer shows as upcoming; the next one does
    let view = service.bills_for_month(february).await?;
    assert_eq!(view.future.len(), 1);
    assert_eq!(view.future[0].key.installment, 4);

    // And the March view carries it as included
    let march = service.bills_for_month(Month::parse("2024-03")?).await?;
    assert_eq!(march.bills.len(), 1);
    assert!(march.bills[0].is_included);
    assert_eq!(march.total_included, 94_560);

    Ok(())
}

#[tokio::test]
async fn test_month_view_and_future_never_repeat_a_key() -> Result<()> {
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
    service
        .register_policy("Health".into(), 12_000, 24, parse_date("2024-01-10"))
        .await?;
    service
        .register_template("Rent".into(), 80_000, parse_date("2024-01-01"), None)
        .await?;

    let key = service
        .find_bill_key("Car", Some(3), Month::parse("2024-03")?)
        .await?;
    service.include_bill(key).await?;

    let view = service.bills_for_month(Month::parse("2024-02")?).await?;
    let mut seen: HashSet<BillKey> = HashSet::new();
    for bill in view.bills.iter().chain(view.future.iter()) {
        assert!(seen.insert(bill.key), "key repeated: {}", bill.key);
    }

    Ok(())
}

#[tokio::test]
async fn test_policies_and_templates_project_monthly() -> Result<()> {
    let (service, _temp) = test_service().await?;

    service
        .register_policy("Health".into(), 12_000, 24, parse_date("2024-01-10"))
        .await?;
    service
        .register_template("Rent".into(), 80_000, parse_date("2024-01-01"), None)
        .await?;

    let view = service.bills_for_month(Month::parse("2024-03")?).await?;
    assert_eq!(view.bills.len(), 2);

    let rent = view
        .bills
        .iter()
        .find(|b| b.description == "Rent")
        .unwrap();
    assert_eq!(rent.key.kind, BillSourceKind::FixedExpense);
    assert_eq!(rent.key.installment, 3);
    assert_eq!(rent.due_date, parse_date("2024-03-01"));

    let health = view
        .bills
        .iter()
        .find(|b| b.description == "Health")
        .unwrap();
    assert_eq!(health.key.installment, 3);
    assert_eq!(health.due_date, parse_date("2024-03-10"));
    assert_eq!(view.total_due, 92_000);

    Ok(())
}

#[tokio::test]
async fn test_disabled_template_stops_projecting_but_tracked_rows_survive() -> Result<()> {
    let (service, _temp) = test_service().await?;

    service
        .register_template("Gym".into(), 4_500, parse_date("2024-01-01"), None)
        .await?;

    let march = Month::parse("2024-03")?;
    let key = service.find_bill_key("Gym", None, march).await?;
    service.include_bill(key).await?;

    service.set_template_active("Gym", false).await?;

    // Projection stopped, but the row already advanced into March stays
    let view = service.bills_for_month(march).await?;
    assert_eq!(view.bills.len(), 1);
    assert_eq!(view.bills[0].description, "Gym");
    assert!(view.bills[0].is_included);

    let april = service.bills_for_month(Month::parse("2024-04")?).await?;
    assert!(april.bills.is_empty());
    assert!(april.future.is_empty());

    // Re-enabling resumes projection
    service.set_template_active("Gym", true).await?;
    let april = service.bills_for_month(Month::parse("2024-04")?).await?;
    assert_eq!(april.bills.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_exclude_returns_a_projected_bill_to_its_default() -> Result<()> {
    let (service, _temp) = test_service().await?;

    service
        .register_template("Rent".into(), 80_000, parse_date("2024-01-01"), None)
        .await?;

    let march = Month::parse("2024-03")?;
    let key = service.find_bill_key("Rent", None, march).await?;

    assert!(service.include_bill(key).await?);
    assert!(service.exclude_bill(key).await?);
    assert!(!service.exclude_bill(key).await?);

    let view = service.bills_for_month(march).await?;
    assert_eq!(view.bills.len(), 1);
    assert!(!view.bills[0].is_included);

    Ok(())
}

#[tokio::test]
async fn test_manual_bill_is_tracked_and_payable() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardAccounts::create_checking(&service).await?;

    service
        .track_manual_bill("Dentist".into(), parse_date("2024-03-20"), 25_000)
        .await?;

    let march = Month::parse("2024-03")?;
    let view = service.bills_for_month(march).await?;
    assert_eq!(view.bills.len(), 1);
    assert_eq!(view.bills[0].key.kind, BillSourceKind::Manual);
    assert_eq!(view.total_due, 25_000);

    let key = service.find_bill_key("Dentist", None, march).await?;
    let payment = service.pay_bill(key, "Checking", None).await?;

    assert_eq!(payment.entry.kind, OperationKind::Expense);
    assert_eq!(payment.entry.amount_cents, 25_000);
    assert_eq!(payment.entry.date, parse_date("2024-03-20"));
    assert!(payment.bill.is_paid);
    assert!(payment.loan.is_none());

    let balance = service
        .account_balance("Checking", parse_date("2024-03-31"))
        .await?;
    assert_eq!(balance.balance, 75_000);

    // A settled bill cannot be paid twice
    let result = service.pay_bill(key, "Checking", None).await;
    assert!(matches!(result, Err(AppError::BillAlreadyPaid(_))));

    Ok(())
}

#[tokio::test]
async fn test_paying_a_loan_bill_advances_the_contract() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardAccounts::create_checking(&service).await?;

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

    let january = Month::parse("2024-01")?;
    let key = service.find_bill_key("Car", None, january).await?;
    assert_eq!(key.installment, 1);

    let payment = service.pay_bill(key, "Checking", None).await?;
    assert_eq!(payment.entry.kind, OperationKind::LoanPayment);
    assert_eq!(payment.entry.amount_cents, 94_560);

    let loan = payment.loan.unwrap();
    assert_eq!(loan.installments_paid, 1);
    assert_eq!(loan.status, LoanStatus::Active);

    // The paid installment no longer counts toward the month's open total,
    // and the next key resolves to installment 2
    let view = service.bills_for_month(january).await?;
    assert_eq!(view.total_due, 0);
    let key = service.find_bill_key("Car", None, january).await?;
    assert_eq!(key.installment, 2);

    Ok(())
}

#[tokio::test]
async fn test_paying_the_final_installment_closes_the_loan() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardAccounts::create_checking(&service).await?;
    StandardAccounts::pay_salary(&service, 100_000, "2024-01-02").await?;

    // Interest-free split over two months
    service
        .register_loan(
            "Fridge".into(),
            200_000,
            Some(0.0),
            None,
            2,
            parse_date("2024-01-15"),
        )
        .await?;

    for month in ["2024-01", "2024-02"] {
        let key = service
            .find_bill_key("Fridge", None, Month::parse(month)?)
            .await?;
        service.pay_bill(key, "Checking", None).await?;
    }

    let loan = service.get_loan("Fridge").await?;
    assert_eq!(loan.status, LoanStatus::PaidOff);
    assert_eq!(loan.installments_paid, 2);
    assert_eq!(loan.remaining_term(), 0);

    // A fully repaid contract projects nothing further
    let view = service.bills_for_month(Month::parse("2024-03")?).await?;
    assert!(view.bills.is_empty());
    assert!(view.future.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_unknown_bill_source_is_reported() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let result = service
        .find_bill_key("Nothing", None, Month::parse("2024-03")?)
        .await;
    assert!(matches!(result, Err(AppError::BillSourceNotFound(_))));

    Ok(())
}
