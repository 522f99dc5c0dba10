mod common;

use anyhow::Result;
use common::{parse_date, test_service, StandardAccounts};
use patrimonio::application::AppError;
use patrimonio::domain::{Flow, OperationKind};

#[tokio::test]
async fn test_import_splits_rows_by_sign() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardAccounts::create_checking(&service).await?;

    let csv = "\
date,amount,description,category
2024-01-10,1500.00,Salary,income
2024-01-12,-89.90,Groceries,food
2024-01-15,-45.00,Fuel,
";

    let outcome = service.import_statement("Checking", csv.as_bytes()).await?;
    assert_eq!(outcome.imported, 3);
    assert_eq!(outcome.inflow_cents, 150_000);
    assert_eq!(outcome.outflow_cents, 13_490);

    let entries = service.list_transactions(Some("Checking")).await?;
    assert_eq!(entries.len(), 3);

    let salary = entries
        .iter()
        .find(|e| e.description.as_deref() == Some("Salary"))
        .unwrap();
    assert_eq!(salary.kind, OperationKind::Income);
    assert_eq!(salary.flow, Flow::In);
    assert_eq!(salary.amount_cents, 150_000);
    assert_eq!(salary.category.as_deref(), Some("income"));

    let fuel = entries
        .iter()
        .find(|e| e.description.as_deref() == Some("Fuel"))
        .unwrap();
    assert_eq!(fuel.kind, OperationKind::Expense);
    assert_eq!(fuel.flow, Flow::Out);
    assert!(fuel.category.is_none());

    let balance = service
        .account_balance("Checking", parse_date("2024-01-31"))
        .await?;
    assert_eq!(balance.balance, 100_000 + 150_000 - 13_490);

    Ok(())
}

#[tokio::test]
async fn test_malformed_row_fails_the_whole_import() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardAccounts::create_checking(&service).await?;

    let csv = "\
date,amount,description,category
2024-01-10,1500.00,Salary,income
2024-01-12,not-a-number,Groceries,food
2024-01-15,-45.00,Fuel,
";

    let result = service.import_statement("Checking", csv.as_bytes()).await;
    match result {
        Err(AppError::ImportParse { line, .. }) => assert_eq!(line, 3),
        other => panic!("expected a parse failure, got {:?}", other.map(|o| o.imported)),
    }

    // Nothing was written, not even the well-formed rows
    assert!(service.list_transactions(None).await?.is_empty());
    let balance = service
        .account_balance("Checking", parse_date("2024-01-31"))
        .await?;
    assert_eq!(balance.balance, 100_000);

    Ok(())
}

#[tokio::test]
async fn test_rows_before_the_account_start_abort_the_import() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardAccounts::create_checking(&service).await?;

    let csv = "\
date,amount,description,category
2024-01-10,1500.00,Salary,income
2023-12-20,-10.00,Stale row,
";

    let result = service.import_statement("Checking", csv.as_bytes()).await;
    assert!(matches!(
        result,
        Err(AppError::EntryBeforeAccountStart { .. })
    ));
    assert!(service.list_transactions(None).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_header_only_statement_imports_nothing() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardAccounts::create_checking(&service).await?;

    let outcome = service
        .import_statement("Checking", "date,amount,description,category\n".as_bytes())
        .await?;
    assert_eq!(outcome.imported, 0);
    assert_eq!(outcome.inflow_cents, 0);
    assert_eq!(outcome.outflow_cents, 0);

    Ok(())
}

#[tokio::test]
async fn test_import_into_unknown_account_fails() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let result = service
        .import_statement("Nope", "date,amount,description,category\n".as_bytes())
        .await;
    assert!(matches!(result, Err(AppError::AccountNotFound(_))));

    Ok(())
}

#[tokio::test]
async fn test_second_import_into_the_same_account_is_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardAccounts::create_checking(&service).await?;

    let mut big = String::from("date,amount,description,category\n");
    for i in 0..600 {
        big.push_str(&format!("2024-01-10,-1.00,Row {},\n", i));
    }
    let small = "\
date,amount,description,category
2024-01-11,-2.00,Other,
";

    let (first, second) = tokio::join!(
        service.import_statement("Checking", big.as_bytes()),
        service.import_statement("Checking", small.as_bytes()),
    );

    // Whichever future grabbed the account first wins; the other is turned
    // away instead of interleaving writes
    let (winner, loser) = if first.is_ok() {
        (first?, second)
    } else {
        (second?, first)
    };
    assert!(matches!(loser, Err(AppError::ImportInProgress(_))));

    let entries = service.list_transactions(Some("Checking")).await?;
    assert_eq!(entries.len(), winner.imported);

    Ok(())
}

#[tokio::test]
async fn test_imports_into_different_accounts_run_side_by_side() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardAccounts::create_basic(&service).await?;

    let csv_a = "\
date,amount,description,category
2024-01-10,100.00,A,
";
    let csv_b = "\
date,amount,description,category
2024-01-10,200.00,B,
";

    let (first, second) = tokio::join!(
        service.import_statement("Checking", csv_a.as_bytes()),
        service.import_statement("Savings", csv_b.as_bytes()),
    );
    assert_eq!(first?.imported, 1);
    assert_eq!(second?.imported, 1);

    Ok(())
}
