use std::io::Read;

use chrono::NaiveDate;
use serde::Serialize;

use crate::application::AppError;
use crate::domain::{parse_cents, Cents};

/// One raw statement row after parsing, before any domain rule applies.
/// Negative amounts are outflows, positive ones inflows.
#[derive(Debug, Clone)]
pub struct StatementCandidate {
    pub date: NaiveDate,
    pub amount_cents: Cents,
    pub description: String,
    pub category: Option<String>,
}

/// Result of a committed statement import.
#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    pub imported: usize,
    pub inflow_cents: Cents,
    pub outflow_cents: Cents,
}

/// Parse a CSV bank statement (`date,amount,description[,category]`) into
/// candidate rows. Atomic: the first malformed row fails the whole parse,
/// so nothing partial is ever produced.
pub fn parse_statement<R: Read>(reader: R) -> Result<Vec<StatementCandidate>, AppError> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut candidates = Vec::new();

    for (line_num, result) in csv_reader.records().enumerate() {
        let line = line_num + 2; // +2 for header and 0-indexing

        let record = result.map_err(|e| AppError::ImportParse {
            line,
            message: format!("CSV parse error: {}", e),
        })?;

        let date_str = record.get(0).unwrap_or("");
        let amount_str = record.get(1).unwrap_or("");
        let description = record.get(2).unwrap_or("").to_string();
        let category = record.get(3).and_then(|s| {
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        });

        let date =
            NaiveDate::parse_from_str(date_str, "%Y-%m-%d").map_err(|_| AppError::ImportParse {
                line,
                message: format!("invalid date '{}', expected YYYY-MM-DD", date_str),
            })?;

        let amount_cents = parse_cents(amount_str).map_err(|e| AppError::ImportParse {
            line,
            message: format!("invalid amount '{}': {}", amount_str, e),
        })?;
        if amount_cents == 0 {
            return Err(AppError::ImportParse {
                line,
                message: "zero-amount row".to_string(),
            });
        }

        if description.is_empty() {
            return Err(AppError::ImportParse {
                line,
                message: "missing description".to_string(),
            });
        }

        candidates.push(StatementCandidate {
            date,
            amount_cents,
            description,
            category,
        });
    }

    Ok(candidates)
}
