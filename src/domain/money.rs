use std::fmt;

/// Money is represented as integer cents to avoid floating-point precision issues.
/// For BRL/EUR/USD, 1 unit = 100 cents, so R$ 50.00 = 5000 cents.
pub type Cents = i64;

/// Round a fractional monetary value (in units, e.g. 945.596) to integer cents.
/// Half-away-from-zero, which is what the amortization arithmetic expects:
/// 945.596 -> 94560.
pub fn round_cents(units: f64) -> Cents {
    (units * 100.0).round() as Cents
}

/// Convert integer cents back to fractional units for rate math.
pub fn cents_to_units(cents: Cents) -> f64 {
    cents as f64 / 100.0
}

/// Format cents as a human-readable currency string.
/// Example: 5000 -> "50.00", -1234 -> "-12.34"
pub fn format_cents(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs_cents = cents.abs();
    format!("{}{}.{:02}", sign, abs_cents / 100, abs_cents % 100)
}

/// Parse a decimal string into cents.
/// Example: "50.00" -> 5000, "12.5" -> 1250, "100" -> 10000
pub fn parse_cents(input: &str) -> Result<Cents, ParseCentsError> {
    let input = input.trim();
    let negative = input.starts_with('-');
    let input = input.trim_start_matches('-');

    let (units_str, decimal_str) = match input.split_once('.') {
        None => (input, ""),
        Some((u, d)) => {
            if d.contains('.') {
                return Err(ParseCentsError::InvalidFormat);
            }
            (u, d)
        }
    };

    let units: i64 = if units_str.is_empty() {
        0
    } else {
        units_str
            .parse()
            .map_err(|_| ParseCentsError::InvalidFormat)?
    };

    // Pad or truncate the decimal part to 2 digits
    let decimal_cents: i64 = match decimal_str.len() {
        0 => 0,
        1 => {
            decimal_str
                .parse::<i64>()
                .map_err(|_| ParseCentsError::InvalidFormat)?
                * 10
        }
        _ => decimal_str[..2]
            .parse()
            .map_err(|_| ParseCentsError::InvalidFormat)?,
    };

    let cents = units * 100 + decimal_cents;
    Ok(if negative { -cents } else { cents })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseCentsError {
    InvalidFormat,
}

impl fmt::Display for ParseCentsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseCentsError::InvalidFormat => write!(f, "invalid money format"),
        }
    }
}

impl std::error::Error for ParseCentsError {}
