//! Row validation and monetary rounding utilities

use bigdecimal::{BigDecimal, RoundingMode};

use crate::types::*;

/// Number of minor-unit digits for a currency code.
///
/// Covers the zero- and three-decimal currencies a statement import can
/// plausibly carry; everything else uses the common two digits.
pub fn minor_unit(currency: &str) -> i64 {
    match currency {
        "JPY" | "KRW" | "VND" | "CLP" | "ISK" => 0,
        "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
        _ => 2,
    }
}

/// Round an amount to the currency's minor unit, ties away from zero.
///
/// Monetary amounts are decimal throughout; this only normalizes scale so
/// that comparisons and fingerprints treat `50` and `50.00` as the same
/// value.
pub fn round_to_minor_unit(amount: &BigDecimal, currency: &str) -> BigDecimal {
    amount.with_scale_round(minor_unit(currency), RoundingMode::HalfUp)
}

/// Validate that an amount is strictly positive
pub fn validate_positive_amount(amount: &BigDecimal) -> ReconcileResult<()> {
    if *amount <= BigDecimal::from(0) {
        Err(ReconcileError::Validation(
            "Amount must be positive".to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Strip whitespace from an IBAN and uppercase it
pub fn normalize_iban(iban: &str) -> String {
    iban.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

fn clean(text: &Option<String>) -> Option<String> {
    text.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Validate a candidate row's required fields.
///
/// Returns the canonical row (amount at minor-unit scale, currency
/// uppercased, text fields trimmed) or the reason the row must be skipped.
/// A skipped row produces no side effects at all.
pub fn validate_row(row: &CandidateRow) -> Result<ValidRow, SkipReason> {
    let posting_date = row.posting_date.ok_or(SkipReason::MissingDate)?;
    let amount = row.amount.as_ref().ok_or(SkipReason::MissingAmount)?;
    let currency = clean(&row.currency)
        .map(|c| c.to_uppercase())
        .ok_or(SkipReason::MissingCurrency)?;

    Ok(ValidRow {
        row_index: row.row_index,
        posting_date,
        amount: round_to_minor_unit(amount, &currency),
        currency,
        counterparty: clean(&row.counterparty),
        purpose: clean(&row.purpose),
        reference: clean(&row.reference),
        iban: clean(&row.iban).map(|i| normalize_iban(&i)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn row() -> CandidateRow {
        CandidateRow {
            row_index: 0,
            posting_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            amount: Some(BigDecimal::from_str("25.5").unwrap()),
            currency: Some("eur".to_string()),
            counterparty: Some("  Ayşe Yılmaz ".to_string()),
            purpose: Some("Mitgliedsbeitrag 2024".to_string()),
            reference: None,
            iban: Some("de89 3704 0044 0532 0130 00".to_string()),
        }
    }

    #[test]
    fn test_valid_row_is_canonicalized() {
        let valid = validate_row(&row()).unwrap();
        assert_eq!(valid.currency, "EUR");
        assert_eq!(valid.amount, BigDecimal::from_str("25.50").unwrap());
        assert_eq!(valid.counterparty.as_deref(), Some("Ayşe Yılmaz"));
        assert_eq!(valid.iban.as_deref(), Some("DE89370400440532013000"));
    }

    #[test]
    fn test_missing_fields_are_skip_reasons() {
        let mut missing_date = row();
        missing_date.posting_date = None;
        assert_eq!(validate_row(&missing_date), Err(SkipReason::MissingDate));

        let mut missing_amount = row();
        missing_amount.amount = None;
        assert_eq!(
            validate_row(&missing_amount),
            Err(SkipReason::MissingAmount)
        );

        let mut missing_currency = row();
        missing_currency.currency = Some("   ".to_string());
        assert_eq!(
            validate_row(&missing_currency),
            Err(SkipReason::MissingCurrency)
        );
    }

    #[test]
    fn test_rounding_is_half_away_from_zero() {
        let up = BigDecimal::from_str("10.005").unwrap();
        assert_eq!(
            round_to_minor_unit(&up, "EUR"),
            BigDecimal::from_str("10.01").unwrap()
        );
        let down = BigDecimal::from_str("-10.005").unwrap();
        assert_eq!(
            round_to_minor_unit(&down, "EUR"),
            BigDecimal::from_str("-10.01").unwrap()
        );
        let yen = BigDecimal::from_str("1200.5").unwrap();
        assert_eq!(
            round_to_minor_unit(&yen, "JPY"),
            BigDecimal::from_str("1201").unwrap()
        );
    }
}
