//! Statement-line fingerprinting for the duplicate guard
//!
//! Statement files are frequently re-uploaded (user error, retries), so every
//! accepted row gets a stable identity derived from its business fields. A
//! re-imported line carries the same fingerprint and is recognized before any
//! side effect happens, which makes batch re-runs a no-op instead of a double
//! payment.

use crate::types::{BankAccountId, ValidRow};

/// Compute the stable identity of a statement line for one account.
///
/// Canonical concatenation of account id, ISO posting date, minor-unit
/// amount, currency, and trimmed reference. Plain field concatenation rather
/// than a hash: deterministic across runs and platforms, and directly
/// readable when a unique-constraint violation has to be debugged. The row
/// must already be validated, so amount scale and currency case are
/// canonical.
pub fn row_fingerprint(bank_account_id: BankAccountId, row: &ValidRow) -> String {
    format!(
        "{}|{}|{}|{}|{}",
        bank_account_id,
        row.posting_date,
        row.amount,
        row.currency,
        row.reference.as_deref().unwrap_or(""),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;
    use std::str::FromStr;
    use uuid::Uuid;

    fn valid_row(amount: &str, reference: Option<&str>) -> ValidRow {
        ValidRow {
            row_index: 0,
            posting_date: NaiveDate::from_ymd_opt(2024, 5, 17).unwrap(),
            amount: BigDecimal::from_str(amount).unwrap(),
            currency: "EUR".to_string(),
            counterparty: Some("Hans Meier".to_string()),
            purpose: None,
            reference: reference.map(str::to_string),
            iban: None,
        }
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let account = Uuid::new_v4();
        let row = valid_row("42.00", Some("RF-2024-0001"));
        assert_eq!(
            row_fingerprint(account, &row),
            row_fingerprint(account, &row.clone())
        );
    }

    #[test]
    fn test_fingerprint_distinguishes_accounts_and_fields() {
        let account_a = Uuid::new_v4();
        let account_b = Uuid::new_v4();
        let row = valid_row("42.00", Some("RF-1"));

        assert_ne!(
            row_fingerprint(account_a, &row),
            row_fingerprint(account_b, &row)
        );
        assert_ne!(
            row_fingerprint(account_a, &row),
            row_fingerprint(account_a, &valid_row("43.00", Some("RF-1")))
        );
        assert_ne!(
            row_fingerprint(account_a, &row),
            row_fingerprint(account_a, &valid_row("42.00", Some("RF-2")))
        );
    }

    #[test]
    fn test_fingerprint_ignores_presentation_differences() {
        // Validation already normalizes scale, so "42" and "42.00" arrive
        // identical here; counterparty and purpose are not part of identity.
        let account = Uuid::new_v4();
        let mut a = valid_row("42.00", Some("RF-1"));
        let mut b = valid_row("42.00", Some("RF-1"));
        a.counterparty = Some("HANS MEIER".to_string());
        b.purpose = Some("Beitrag".to_string());
        assert_eq!(row_fingerprint(account, &a), row_fingerprint(account, &b));
    }
}
