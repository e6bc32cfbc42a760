//! End-to-end walkthrough: seed members and claims, reconcile a statement
//! batch, and print the resulting report.
//!
//! Run with: cargo run --example batch_import

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::str::FromStr;
use uuid::Uuid;

use vereinskasse_core::{
    CandidateRow, Claim, ClaimStore, ClaimType, MemberProfile, MemoryStorage,
    ReconciliationEngine,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let storage = MemoryStorage::new();
    let verein_id = Uuid::new_v4();
    let bank_account_id = Uuid::new_v4();

    // Two members: one pays by name, one is identified by member number.
    let hans = MemberProfile {
        id: Uuid::new_v4(),
        verein_id,
        first_name: "Hans".to_string(),
        last_name: "Müller".to_string(),
        member_number: Some("MG-1001".to_string()),
        active: true,
    };
    let ayse = MemberProfile {
        id: Uuid::new_v4(),
        verein_id,
        first_name: "Ayşe".to_string(),
        last_name: "Yılmaz".to_string(),
        member_number: Some("MG-1002".to_string()),
        active: true,
    };
    storage.insert_member(hans.clone(), vec![]);
    storage.insert_member(ayse.clone(), vec![]);

    // Open dues claims for both.
    let mut store = storage.clone();
    for (member, due) in [(&hans, "2024-01-01"), (&hans, "2024-02-01"), (&ayse, "2024-01-01")] {
        let claim = Claim::new(
            member.id,
            verein_id,
            ClaimType::Dues,
            BigDecimal::from_str("50.00")?,
            "EUR".to_string(),
            NaiveDate::from_str(due)?,
        );
        store.insert_claim(&claim).await?;
    }

    // A small statement: a partial payment, an overpayment identified by
    // member number, and a donor nobody knows.
    let rows = vec![
        row(0, "70.00", Some("Hans Mueller"), None),
        row(1, "80.00", Some("A. Yilmaz"), Some("Beitrag MG-1002")),
        row(2, "25.00", Some("Unbekannter Spender"), None),
    ];

    let mut engine = ReconciliationEngine::new(storage.clone(), storage.clone());
    let report = engine.process_upload(bank_account_id, verein_id, rows).await?;

    println!(
        "matched {} / unmatched {} / ambiguous {} / duplicates {} / errors {}",
        report.matched_count,
        report.unmatched_count,
        report.ambiguous_count,
        report.duplicate_count,
        report.error_count
    );
    println!(
        "allocated {} EUR to claims, {} EUR to advance balances",
        report.total_allocated, report.total_advanced
    );
    println!("{}", serde_json::to_string_pretty(&report)?);

    for member in [&hans, &ayse] {
        let summary = engine.member_summary(member.id).await?;
        println!(
            "{}: outstanding {} / paid {} / advance {}",
            member.display_name(),
            summary.outstanding_total,
            summary.paid_total,
            summary.advance_total
        );
    }

    Ok(())
}

fn row(
    row_index: usize,
    amount: &str,
    counterparty: Option<&str>,
    reference: Option<&str>,
) -> CandidateRow {
    CandidateRow {
        row_index,
        posting_date: NaiveDate::from_ymd_opt(2024, 3, 1),
        amount: BigDecimal::from_str(amount).ok(),
        currency: Some("EUR".to_string()),
        counterparty: counterparty.map(str::to_string),
        purpose: None,
        reference: reference.map(str::to_string),
        iban: None,
    }
}
