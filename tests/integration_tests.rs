//! Integration tests for vereinskasse-core

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::str::FromStr;
use uuid::Uuid;

use vereinskasse_core::{
    CandidateRow, Claim, ClaimStatus, ClaimStore, ClaimType, MemberProfile, MemoryStorage,
    PaymentStore, ReconciliationEngine, RowOutcome, VereinId,
};

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn member(verein_id: VereinId, first: &str, last: &str, number: Option<&str>) -> MemberProfile {
    MemberProfile {
        id: Uuid::new_v4(),
        verein_id,
        first_name: first.to_string(),
        last_name: last.to_string(),
        member_number: number.map(str::to_string),
        active: true,
    }
}

fn claim(member: &MemberProfile, amount: &str, due: NaiveDate) -> Claim {
    Claim::new(
        member.id,
        member.verein_id,
        ClaimType::Dues,
        dec(amount),
        "EUR".to_string(),
        due,
    )
}

fn incoming_row(row_index: usize, amount: &str, counterparty: &str) -> CandidateRow {
    CandidateRow {
        row_index,
        posting_date: Some(date(2024, 3, 1)),
        amount: Some(dec(amount)),
        currency: Some("EUR".to_string()),
        counterparty: Some(counterparty.to_string()),
        purpose: Some("Mitgliedsbeitrag".to_string()),
        reference: Some(format!("REF-{}", row_index)),
        iban: None,
    }
}

fn engine(
    storage: &MemoryStorage,
) -> ReconciliationEngine<MemoryStorage, MemoryStorage> {
    ReconciliationEngine::new(storage.clone(), storage.clone())
}

async fn seed_claim(storage: &MemoryStorage, claim: &Claim) {
    let mut store = storage.clone();
    store.insert_claim(claim).await.unwrap();
}

#[tokio::test]
async fn test_fifo_allocation_oldest_claim_first() {
    let storage = MemoryStorage::new();
    let verein_id = Uuid::new_v4();
    let hans = member(verein_id, "Hans", "Müller", None);
    storage.insert_member(hans.clone(), vec![]);

    let january = claim(&hans, "50.00", date(2024, 1, 1));
    let february = claim(&hans, "50.00", date(2024, 2, 1));
    seed_claim(&storage, &january).await;
    seed_claim(&storage, &february).await;

    let mut engine = engine(&storage);
    let account = Uuid::new_v4();
    let report = engine
        .process_upload(account, verein_id, vec![incoming_row(0, "70.00", "Hans Mueller")])
        .await
        .unwrap();

    assert_eq!(report.matched_count, 1);
    assert_eq!(report.total_allocated, dec("70.00"));
    assert_eq!(report.total_advanced, dec("0.00"));

    assert_eq!(storage.allocated_total(january.id).await.unwrap(), dec("50.00"));
    assert_eq!(storage.allocated_total(february.id).await.unwrap(), dec("20.00"));

    let stored_january = storage.claim(january.id).await.unwrap().unwrap();
    assert_eq!(stored_january.status, ClaimStatus::Paid);
    assert_eq!(stored_january.paid_on, Some(date(2024, 3, 1)));
    let stored_february = storage.claim(february.id).await.unwrap().unwrap();
    assert_eq!(stored_february.status, ClaimStatus::PartiallyPaid);
}

#[tokio::test]
async fn test_overpayment_routes_to_advance() {
    let storage = MemoryStorage::new();
    let verein_id = Uuid::new_v4();
    let hans = member(verein_id, "Hans", "Müller", None);
    storage.insert_member(hans.clone(), vec![]);

    let dues = claim(&hans, "30.00", date(2024, 1, 1));
    seed_claim(&storage, &dues).await;

    let mut engine = engine(&storage);
    let report = engine
        .process_upload(
            Uuid::new_v4(),
            verein_id,
            vec![incoming_row(0, "100.00", "Hans Müller")],
        )
        .await
        .unwrap();

    assert_eq!(report.total_allocated, dec("30.00"));
    assert_eq!(report.total_advanced, dec("70.00"));
    assert_eq!(
        storage.claim(dues.id).await.unwrap().unwrap().status,
        ClaimStatus::Paid
    );

    use vereinskasse_core::AdvanceBalanceStore;
    assert_eq!(storage.advance_total(hans.id).await.unwrap(), dec("70.00"));
}

#[tokio::test]
async fn test_reimport_is_idempotent() {
    let storage = MemoryStorage::new();
    let verein_id = Uuid::new_v4();
    let hans = member(verein_id, "Hans", "Müller", None);
    storage.insert_member(hans.clone(), vec![]);
    seed_claim(&storage, &claim(&hans, "50.00", date(2024, 1, 1))).await;

    let rows = vec![
        incoming_row(0, "50.00", "Hans Müller"),
        incoming_row(1, "25.00", "Unbekannter Spender"),
    ];

    let mut engine = engine(&storage);
    let account = Uuid::new_v4();
    let first = engine
        .process_upload(account, verein_id, rows.clone())
        .await
        .unwrap();
    assert_eq!(first.matched_count, 1);
    assert_eq!(first.unmatched_count, 1);

    let payments_before = storage.payment_count();
    let allocations_before = storage.allocation_count();
    let advances_before = storage.advance_count();
    let transactions_before = storage.bank_transaction_count();

    let second = engine
        .process_upload(account, verein_id, rows)
        .await
        .unwrap();

    assert_eq!(second.duplicate_count, 2);
    assert_eq!(second.matched_count, 0);
    assert_eq!(second.unmatched_count, 0);
    assert_eq!(storage.payment_count(), payments_before);
    assert_eq!(storage.allocation_count(), allocations_before);
    assert_eq!(storage.advance_count(), advances_before);
    assert_eq!(storage.bank_transaction_count(), transactions_before);
}

#[tokio::test]
async fn test_allocation_conservation_per_row() {
    let storage = MemoryStorage::new();
    let verein_id = Uuid::new_v4();
    let hans = member(verein_id, "Hans", "Müller", None);
    storage.insert_member(hans.clone(), vec![]);
    seed_claim(&storage, &claim(&hans, "19.99", date(2024, 1, 1))).await;
    seed_claim(&storage, &claim(&hans, "7.01", date(2024, 2, 1))).await;

    let mut engine = engine(&storage);
    let report = engine
        .process_upload(
            Uuid::new_v4(),
            verein_id,
            vec![incoming_row(0, "100.00", "Hans Müller")],
        )
        .await
        .unwrap();

    let row = &report.rows[0];
    let allocated = row.amount_allocated.clone().unwrap();
    let advanced = row.amount_advanced.clone().unwrap();
    assert_eq!(allocated + advanced, dec("100.00"));
    assert_eq!(report.total_allocated, dec("27.00"));
    assert_eq!(report.total_advanced, dec("73.00"));
}

#[tokio::test]
async fn test_ambiguous_match_never_allocates() {
    let storage = MemoryStorage::new();
    let verein_id = Uuid::new_v4();
    let anna_one = member(verein_id, "Anna", "Schmidt", None);
    let anna_two = member(verein_id, "Anna", "Schmidt", None);
    storage.insert_member(anna_one.clone(), vec![]);
    storage.insert_member(anna_two.clone(), vec![]);
    seed_claim(&storage, &claim(&anna_one, "30.00", date(2024, 1, 1))).await;

    let mut engine = engine(&storage);
    let report = engine
        .process_upload(
            Uuid::new_v4(),
            verein_id,
            vec![incoming_row(0, "30.00", "Anna Schmidt")],
        )
        .await
        .unwrap();

    assert_eq!(report.ambiguous_count, 1);
    match &report.rows[0].outcome {
        RowOutcome::Ambiguous { candidates } => {
            assert_eq!(candidates.len(), 2);
            assert!(candidates.contains(&anna_one.id));
            assert!(candidates.contains(&anna_two.id));
        }
        other => panic!("expected ambiguous outcome, got {:?}", other),
    }

    // Recorded for manual review, but no money moved.
    assert_eq!(storage.payment_count(), 0);
    assert_eq!(storage.allocation_count(), 0);
    assert_eq!(storage.bank_transaction_count(), 1);
}

#[tokio::test]
async fn test_advance_auto_consumption_on_new_claim() {
    let storage = MemoryStorage::new();
    let verein_id = Uuid::new_v4();
    let hans = member(verein_id, "Hans", "Müller", None);
    storage.insert_member(hans.clone(), vec![]);

    // No open claims yet: the whole payment becomes advance balance.
    let mut engine = engine(&storage);
    engine
        .process_upload(
            Uuid::new_v4(),
            verein_id,
            vec![incoming_row(0, "40.00", "Hans Müller")],
        )
        .await
        .unwrap();

    use vereinskasse_core::AdvanceBalanceStore;
    assert_eq!(storage.advance_total(hans.id).await.unwrap(), dec("40.00"));

    // Registering a new claim settles it from the advance immediately.
    let (stored, allocations) = engine
        .register_claim(claim(&hans, "25.00", date(2024, 6, 1)))
        .await
        .unwrap();

    assert_eq!(stored.status, ClaimStatus::Paid);
    assert_eq!(allocations.len(), 1);
    assert_eq!(allocations[0].amount, dec("25.00"));
    assert_eq!(storage.advance_total(hans.id).await.unwrap(), dec("15.00"));
    assert_eq!(storage.payment_count(), 1);

    // The consumption allocation references the original payment, and never
    // exceeds it.
    let origin = storage
        .payment(allocations[0].payment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(origin.amount, dec("40.00"));
    let for_payment = storage
        .allocations_for_payment(origin.id)
        .await
        .unwrap();
    let allocated: BigDecimal = for_payment.iter().map(|a| &a.amount).sum();
    assert!(allocated <= origin.amount);
}

#[tokio::test]
async fn test_currency_mismatch_routes_to_advance_with_flag() {
    let storage = MemoryStorage::new();
    let verein_id = Uuid::new_v4();
    let hans = member(verein_id, "Hans", "Müller", None);
    storage.insert_member(hans.clone(), vec![]);

    let mut chf_claim = claim(&hans, "30.00", date(2024, 1, 1));
    chf_claim.currency = "CHF".to_string();
    seed_claim(&storage, &chf_claim).await;

    let mut engine = engine(&storage);
    let report = engine
        .process_upload(
            Uuid::new_v4(),
            verein_id,
            vec![incoming_row(0, "25.00", "Hans Müller")],
        )
        .await
        .unwrap();

    let row = &report.rows[0];
    assert!(row.currency_mismatch);
    assert_eq!(row.amount_allocated.clone().unwrap(), dec("0.00"));
    assert_eq!(row.amount_advanced.clone().unwrap(), dec("25.00"));
    assert_eq!(
        storage.claim(chf_claim.id).await.unwrap().unwrap().status,
        ClaimStatus::Open
    );
}

#[tokio::test]
async fn test_malformed_row_is_skipped_without_side_effects() {
    let storage = MemoryStorage::new();
    let verein_id = Uuid::new_v4();
    let hans = member(verein_id, "Hans", "Müller", None);
    storage.insert_member(hans.clone(), vec![]);
    seed_claim(&storage, &claim(&hans, "50.00", date(2024, 1, 1))).await;

    let mut broken = incoming_row(0, "50.00", "Hans Müller");
    broken.amount = None;
    let rows = vec![broken, incoming_row(1, "50.00", "Hans Müller")];

    let mut engine = engine(&storage);
    let report = engine
        .process_upload(Uuid::new_v4(), verein_id, rows)
        .await
        .unwrap();

    assert_eq!(report.skipped_count, 1);
    assert_eq!(report.matched_count, 1);
    // Only the valid row left a trace.
    assert_eq!(storage.bank_transaction_count(), 1);
    assert_eq!(storage.payment_count(), 1);
}

#[tokio::test]
async fn test_failed_row_is_isolated_and_retryable() {
    let storage = MemoryStorage::new();
    let verein_id = Uuid::new_v4();
    let hans = member(verein_id, "Hans", "Müller", None);
    let petra = member(verein_id, "Petra", "Vogel", None);
    storage.insert_member(hans.clone(), vec![]);
    storage.insert_member(petra.clone(), vec![]);
    seed_claim(&storage, &claim(&hans, "50.00", date(2024, 1, 1))).await;
    seed_claim(&storage, &claim(&petra, "20.00", date(2024, 1, 1))).await;

    let rows = vec![
        incoming_row(0, "50.00", "Hans Müller"),
        incoming_row(1, "20.00", "Petra Vogel"),
    ];

    let mut engine = engine(&storage);
    let account = Uuid::new_v4();

    // First run: the first row's commit fails, the batch keeps going.
    storage.fail_next_commit();
    let first = engine
        .process_upload(account, verein_id, rows.clone())
        .await
        .unwrap();
    assert_eq!(first.error_count, 1);
    assert_eq!(first.matched_count, 1);
    assert!(matches!(
        first.rows[0].outcome,
        RowOutcome::Errored { .. }
    ));

    // Nothing of the failed row was committed, so a re-run picks it up and
    // recognizes the already-committed row as a duplicate.
    let second = engine
        .process_upload(account, verein_id, rows)
        .await
        .unwrap();
    assert_eq!(second.matched_count, 1);
    assert_eq!(second.duplicate_count, 1);

    use vereinskasse_core::AdvanceBalanceStore;
    assert_eq!(storage.allocated_total(storage.claims_for_member(hans.id).await.unwrap()[0].id).await.unwrap(), dec("50.00"));
    assert_eq!(storage.advance_total(hans.id).await.unwrap(), dec("0.00"));
}

#[tokio::test]
async fn test_member_number_reference_beats_name() {
    let storage = MemoryStorage::new();
    let verein_id = Uuid::new_v4();
    let anna = member(verein_id, "Anna", "Schmidt", Some("MG-1001"));
    let berta = member(verein_id, "Berta", "Klein", Some("MG-2002"));
    storage.insert_member(anna.clone(), vec![]);
    storage.insert_member(berta.clone(), vec![]);
    seed_claim(&storage, &claim(&berta, "30.00", date(2024, 1, 1))).await;

    // The counterparty name says Anna, but the reference carries Berta's
    // member number; the stronger rule wins.
    let mut row = incoming_row(0, "30.00", "Anna Schmidt");
    row.reference = Some("Beitrag MG-2002".to_string());

    let mut engine = engine(&storage);
    let report = engine
        .process_upload(Uuid::new_v4(), verein_id, vec![row])
        .await
        .unwrap();

    assert_eq!(report.matched_count, 1);
    assert_eq!(report.rows[0].member_id, Some(berta.id));
    assert_eq!(
        storage.allocated_total(storage.claims_for_member(berta.id).await.unwrap()[0].id)
            .await
            .unwrap(),
        dec("30.00")
    );
}

#[tokio::test]
async fn test_iban_match_wins_for_registered_account() {
    let storage = MemoryStorage::new();
    let verein_id = Uuid::new_v4();
    let hans = member(verein_id, "Hans", "Müller", None);
    storage.insert_member(hans.clone(), vec!["DE89370400440532013000".to_string()]);
    seed_claim(&storage, &claim(&hans, "30.00", date(2024, 1, 1))).await;

    let mut row = incoming_row(0, "30.00", "H. M.");
    row.iban = Some("DE89 3704 0044 0532 0130 00".to_string());

    let mut engine = engine(&storage);
    let report = engine
        .process_upload(Uuid::new_v4(), verein_id, vec![row])
        .await
        .unwrap();

    assert_eq!(report.matched_count, 1);
    assert_eq!(report.rows[0].member_id, Some(hans.id));
}

#[tokio::test]
async fn test_outgoing_amount_is_recorded_without_payment() {
    let storage = MemoryStorage::new();
    let verein_id = Uuid::new_v4();
    let hans = member(verein_id, "Hans", "Müller", None);
    storage.insert_member(hans.clone(), vec![]);

    let report_row = incoming_row(0, "-15.00", "Hans Müller");
    let mut engine = engine(&storage);
    let report = engine
        .process_upload(Uuid::new_v4(), verein_id, vec![report_row])
        .await
        .unwrap();

    assert_eq!(report.matched_count, 1);
    assert_eq!(report.rows[0].outcome, RowOutcome::MatchedNoPayment);
    assert_eq!(storage.payment_count(), 0);
    assert_eq!(storage.bank_transaction_count(), 1);
}

#[tokio::test]
async fn test_claim_remaining_is_monotonic_across_batch() {
    let storage = MemoryStorage::new();
    let verein_id = Uuid::new_v4();
    let hans = member(verein_id, "Hans", "Müller", None);
    storage.insert_member(hans.clone(), vec![]);
    let dues = claim(&hans, "50.00", date(2024, 1, 1));
    seed_claim(&storage, &dues).await;

    // Three partial payments in one batch; later rows must see earlier
    // allocations.
    let mut rows = Vec::new();
    for (index, amount) in ["20.00", "20.00", "20.00"].iter().enumerate() {
        let mut row = incoming_row(index, amount, "Hans Müller");
        row.reference = Some(format!("Rate {}", index + 1));
        rows.push(row);
    }

    let mut engine = engine(&storage);
    let report = engine
        .process_upload(Uuid::new_v4(), verein_id, rows)
        .await
        .unwrap();

    assert_eq!(report.matched_count, 3);
    // 20 + 20 + 10 allocated, 10 to advance; never above the claim amount.
    assert_eq!(storage.allocated_total(dues.id).await.unwrap(), dec("50.00"));
    assert_eq!(report.total_allocated, dec("50.00"));
    assert_eq!(report.total_advanced, dec("10.00"));
    assert_eq!(
        storage.claim(dues.id).await.unwrap().unwrap().status,
        ClaimStatus::Paid
    );
}

#[tokio::test]
async fn test_manual_match_resolves_unmatched_transaction() {
    let storage = MemoryStorage::new();
    let verein_id = Uuid::new_v4();
    let hans = member(verein_id, "Hans", "Müller", Some("MG-1001"));
    storage.insert_member(hans.clone(), vec![]);
    let dues = claim(&hans, "30.00", date(2024, 1, 1));
    seed_claim(&storage, &dues).await;

    let mut engine = engine(&storage);
    let report = engine
        .process_upload(
            Uuid::new_v4(),
            verein_id,
            vec![incoming_row(0, "30.00", "Firma Treuhand GmbH")],
        )
        .await
        .unwrap();
    assert_eq!(report.unmatched_count, 1);

    let unmatched = engine.unmatched_transactions(verein_id).await.unwrap();
    assert_eq!(unmatched.len(), 1);

    // Operator resolves by member number.
    let resolved = engine
        .manual_match_by_number(unmatched[0].id, "MG-1001")
        .await
        .unwrap();
    assert_eq!(resolved.member_id, Some(hans.id));
    assert_eq!(resolved.amount_allocated.clone().unwrap(), dec("30.00"));

    assert!(engine.unmatched_transactions(verein_id).await.unwrap().is_empty());
    assert_eq!(
        storage.claim(dues.id).await.unwrap().unwrap().status,
        ClaimStatus::Paid
    );

    // A second resolution of the same line is rejected.
    let again = engine.manual_match(unmatched[0].id, hans.id).await;
    assert!(again.is_err());
}

#[tokio::test]
async fn test_member_summary_reflects_ledger() {
    let storage = MemoryStorage::new();
    let verein_id = Uuid::new_v4();
    let hans = member(verein_id, "Hans", "Müller", None);
    storage.insert_member(hans.clone(), vec![]);
    seed_claim(&storage, &claim(&hans, "50.00", date(2024, 1, 1))).await;
    seed_claim(&storage, &claim(&hans, "50.00", date(2024, 2, 1))).await;

    let mut engine = engine(&storage);
    engine
        .process_upload(
            Uuid::new_v4(),
            verein_id,
            vec![incoming_row(0, "120.00", "Hans Müller")],
        )
        .await
        .unwrap();

    let summary = engine.member_summary(hans.id).await.unwrap();
    assert_eq!(summary.outstanding_total, dec("0.00"));
    assert_eq!(summary.paid_total, dec("100.00"));
    assert_eq!(summary.advance_total, dec("20.00"));
    assert_eq!(summary.paid_claim_count, 2);
    assert_eq!(summary.open_claim_count, 0);
}

#[tokio::test]
async fn test_report_serializes_for_the_upload_endpoint() {
    let storage = MemoryStorage::new();
    let verein_id = Uuid::new_v4();
    let hans = member(verein_id, "Hans", "Müller", None);
    storage.insert_member(hans.clone(), vec![]);

    let mut engine = engine(&storage);
    let report = engine
        .process_upload(
            Uuid::new_v4(),
            verein_id,
            vec![incoming_row(0, "10.00", "Hans Müller")],
        )
        .await
        .unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["matched_count"], 1);
    assert_eq!(json["rows"][0]["outcome"]["kind"], "matched");
}
