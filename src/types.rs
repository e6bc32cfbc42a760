//! Core types and data structures for the reconciliation engine

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a Verein (association tenant)
pub type VereinId = Uuid;
/// Identifier of a member
pub type MemberId = Uuid;
/// Identifier of a bank account owned by the Verein
pub type BankAccountId = Uuid;
/// Identifier of an imported bank statement line
pub type BankTransactionId = Uuid;
/// Identifier of a member claim (Forderung)
pub type ClaimId = Uuid;
/// Identifier of a recorded payment (Zahlung)
pub type PaymentId = Uuid;
/// Identifier of a payment-to-claim allocation
pub type AllocationId = Uuid;
/// Identifier of an advance-balance record (Vorauszahlung)
pub type AdvanceId = Uuid;

/// One candidate transaction record produced by an external row normalizer.
///
/// All business fields are optional at this stage; the engine validates them
/// and skips rows that are missing date, amount, or currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRow {
    /// Zero-based position of the row in the uploaded file
    pub row_index: usize,
    /// Posting date of the statement line
    pub posting_date: Option<NaiveDate>,
    /// Signed amount; positive for incoming money
    pub amount: Option<BigDecimal>,
    /// ISO 4217 currency code
    pub currency: Option<String>,
    /// Counterparty name as printed on the statement
    pub counterparty: Option<String>,
    /// Free-text purpose (Verwendungszweck)
    pub purpose: Option<String>,
    /// Reference code (Referenz)
    pub reference: Option<String>,
    /// Counterparty IBAN, if the statement format carries one
    pub iban: Option<String>,
}

/// A candidate row that passed field validation.
///
/// Amount is normalized to the currency's minor unit and the currency code is
/// uppercased, so downstream arithmetic and fingerprinting see one canonical
/// representation per statement line.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidRow {
    pub row_index: usize,
    pub posting_date: NaiveDate,
    pub amount: BigDecimal,
    pub currency: String,
    pub counterparty: Option<String>,
    pub purpose: Option<String>,
    pub reference: Option<String>,
    pub iban: Option<String>,
}

/// One line item from an imported bank statement.
///
/// Created once per accepted row and never mutated afterwards, except to set
/// the payment link and the matched flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankTransaction {
    pub id: BankTransactionId,
    pub bank_account_id: BankAccountId,
    pub verein_id: VereinId,
    pub posting_date: NaiveDate,
    /// Signed amount; positive for incoming money
    pub amount: BigDecimal,
    pub currency: String,
    pub counterparty: Option<String>,
    pub purpose: Option<String>,
    pub reference: Option<String>,
    pub iban: Option<String>,
    /// Stable identity of the statement line, unique per account
    pub fingerprint: String,
    /// Whether the line was resolved to a member
    pub matched: bool,
    /// Payment recorded for this line, if any
    pub payment_id: Option<PaymentId>,
    pub created_at: NaiveDateTime,
}

impl BankTransaction {
    /// Create a bank transaction from a validated row
    pub fn from_row(
        row: &ValidRow,
        bank_account_id: BankAccountId,
        verein_id: VereinId,
        fingerprint: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            bank_account_id,
            verein_id,
            posting_date: row.posting_date,
            amount: row.amount.clone(),
            currency: row.currency.clone(),
            counterparty: row.counterparty.clone(),
            purpose: row.purpose.clone(),
            reference: row.reference.clone(),
            iban: row.iban.clone(),
            fingerprint,
            matched: false,
            payment_id: None,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }
}

/// Directory read model of a member, used for matching.
///
/// Read-only to this crate; the member directory is an external collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberProfile {
    pub id: MemberId,
    pub verein_id: VereinId,
    pub first_name: String,
    pub last_name: String,
    /// Member number (Mitgliedsnummer), if assigned
    pub member_number: Option<String>,
    pub active: bool,
}

impl MemberProfile {
    /// Display name in "first last" order, as statements usually print it
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// What a member owes: dues, event fees, donations pledged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClaimType {
    /// Recurring membership dues (Aidat)
    Dues,
    /// Fee for an event registration
    EventFee,
    /// Pledged donation
    Donation,
    /// Anything else the treasurer books manually
    Other,
}

/// Lifecycle of a claim, recomputed from its allocations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClaimStatus {
    Open,
    PartiallyPaid,
    Paid,
    Cancelled,
}

/// An amount owed by a member (Forderung).
///
/// `paid` and `remaining` are derived from the sum of the claim's allocations
/// and are never stored; see [`Claim::remaining`] and [`Claim::status_for`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: ClaimId,
    pub member_id: MemberId,
    pub verein_id: VereinId,
    pub claim_type: ClaimType,
    pub currency: String,
    /// Original claimed amount
    pub amount: BigDecimal,
    pub due_date: NaiveDate,
    pub status: ClaimStatus,
    /// Date the claim became fully paid, if it did
    pub paid_on: Option<NaiveDate>,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Claim {
    /// Create a new open claim
    pub fn new(
        member_id: MemberId,
        verein_id: VereinId,
        claim_type: ClaimType,
        amount: BigDecimal,
        currency: String,
        due_date: NaiveDate,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: Uuid::new_v4(),
            member_id,
            verein_id,
            claim_type,
            currency,
            amount,
            due_date,
            status: ClaimStatus::Open,
            paid_on: None,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Remaining amount given the allocated total, clamped at zero
    pub fn remaining(&self, paid: &BigDecimal) -> BigDecimal {
        let remaining = &self.amount - paid;
        if remaining < BigDecimal::from(0) {
            BigDecimal::from(0)
        } else {
            remaining
        }
    }

    /// Status the claim should carry given the allocated total.
    ///
    /// Cancelled claims keep their status regardless of allocations.
    pub fn status_for(&self, paid: &BigDecimal) -> ClaimStatus {
        if self.status == ClaimStatus::Cancelled {
            return ClaimStatus::Cancelled;
        }
        if self.remaining(paid) == BigDecimal::from(0) {
            ClaimStatus::Paid
        } else if *paid > BigDecimal::from(0) {
            ClaimStatus::PartiallyPaid
        } else {
            ClaimStatus::Open
        }
    }

    /// Whether the claim can still receive allocations
    pub fn is_open(&self) -> bool {
        matches!(self.status, ClaimStatus::Open | ClaimStatus::PartiallyPaid)
    }
}

/// A recorded incoming payment from a member (Zahlung). Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub member_id: MemberId,
    pub verein_id: VereinId,
    pub amount: BigDecimal,
    pub currency: String,
    pub date: NaiveDate,
    /// Statement line this payment originated from; payments from non-bank
    /// sources carry no link
    pub bank_transaction_id: Option<BankTransactionId>,
    pub note: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Payment {
    /// Create a payment originating from a bank statement line
    pub fn from_bank_transaction(transaction: &BankTransaction, member_id: MemberId) -> Self {
        Self {
            id: Uuid::new_v4(),
            member_id,
            verein_id: transaction.verein_id,
            amount: transaction.amount.clone(),
            currency: transaction.currency.clone(),
            date: transaction.posting_date,
            bank_transaction_id: Some(transaction.id),
            note: transaction.purpose.clone(),
            created_at: chrono::Utc::now().naive_utc(),
        }
    }
}

/// Value on the claim/payment join: how much of one payment went to one claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAllocation {
    pub id: AllocationId,
    pub claim_id: ClaimId,
    pub payment_id: PaymentId,
    /// Allocated amount, always positive
    pub amount: BigDecimal,
    pub created_at: NaiveDateTime,
}

impl PaymentAllocation {
    /// Create an allocation of `amount` from `payment_id` to `claim_id`
    pub fn new(claim_id: ClaimId, payment_id: PaymentId, amount: BigDecimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            claim_id,
            payment_id,
            amount,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }
}

/// Unallocated payment surplus held against future claims (Vorauszahlung).
///
/// One record per originating payment; a member's advance balance is the sum
/// of their records' `remaining`. Remaining never increases after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvanceBalance {
    pub id: AdvanceId,
    pub member_id: MemberId,
    pub verein_id: VereinId,
    /// Payment whose surplus this record holds
    pub payment_id: PaymentId,
    pub currency: String,
    pub remaining: BigDecimal,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl AdvanceBalance {
    /// Create an advance record for the surplus of one payment
    pub fn new(payment: &Payment, remaining: BigDecimal) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: Uuid::new_v4(),
            member_id: payment.member_id,
            verein_id: payment.verein_id,
            payment_id: payment.id,
            currency: payment.currency.clone(),
            remaining,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Why a row was skipped without side effects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MissingDate,
    MissingAmount,
    MissingCurrency,
}

/// Outcome of one statement row; every processed row gets exactly one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowOutcome {
    /// Member matched, payment recorded, money allocated and/or advanced
    Matched,
    /// Member matched but the amount is outgoing or zero, so no payment exists
    MatchedNoPayment,
    /// No member candidate found; recorded for manual resolution
    Unmatched,
    /// More than one member candidate; never auto-allocated
    Ambiguous { candidates: Vec<MemberId> },
    /// Statement line already recorded for this account
    Duplicate,
    /// Row failed field validation and produced no side effects
    Skipped { reason: SkipReason },
    /// Row-level failure; the row's writes were rolled back
    Errored { message: String },
}

/// Per-row entry of the reconciliation report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowReport {
    pub row_index: usize,
    pub outcome: RowOutcome,
    pub member_id: Option<MemberId>,
    /// Amount allocated to claims by this row
    pub amount_allocated: Option<BigDecimal>,
    /// Amount routed to the member's advance balance by this row
    pub amount_advanced: Option<BigDecimal>,
    /// The amount could not be allocated because no open claim shares the
    /// payment currency; routed to advance for manual handling
    pub currency_mismatch: bool,
}

impl RowReport {
    /// Report entry carrying only an outcome
    pub fn bare(row_index: usize, outcome: RowOutcome) -> Self {
        Self {
            row_index,
            outcome,
            member_id: None,
            amount_allocated: None,
            amount_advanced: None,
            currency_mismatch: false,
        }
    }
}

/// Result of one batch run over an uploaded statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub matched_count: usize,
    pub unmatched_count: usize,
    pub ambiguous_count: usize,
    pub duplicate_count: usize,
    pub skipped_count: usize,
    pub error_count: usize,
    /// Total amount allocated to claims across the batch
    pub total_allocated: BigDecimal,
    /// Total amount routed to advance balances across the batch
    pub total_advanced: BigDecimal,
    pub rows: Vec<RowReport>,
}

impl ReconciliationReport {
    /// Empty report, ready to accumulate row outcomes
    pub fn new() -> Self {
        Self {
            matched_count: 0,
            unmatched_count: 0,
            ambiguous_count: 0,
            duplicate_count: 0,
            skipped_count: 0,
            error_count: 0,
            total_allocated: BigDecimal::from(0),
            total_advanced: BigDecimal::from(0),
            rows: Vec::new(),
        }
    }

    /// Record one row outcome, updating counts and totals
    pub fn record(&mut self, row: RowReport) {
        match &row.outcome {
            RowOutcome::Matched | RowOutcome::MatchedNoPayment => self.matched_count += 1,
            RowOutcome::Unmatched => self.unmatched_count += 1,
            RowOutcome::Ambiguous { .. } => self.ambiguous_count += 1,
            RowOutcome::Duplicate => self.duplicate_count += 1,
            RowOutcome::Skipped { .. } => self.skipped_count += 1,
            RowOutcome::Errored { .. } => self.error_count += 1,
        }
        if let Some(allocated) = &row.amount_allocated {
            self.total_allocated += allocated;
        }
        if let Some(advanced) = &row.amount_advanced {
            self.total_advanced += advanced;
        }
        self.rows.push(row);
    }
}

impl Default for ReconciliationReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only finance snapshot of one member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberFinanceSummary {
    pub member_id: MemberId,
    /// Sum of remaining amounts over open claims
    pub outstanding_total: BigDecimal,
    /// Sum of allocations over all of the member's claims
    pub paid_total: BigDecimal,
    /// Sum of remaining advance-balance records
    pub advance_total: BigDecimal,
    pub open_claim_count: usize,
    pub paid_claim_count: usize,
}

/// Errors that can occur in the reconciliation engine
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Member directory unavailable: {0}")]
    DirectoryUnavailable(String),
    /// A write would have broken a ledger invariant; indicates a bug, not a
    /// data problem, and the offending unit was not applied
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    #[error("Claim not found: {0}")]
    ClaimNotFound(ClaimId),
    #[error("Bank transaction not found: {0}")]
    TransactionNotFound(BankTransactionId),
    #[error("Member not found: {0}")]
    MemberNotFound(MemberId),
    #[error("Bank transaction {0} is already matched")]
    AlreadyMatched(BankTransactionId),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Row normalizer error: {0}")]
    Normalizer(String),
}

/// Result type for reconciliation operations
pub type ReconcileResult<T> = Result<T, ReconcileError>;
