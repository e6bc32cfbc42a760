//! Traits for storage abstraction and external collaborators

use async_trait::async_trait;
use bigdecimal::BigDecimal;

use crate::types::*;

/// Turns a raw uploaded tabular file into an ordered list of candidate rows.
///
/// Statement parsing (CSV, Excel, MT940, ...) lives outside this crate; any
/// parser that produces [`CandidateRow`]s in file order can drive the engine.
#[async_trait]
pub trait RowNormalizer: Send + Sync {
    /// Parse the file into candidate rows, preserving file order
    async fn normalize(&self, file: &[u8]) -> ReconcileResult<Vec<CandidateRow>>;
}

/// Member directory lookups.
///
/// The directory is an external collaborator; this crate only reads from it.
/// A failure here is catastrophic for a batch — without the directory no row
/// can be matched — so directory errors abort the whole run.
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    /// All active members of the Verein
    async fn list_active_members(&self, verein_id: VereinId)
        -> ReconcileResult<Vec<MemberProfile>>;

    /// Resolve a member number to a member, if exactly one active member
    /// carries it
    async fn find_member_by_number(
        &self,
        verein_id: VereinId,
        number: &str,
    ) -> ReconcileResult<Option<MemberId>>;

    /// IBANs registered for a member
    async fn registered_ibans(&self, member_id: MemberId) -> ReconcileResult<Vec<String>>;

    /// IBANs of the association's own bank accounts; excluded from member
    /// matching so internal transfers never resolve to a member
    async fn list_association_ibans(&self, verein_id: VereinId) -> ReconcileResult<Vec<String>>;
}

/// Claim reads and claim creation
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Get a claim by id
    async fn claim(&self, claim_id: ClaimId) -> ReconcileResult<Option<Claim>>;

    /// Claims with status Open or PartiallyPaid, ordered by due date
    /// ascending, ties broken by claim id ascending
    async fn open_claims(&self, member_id: MemberId) -> ReconcileResult<Vec<Claim>>;

    /// All claims of a member regardless of status
    async fn claims_for_member(&self, member_id: MemberId) -> ReconcileResult<Vec<Claim>>;

    /// Insert a new claim
    async fn insert_claim(&mut self, claim: &Claim) -> ReconcileResult<()>;
}

/// Payment and allocation reads
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Get a payment by id
    async fn payment(&self, payment_id: PaymentId) -> ReconcileResult<Option<Payment>>;

    /// Sum of allocation amounts recorded for a claim; the claim's derived
    /// `paid` amount
    async fn allocated_total(&self, claim_id: ClaimId) -> ReconcileResult<BigDecimal>;

    /// Allocations recorded for a payment
    async fn allocations_for_payment(
        &self,
        payment_id: PaymentId,
    ) -> ReconcileResult<Vec<PaymentAllocation>>;
}

/// Advance-balance reads
#[async_trait]
pub trait AdvanceBalanceStore: Send + Sync {
    /// Advance records with remaining > 0, oldest first
    async fn open_advances(&self, member_id: MemberId) -> ReconcileResult<Vec<AdvanceBalance>>;

    /// Sum of remaining advance amounts for a member
    async fn advance_total(&self, member_id: MemberId) -> ReconcileResult<BigDecimal>;
}

/// Bank transaction reads and the duplicate-guard existence check
#[async_trait]
pub trait BankTransactionStore: Send + Sync {
    /// Get a bank transaction by id
    async fn bank_transaction(
        &self,
        id: BankTransactionId,
    ) -> ReconcileResult<Option<BankTransaction>>;

    /// Whether a statement line with this fingerprint is already recorded for
    /// the account
    async fn fingerprint_exists(
        &self,
        bank_account_id: BankAccountId,
        fingerprint: &str,
    ) -> ReconcileResult<bool>;

    /// Recorded transactions without a member match, newest first, for manual
    /// review
    async fn unmatched_for_verein(
        &self,
        verein_id: VereinId,
    ) -> ReconcileResult<Vec<BankTransaction>>;
}

/// Full persistence boundary of the engine.
///
/// `commit_unit` is the single write seam: one statement row's bank
/// transaction, payment, allocations, claim updates, and advance mutations
/// are applied together or not at all. Implementations must verify ledger
/// invariants before applying anything and reject the whole unit on failure,
/// so a rejected row never leaves partial writes behind.
#[async_trait]
pub trait ReconciliationStorage:
    ClaimStore + PaymentStore + AdvanceBalanceStore + BankTransactionStore
{
    /// Apply one atomic unit of ledger writes, commit-or-rollback
    async fn commit_unit(
        &mut self,
        unit: crate::reconciliation::writer::LedgerCommit,
    ) -> ReconcileResult<()>;
}
