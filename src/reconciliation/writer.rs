//! Persisting one statement row as a single atomic unit
//!
//! Everything a row writes — bank transaction, payment, allocations, claim
//! updates, advance mutations — goes through one [`LedgerCommit`]. The
//! storage backend applies the unit commit-or-rollback, so a failed row
//! leaves no partial state behind and never affects rows already committed
//! in the same batch. Re-running a batch after a crash is safe: if only the
//! bank transaction committed, the duplicate guard recognizes its
//! fingerprint on the next run.

use tracing::{error, info};

use crate::reconciliation::allocation::{AllocationPlan, ConsumptionPlan};
use crate::traits::ReconciliationStorage;
use crate::types::*;

/// One atomic unit of ledger writes
#[derive(Debug, Clone, Default)]
pub struct LedgerCommit {
    /// Newly recorded statement line, if the unit stems from an import row
    pub bank_transaction: Option<BankTransaction>,
    /// Payment recorded for the row, if it was matched and incoming
    pub payment: Option<Payment>,
    pub allocations: Vec<PaymentAllocation>,
    /// Claims with recomputed status
    pub claim_updates: Vec<Claim>,
    /// Advance record created for a payment surplus
    pub new_advance: Option<AdvanceBalance>,
    /// Advance records with decremented remaining amounts
    pub advance_updates: Vec<AdvanceBalance>,
}

impl LedgerCommit {
    /// Unit for a row that was recorded but not matched (or matched without a
    /// payment, for outgoing amounts)
    pub fn transaction_only(transaction: BankTransaction) -> Self {
        Self {
            bank_transaction: Some(transaction),
            ..Default::default()
        }
    }

    /// Unit for a matched incoming row: transaction, payment, and the
    /// allocation plan's writes
    pub fn matched_row(
        mut transaction: BankTransaction,
        payment: Payment,
        plan: &AllocationPlan,
    ) -> Self {
        transaction.matched = true;
        transaction.payment_id = Some(payment.id);
        Self {
            bank_transaction: Some(transaction),
            payment: Some(payment),
            allocations: plan.allocations.clone(),
            claim_updates: plan.claim_updates.clone(),
            new_advance: plan.new_advance.clone(),
            advance_updates: Vec::new(),
        }
    }

    /// Unit for consuming advance records against a claim; no new statement
    /// line or payment is involved
    pub fn advance_consumption(plan: &ConsumptionPlan) -> Self {
        Self {
            bank_transaction: None,
            payment: None,
            allocations: plan.allocations.clone(),
            claim_updates: plan.claim_update.clone().into_iter().collect(),
            new_advance: None,
            advance_updates: plan.advance_updates.clone(),
        }
    }
}

/// Writes commit units to storage with outcome logging
pub struct LedgerWriter;

impl LedgerWriter {
    /// Persist one unit atomically.
    ///
    /// An [`ReconcileError::InvariantViolation`] here means the engine
    /// produced an inconsistent unit — a bug, not a data problem — and is
    /// logged at error level, distinct from ordinary row skips.
    pub async fn persist<S: ReconciliationStorage>(
        storage: &mut S,
        unit: LedgerCommit,
    ) -> ReconcileResult<()> {
        let transaction_id = unit.bank_transaction.as_ref().map(|t| t.id);
        let allocation_count = unit.allocations.len();

        match storage.commit_unit(unit).await {
            Ok(()) => {
                info!(
                    transaction_id = ?transaction_id,
                    allocation_count,
                    "committed ledger unit"
                );
                Ok(())
            }
            Err(ReconcileError::InvariantViolation(message)) => {
                error!(
                    transaction_id = ?transaction_id,
                    %message,
                    "ledger invariant violated, unit rolled back"
                );
                Err(ReconcileError::InvariantViolation(message))
            }
            Err(other) => Err(other),
        }
    }
}
