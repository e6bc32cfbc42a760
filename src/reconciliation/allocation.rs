//! Distributing incoming money across open claims and advance balances
//!
//! Planning is pure: it reads an in-memory snapshot of the member's ledger
//! and produces the allocations, claim updates, and advance mutations for one
//! payment, without touching storage. The writer persists the plan atomically
//! and the batch coordinator replays it onto the cached snapshot, so later
//! rows of the same batch observe earlier rows' allocations.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use tracing::debug;

use crate::traits::{ClaimStore, PaymentStore};
use crate::types::*;
use crate::utils::validation::round_to_minor_unit;

/// One open claim together with its derived allocated total
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimState {
    pub claim: Claim,
    /// Sum of the claim's allocations so far
    pub paid: BigDecimal,
}

impl ClaimState {
    /// Remaining amount the claim can still absorb
    pub fn remaining(&self) -> BigDecimal {
        self.claim.remaining(&self.paid)
    }
}

/// In-memory snapshot of everything allocation needs for one member.
///
/// Loaded once per member per batch; no storage round-trips happen inside
/// the allocation loop.
#[derive(Debug, Clone)]
pub struct MemberLedger {
    pub member_id: MemberId,
    /// Open claims, due date ascending, ties broken by claim id
    pub claims: Vec<ClaimState>,
}

impl MemberLedger {
    /// Load the member's open claims with their derived paid totals
    pub async fn load<S>(store: &S, member_id: MemberId) -> ReconcileResult<Self>
    where
        S: ClaimStore + PaymentStore,
    {
        let open = store.open_claims(member_id).await?;
        let mut claims = Vec::with_capacity(open.len());
        for claim in open {
            let paid = store.allocated_total(claim.id).await?;
            claims.push(ClaimState { claim, paid });
        }
        claims.sort_by(|a, b| {
            a.claim
                .due_date
                .cmp(&b.claim.due_date)
                .then_with(|| a.claim.id.cmp(&b.claim.id))
        });

        Ok(Self { member_id, claims })
    }

    /// Replay a committed allocation plan onto the snapshot
    pub fn apply(&mut self, plan: &AllocationPlan) {
        for update in &plan.claim_updates {
            if let Some(state) = self.claims.iter_mut().find(|s| s.claim.id == update.id) {
                let allocated: BigDecimal = plan
                    .allocations
                    .iter()
                    .filter(|a| a.claim_id == update.id)
                    .map(|a| &a.amount)
                    .sum();
                state.paid += allocated;
                state.claim = update.clone();
            }
        }
        self.claims.retain(|s| s.claim.is_open());
    }
}

/// Everything one payment does to the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationPlan {
    pub allocations: Vec<PaymentAllocation>,
    /// Claims whose status changed, carrying their recomputed status
    pub claim_updates: Vec<Claim>,
    /// Amount routed to the member's advance balance
    pub advance_delta: BigDecimal,
    /// Advance record created for the payment's surplus, if any
    pub new_advance: Option<AdvanceBalance>,
    /// Open claims existed but none shared the payment currency; the whole
    /// amount went to advance and needs manual handling
    pub currency_mismatch: bool,
}

impl AllocationPlan {
    /// Total amount allocated to claims
    pub fn allocated_total(&self) -> BigDecimal {
        self.allocations.iter().map(|a| &a.amount).sum()
    }
}

/// Distribute a positive incoming payment across the member's open claims,
/// oldest first, routing any surplus to a new advance record.
///
/// Conservation holds exactly: allocated total + advance delta equals the
/// payment amount, decimal-exact.
pub fn plan_allocation(ledger: &MemberLedger, payment: &Payment) -> ReconcileResult<AllocationPlan> {
    if payment.amount <= BigDecimal::from(0) {
        return Err(ReconcileError::Validation(
            "Allocation requires a positive payment amount".to_string(),
        ));
    }

    let mut remaining = payment.amount.clone();
    let mut allocations = Vec::new();
    let mut claim_updates = Vec::new();

    let open_count = ledger.claims.iter().filter(|s| s.claim.is_open()).count();
    let mut eligible = 0usize;

    for state in &ledger.claims {
        if remaining <= BigDecimal::from(0) {
            break;
        }
        if !state.claim.is_open() || state.claim.currency != payment.currency {
            continue;
        }
        eligible += 1;

        let claim_remaining = state.remaining();
        if claim_remaining <= BigDecimal::from(0) {
            // Derived remaining disagrees with the open status; leave the
            // claim alone rather than allocate nothing against it.
            continue;
        }

        let take = if remaining < claim_remaining {
            remaining.clone()
        } else {
            claim_remaining.clone()
        };
        let take = round_to_minor_unit(&take, &payment.currency);
        if take <= BigDecimal::from(0) {
            continue;
        }
        if take > claim_remaining {
            return Err(ReconcileError::InvariantViolation(format!(
                "Allocation of {} would exceed remaining {} on claim {}",
                take, claim_remaining, state.claim.id
            )));
        }

        allocations.push(PaymentAllocation::new(state.claim.id, payment.id, take.clone()));
        remaining -= &take;

        let new_paid = &state.paid + &take;
        let mut updated = state.claim.clone();
        updated.status = updated.status_for(&new_paid);
        if updated.status == ClaimStatus::Paid {
            updated.paid_on = Some(payment.date);
        }
        updated.updated_at = chrono::Utc::now().naive_utc();
        claim_updates.push(updated);
    }

    let currency_mismatch = open_count > 0 && eligible == 0;
    let new_advance = if remaining > BigDecimal::from(0) {
        Some(AdvanceBalance::new(payment, remaining.clone()))
    } else {
        None
    };

    debug!(
        member_id = %ledger.member_id,
        payment_id = %payment.id,
        allocated = %(&payment.amount - &remaining),
        advanced = %remaining,
        currency_mismatch,
        "planned allocation"
    );

    Ok(AllocationPlan {
        allocations,
        claim_updates,
        advance_delta: remaining,
        new_advance,
        currency_mismatch,
    })
}

/// Result of consuming advance balances against one claim
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumptionPlan {
    pub allocations: Vec<PaymentAllocation>,
    /// The claim with its recomputed status, absent when nothing was consumed
    pub claim_update: Option<Claim>,
    /// Advance records with decremented remaining amounts
    pub advance_updates: Vec<AdvanceBalance>,
}

impl ConsumptionPlan {
    /// Whether the plan carries any writes
    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }
}

/// Consume the member's advance records against a newly created claim,
/// oldest record first, treating each record as a virtual payment from its
/// originating payment.
///
/// Keeps oldest-claim-first allocation consistent regardless of whether the
/// money arrived before or after the claim existed. Records in a different
/// currency are skipped.
pub fn plan_advance_consumption(
    claim: &Claim,
    paid: &BigDecimal,
    advances: &[AdvanceBalance],
    value_date: NaiveDate,
) -> ReconcileResult<ConsumptionPlan> {
    let mut claim_remaining = claim.remaining(paid);
    let mut allocations = Vec::new();
    let mut advance_updates = Vec::new();
    let mut new_paid = paid.clone();

    if claim.is_open() {
        for advance in advances {
            if claim_remaining <= BigDecimal::from(0) {
                break;
            }
            if advance.currency != claim.currency || advance.remaining <= BigDecimal::from(0) {
                continue;
            }

            let take = if claim_remaining < advance.remaining {
                claim_remaining.clone()
            } else {
                advance.remaining.clone()
            };
            let take = round_to_minor_unit(&take, &claim.currency);
            if take <= BigDecimal::from(0) {
                continue;
            }

            allocations.push(PaymentAllocation::new(claim.id, advance.payment_id, take.clone()));
            claim_remaining -= &take;
            new_paid += &take;

            let mut updated = advance.clone();
            updated.remaining = &advance.remaining - &take;
            updated.updated_at = chrono::Utc::now().naive_utc();
            if updated.remaining < BigDecimal::from(0) {
                return Err(ReconcileError::InvariantViolation(format!(
                    "Advance record {} would go negative",
                    advance.id
                )));
            }
            advance_updates.push(updated);
        }
    }

    let claim_update = if allocations.is_empty() {
        None
    } else {
        let mut updated = claim.clone();
        updated.status = updated.status_for(&new_paid);
        if updated.status == ClaimStatus::Paid {
            updated.paid_on = Some(value_date);
        }
        updated.updated_at = chrono::Utc::now().naive_utc();
        Some(updated)
    };

    Ok(ConsumptionPlan {
        allocations,
        claim_update,
        advance_updates,
    })
}
