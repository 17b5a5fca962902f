//! Segment membership synchronizer.
//!
//! Two independent writers share `Segment::audience_size`:
//!
//! * the recompute path, which counts the segment's rules over the entire
//!   customer store and overwrites the size;
//! * the delta path, which adds or subtracts one per explicit membership
//!   change on a customer and never evaluates rules.
//!
//! The two are not reconciled. After a rule edit the size reflects the
//! rules; later customer edits move it by deltas from there.

use std::collections::BTreeSet;
use std::sync::Arc;

use audience_core::error::AudienceResult;
use audience_core::types::{Customer, RuleDescriptor};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::counter::AudienceCounter;
use crate::store::{CustomerStore, SegmentStore};

/// Result of a batched delta. Failed ids are not retried, and applied ids
/// are not rolled back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaOutcome {
    pub applied: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

impl DeltaOutcome {
    pub fn merge(&mut self, other: DeltaOutcome) {
        self.applied.extend(other.applied);
        self.failed.extend(other.failed);
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Segments gained and lost between two membership sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipChange {
    pub added: Vec<Uuid>,
    pub removed: Vec<Uuid>,
}

impl MembershipChange {
    pub fn between(before: &BTreeSet<Uuid>, after: &BTreeSet<Uuid>) -> Self {
        Self {
            added: after.difference(before).copied().collect(),
            removed: before.difference(after).copied().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Clone)]
pub struct MembershipSynchronizer {
    customers: Arc<dyn CustomerStore>,
    segments: Arc<dyn SegmentStore>,
    counter: AudienceCounter,
}

impl MembershipSynchronizer {
    pub fn new(customers: Arc<dyn CustomerStore>, segments: Arc<dyn SegmentStore>) -> Self {
        let counter = AudienceCounter::new(customers.clone());
        Self {
            customers,
            segments,
            counter,
        }
    }

    pub fn counter(&self) -> &AudienceCounter {
        &self.counter
    }

    // ─── Recompute path ────────────────────────────────────────────────────

    /// Count `rules` over the whole customer store and overwrite the
    /// segment's audience size. Explicit memberships are ignored.
    pub async fn recompute_from_rules(
        &self,
        segment_id: Uuid,
        rules: &[RuleDescriptor],
    ) -> AudienceResult<u64> {
        let size = self.counter.count_rules(rules).await?;
        self.segments
            .set_audience_size(segment_id, i64::try_from(size).unwrap_or(i64::MAX))
            .await?;
        info!(segment_id = %segment_id, audience_size = size, "Audience size recomputed from rules");
        metrics::counter!("segments.recomputed").increment(1);
        Ok(size)
    }

    // ─── Delta path ────────────────────────────────────────────────────────

    /// Add `delta` to each segment's audience size. Each increment is atomic
    /// at the store; the batch as a whole is not.
    pub async fn apply_membership_delta(&self, segment_ids: &[Uuid], delta: i64) -> DeltaOutcome {
        let mut outcome = DeltaOutcome::default();
        for &segment_id in segment_ids {
            match self.segments.increment_audience_size(segment_id, delta).await {
                Ok(size) => {
                    debug!(segment_id = %segment_id, delta, audience_size = size, "Membership delta applied");
                    metrics::counter!("membership.delta.applied").increment(1);
                    outcome.applied.push(segment_id);
                }
                Err(e) => {
                    warn!(segment_id = %segment_id, delta, error = %e, "Membership delta failed");
                    metrics::counter!("membership.delta.failed").increment(1);
                    outcome.failed.push(segment_id);
                }
            }
        }
        outcome
    }

    pub async fn customer_created(&self, customer: &Customer) -> DeltaOutcome {
        let ids: Vec<Uuid> = customer.segments.iter().copied().collect();
        self.apply_membership_delta(&ids, 1).await
    }

    pub async fn customer_updated(
        &self,
        before: &BTreeSet<Uuid>,
        after: &BTreeSet<Uuid>,
    ) -> DeltaOutcome {
        let change = MembershipChange::between(before, after);
        let mut outcome = self.apply_membership_delta(&change.added, 1).await;
        outcome.merge(self.apply_membership_delta(&change.removed, -1).await);
        outcome
    }

    pub async fn customer_deleted(&self, customer: &Customer) -> DeltaOutcome {
        let ids: Vec<Uuid> = customer.segments.iter().copied().collect();
        self.apply_membership_delta(&ids, -1).await
    }

    // ─── Segment deletion ──────────────────────────────────────────────────

    /// Remove a deleted segment from every customer's membership set. Other
    /// segments' sizes are untouched.
    pub async fn segment_deleted(&self, segment_id: Uuid) -> AudienceResult<u64> {
        let touched = self.customers.remove_segment_from_all(segment_id).await?;
        info!(segment_id = %segment_id, customers = touched, "Segment removed from customer memberships");
        Ok(touched)
    }
}
