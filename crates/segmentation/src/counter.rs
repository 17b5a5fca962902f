//! Audience counter: runs compiled predicates against the live customer store.

use std::sync::Arc;

use audience_core::error::AudienceResult;
use audience_core::types::RuleDescriptor;
use tracing::{debug, error};

use crate::compiler::compile;
use crate::predicates::Predicate;
use crate::store::CustomerStore;

#[derive(Clone)]
pub struct AudienceCounter {
    customers: Arc<dyn CustomerStore>,
}

impl AudienceCounter {
    pub fn new(customers: Arc<dyn CustomerStore>) -> Self {
        Self { customers }
    }

    /// Count customers matching `predicate`. No caching: every call scans the
    /// store as it is right now.
    pub async fn count(&self, predicate: &Predicate) -> AudienceResult<u64> {
        if predicate.is_nothing() {
            return Ok(0);
        }
        debug!(filter = %predicate.to_filter(), "Counting audience");
        self.customers.count_matching(predicate).await
    }

    pub async fn count_rules(&self, rules: &[RuleDescriptor]) -> AudienceResult<u64> {
        self.count(&compile(rules)).await
    }

    /// Live audience size for an unsaved rule list. Store failures are
    /// reported as zero.
    pub async fn preview(&self, rules: &[RuleDescriptor]) -> u64 {
        match self.count_rules(rules).await {
            Ok(size) => size,
            Err(e) => {
                error!(error = %e, rules = rules.len(), "Audience preview failed, reporting zero");
                metrics::counter!("segmentation.preview.errors").increment(1);
                0
            }
        }
    }
}
