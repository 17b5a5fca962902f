//! Segment and customer services: validation, persistence and the audience
//! bookkeeping each write triggers.

use std::sync::Arc;

use audience_core::error::{AudienceError, AudienceResult};
use audience_core::types::{Customer, RuleDescriptor, Segment, SegmentSummary};
use audience_segmentation::{CustomerStore, DeltaOutcome, MembershipSynchronizer, SegmentStore};
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::*;

fn validate_name(entity: &str, name: &str) -> AudienceResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AudienceError::Validation(format!("{entity} name is required")));
    }
    Ok(trimmed.to_string())
}

// ─── Segments ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SegmentService {
    segments: Arc<dyn SegmentStore>,
    sync: MembershipSynchronizer,
}

impl SegmentService {
    pub fn new(customers: Arc<dyn CustomerStore>, segments: Arc<dyn SegmentStore>) -> Self {
        let sync = MembershipSynchronizer::new(customers, segments.clone());
        Self { segments, sync }
    }

    /// Live count for an unsaved rule list. Never fails.
    pub async fn preview(&self, rules: &[RuleDescriptor]) -> u64 {
        self.sync.counter().preview(rules).await
    }

    pub async fn list(&self) -> AudienceResult<Vec<Segment>> {
        self.segments.list_segments().await
    }

    pub async fn get(&self, id: Uuid) -> AudienceResult<Segment> {
        self.segments
            .get_segment(id)
            .await?
            .ok_or_else(|| AudienceError::not_found("segment", id))
    }

    pub async fn summary(&self, id: Uuid) -> AudienceResult<SegmentSummary> {
        self.get(id).await.map(|s| SegmentSummary::from(&s))
    }

    /// Persist a new segment, then size it from its rules.
    pub async fn create(
        &self,
        req: CreateSegmentRequest,
        created_by: &str,
    ) -> AudienceResult<Segment> {
        let name = validate_name("segment", &req.name)?;
        if self.segments.find_segment_by_name(&name).await?.is_some() {
            return Err(AudienceError::DuplicateName(name));
        }

        let now = Utc::now();
        let segment = Segment {
            id: Uuid::new_v4(),
            name,
            description: req.description,
            rules: req.rules,
            audience_size: 0,
            is_active: req.is_active,
            created_at: now,
            updated_at: now,
            created_by: created_by.to_string(),
        };
        self.segments.insert_segment(segment.clone()).await?;
        info!(segment_id = %segment.id, name = %segment.name, rules = segment.rules.len(), "Segment created");

        self.sync
            .recompute_from_rules(segment.id, &segment.rules)
            .await?;
        self.get(segment.id).await
    }

    /// Partial update. Supplying rules re-runs the full recompute; other
    /// edits leave the audience size alone.
    pub async fn update(&self, id: Uuid, req: UpdateSegmentRequest) -> AudienceResult<Segment> {
        let mut segment = self.get(id).await?;

        if let Some(name) = req.name {
            let name = validate_name("segment", &name)?;
            if name != segment.name {
                if let Some(other) = self.segments.find_segment_by_name(&name).await? {
                    if other.id != id {
                        return Err(AudienceError::DuplicateName(name));
                    }
                }
                segment.name = name;
            }
        }
        if let Some(description) = req.description {
            segment.description = Some(description);
        }
        if let Some(is_active) = req.is_active {
            segment.is_active = is_active;
        }
        let rules_changed = match req.rules {
            Some(rules) => {
                segment.rules = rules;
                true
            }
            None => false,
        };
        segment.updated_at = Utc::now();

        self.segments.update_segment(segment.clone()).await?;
        if rules_changed {
            self.sync.recompute_from_rules(id, &segment.rules).await?;
        }
        self.get(id).await
    }

    /// Delete the segment and strip it from every customer's memberships.
    /// Returns the number of customers that held it.
    pub async fn delete(&self, id: Uuid) -> AudienceResult<u64> {
        let removed = self
            .segments
            .delete_segment(id)
            .await?
            .ok_or_else(|| AudienceError::not_found("segment", id))?;
        let touched = self.sync.segment_deleted(id).await?;
        info!(segment_id = %id, name = %removed.name, customers = touched, "Segment deleted");
        Ok(touched)
    }
}

// ─── Customers ─────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct CustomerService {
    customers: Arc<dyn CustomerStore>,
    sync: MembershipSynchronizer,
}

impl CustomerService {
    pub fn new(customers: Arc<dyn CustomerStore>, segments: Arc<dyn SegmentStore>) -> Self {
        let sync = MembershipSynchronizer::new(customers.clone(), segments);
        Self { customers, sync }
    }

    pub async fn list(&self) -> AudienceResult<Vec<Customer>> {
        self.customers.list_customers().await
    }

    pub async fn get(&self, id: Uuid) -> AudienceResult<Customer> {
        self.customers
            .get_customer(id)
            .await?
            .ok_or_else(|| AudienceError::not_found("customer", id))
    }

    /// Store the customer, then add one to each assigned segment.
    pub async fn create(&self, req: CreateCustomerRequest) -> AudienceResult<CustomerMutationResponse> {
        let customer = build_customer(req)?;
        self.customers.insert_customer(customer.clone()).await?;
        let membership = self.sync.customer_created(&customer).await;
        if !membership.is_complete() {
            warn!(customer_id = %customer.id, failed = membership.failed.len(), "Customer created with incomplete segment counts");
        }
        Ok(CustomerMutationResponse {
            customer,
            membership,
        })
    }

    /// Create many customers. Invalid records are reported and skipped;
    /// a store failure aborts the remainder.
    pub async fn bulk_import(
        &self,
        reqs: Vec<CreateCustomerRequest>,
    ) -> AudienceResult<BulkImportResponse> {
        let mut response = BulkImportResponse::default();
        for (index, req) in reqs.into_iter().enumerate() {
            match self.create(req).await {
                Ok(created) => {
                    response.imported += 1;
                    response.membership.merge(created.membership);
                }
                Err(AudienceError::Validation(message)) => {
                    response.rejected.push(BulkRejection { index, message });
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            imported = response.imported,
            rejected = response.rejected.len(),
            "Bulk customer import finished"
        );
        Ok(response)
    }

    /// Partial update. A supplied membership set is diffed against the
    /// stored one and only the difference moves segment counters.
    pub async fn update(
        &self,
        id: Uuid,
        req: UpdateCustomerRequest,
    ) -> AudienceResult<CustomerMutationResponse> {
        let mut customer = self.get(id).await?;
        let before = customer.segments.clone();

        if let Some(name) = req.name {
            customer.name = validate_name("customer", &name)?;
        }
        if req.email.is_some() {
            customer.email = req.email;
        }
        if req.phone.is_some() {
            customer.phone = req.phone;
        }
        if let Some(total_spend) = req.total_spend {
            customer.total_spend = total_spend;
        }
        if let Some(visit_count) = req.visit_count {
            customer.visit_count = visit_count;
        }
        if req.last_visit.is_some() {
            customer.last_visit = req.last_visit;
        }
        if req.last_order_date.is_some() {
            customer.last_order_date = req.last_order_date;
        }
        if req.preferred_category.is_some() {
            customer.preferred_category = req.preferred_category;
        }
        if req.location.is_some() {
            customer.location = req.location;
        }
        if let Some(status) = req.status {
            customer.status = status;
        }
        if let Some(tags) = req.tags {
            customer.tags = tags;
        }
        if let Some(attributes) = req.attributes {
            customer.attributes = attributes;
        }
        if let Some(segments) = req.segments {
            customer.segments = segments;
        }
        customer.updated_at = Utc::now();

        self.customers.update_customer(customer.clone()).await?;
        let membership = if before != customer.segments {
            self.sync.customer_updated(&before, &customer.segments).await
        } else {
            DeltaOutcome::default()
        };
        Ok(CustomerMutationResponse {
            customer,
            membership,
        })
    }

    /// Remove the customer and subtract one from each segment it held.
    pub async fn delete(&self, id: Uuid) -> AudienceResult<DeltaOutcome> {
        let removed = self
            .customers
            .delete_customer(id)
            .await?
            .ok_or_else(|| AudienceError::not_found("customer", id))?;
        Ok(self.sync.customer_deleted(&removed).await)
    }
}

fn build_customer(req: CreateCustomerRequest) -> AudienceResult<Customer> {
    let name = validate_name("customer", &req.name)?;
    let mut customer = Customer::new(name);
    customer.email = req.email;
    customer.phone = req.phone;
    customer.total_spend = req.total_spend;
    customer.visit_count = req.visit_count;
    customer.last_visit = req.last_visit;
    customer.last_order_date = req.last_order_date;
    customer.preferred_category = req.preferred_category;
    customer.location = req.location;
    customer.status = req.status;
    customer.tags = req.tags;
    customer.attributes = req.attributes;
    customer.segments = req.segments;
    if let Some(created_at) = req.created_at {
        customer.created_at = created_at;
    }
    Ok(customer)
}
