//! In-process customer and segment store backed by DashMap.
//!
//! Single-node deployments and tests use this directly; multi-node
//! deployments use `RedisStore`. Audience increments run under the
//! segment's shard lock, so concurrent deltas never lose updates.

use async_trait::async_trait;
use audience_core::error::{AudienceError, AudienceResult};
use audience_core::types::{Customer, Segment};
use audience_segmentation::{CustomerStore, Predicate, SegmentStore};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

pub struct MemoryStore {
    customers: DashMap<Uuid, Customer>,
    segments: DashMap<Uuid, Segment>,
    /// Segment name -> id, the uniqueness index.
    names: DashMap<String, Uuid>,
}

impl MemoryStore {
    pub fn new() -> Self {
        info!("Memory store initialized (in-process, single node)");
        Self {
            customers: DashMap::new(),
            segments: DashMap::new(),
            names: DashMap::new(),
        }
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CustomerStore for MemoryStore {
    async fn insert_customer(&self, customer: Customer) -> AudienceResult<()> {
        self.customers.insert(customer.id, customer);
        Ok(())
    }

    async fn get_customer(&self, id: Uuid) -> AudienceResult<Option<Customer>> {
        Ok(self.customers.get(&id).map(|r| r.value().clone()))
    }

    async fn update_customer(&self, customer: Customer) -> AudienceResult<()> {
        let mut entry = self
            .customers
            .get_mut(&customer.id)
            .ok_or_else(|| AudienceError::not_found("customer", customer.id))?;
        *entry = customer;
        Ok(())
    }

    async fn delete_customer(&self, id: Uuid) -> AudienceResult<Option<Customer>> {
        Ok(self.customers.remove(&id).map(|(_, c)| c))
    }

    async fn list_customers(&self) -> AudienceResult<Vec<Customer>> {
        let mut customers: Vec<Customer> =
            self.customers.iter().map(|r| r.value().clone()).collect();
        customers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(customers)
    }

    async fn count_matching(&self, predicate: &Predicate) -> AudienceResult<u64> {
        let count = self
            .customers
            .iter()
            .filter(|r| predicate.matches(r.value()))
            .count();
        Ok(count as u64)
    }

    async fn remove_segment_from_all(&self, segment_id: Uuid) -> AudienceResult<u64> {
        let now = Utc::now();
        let mut touched = 0;
        for mut entry in self.customers.iter_mut() {
            if entry.segments.remove(&segment_id) {
                entry.updated_at = now;
                touched += 1;
            }
        }
        Ok(touched)
    }
}

#[async_trait]
impl SegmentStore for MemoryStore {
    async fn insert_segment(&self, segment: Segment) -> AudienceResult<()> {
        match self.names.entry(segment.name.clone()) {
            Entry::Occupied(_) => return Err(AudienceError::DuplicateName(segment.name)),
            Entry::Vacant(slot) => {
                slot.insert(segment.id);
            }
        }
        self.segments.insert(segment.id, segment);
        Ok(())
    }

    async fn get_segment(&self, id: Uuid) -> AudienceResult<Option<Segment>> {
        Ok(self.segments.get(&id).map(|r| r.value().clone()))
    }

    async fn find_segment_by_name(&self, name: &str) -> AudienceResult<Option<Segment>> {
        let Some(id) = self.names.get(name).map(|r| *r.value()) else {
            return Ok(None);
        };
        Ok(self.segments.get(&id).map(|r| r.value().clone()))
    }

    async fn update_segment(&self, segment: Segment) -> AudienceResult<()> {
        let old_name = self
            .segments
            .get(&segment.id)
            .map(|r| r.value().name.clone())
            .ok_or_else(|| AudienceError::not_found("segment", segment.id))?;

        if old_name != segment.name {
            match self.names.entry(segment.name.clone()) {
                Entry::Occupied(slot) if *slot.get() != segment.id => {
                    return Err(AudienceError::DuplicateName(segment.name));
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(slot) => {
                    slot.insert(segment.id);
                }
            }
            self.names.remove(&old_name);
        }

        let mut entry = self
            .segments
            .get_mut(&segment.id)
            .ok_or_else(|| AudienceError::not_found("segment", segment.id))?;
        let audience_size = entry.audience_size;
        *entry = Segment {
            audience_size,
            ..segment
        };
        Ok(())
    }

    async fn delete_segment(&self, id: Uuid) -> AudienceResult<Option<Segment>> {
        let removed = self.segments.remove(&id).map(|(_, s)| s);
        if let Some(segment) = &removed {
            self.names.remove(&segment.name);
        }
        Ok(removed)
    }

    async fn list_segments(&self) -> AudienceResult<Vec<Segment>> {
        let mut segments: Vec<Segment> = self.segments.iter().map(|r| r.value().clone()).collect();
        segments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(segments)
    }

    async fn set_audience_size(&self, id: Uuid, size: i64) -> AudienceResult<()> {
        let mut entry = self
            .segments
            .get_mut(&id)
            .ok_or_else(|| AudienceError::not_found("segment", id))?;
        entry.audience_size = size;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn increment_audience_size(&self, id: Uuid, delta: i64) -> AudienceResult<i64> {
        let mut entry = self
            .segments
            .get_mut(&id)
            .ok_or_else(|| AudienceError::not_found("segment", id))?;
        entry.audience_size += delta;
        Ok(entry.audience_size)
    }
}
