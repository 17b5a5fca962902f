//! Store ports used by the counter and synchronizer. Implementations live in
//! the `audience-store` crate.

use async_trait::async_trait;
use audience_core::error::AudienceResult;
use audience_core::types::{Customer, Segment};
use uuid::Uuid;

use crate::predicates::Predicate;

/// Persistent, predicate-queryable customer collection.
#[async_trait]
pub trait CustomerStore: Send + Sync {
    async fn insert_customer(&self, customer: Customer) -> AudienceResult<()>;

    async fn get_customer(&self, id: Uuid) -> AudienceResult<Option<Customer>>;

    /// Replace an existing customer. Fails with `NotFound` if absent.
    async fn update_customer(&self, customer: Customer) -> AudienceResult<()>;

    /// Remove a customer, returning the removed record.
    async fn delete_customer(&self, id: Uuid) -> AudienceResult<Option<Customer>>;

    async fn list_customers(&self) -> AudienceResult<Vec<Customer>>;

    /// Count customers matching `predicate` over the live store.
    async fn count_matching(&self, predicate: &Predicate) -> AudienceResult<u64>;

    /// Strip `segment_id` from every customer's membership set. Returns the
    /// number of customers touched.
    async fn remove_segment_from_all(&self, segment_id: Uuid) -> AudienceResult<u64>;
}

/// Segment collection with an atomic audience counter.
#[async_trait]
pub trait SegmentStore: Send + Sync {
    /// Insert a new segment. Fails with `DuplicateName` if the name is taken.
    async fn insert_segment(&self, segment: Segment) -> AudienceResult<()>;

    async fn get_segment(&self, id: Uuid) -> AudienceResult<Option<Segment>>;

    async fn find_segment_by_name(&self, name: &str) -> AudienceResult<Option<Segment>>;

    /// Replace a segment's definition. The stored audience size is kept;
    /// only `set_audience_size` and `increment_audience_size` write it.
    async fn update_segment(&self, segment: Segment) -> AudienceResult<()>;

    async fn delete_segment(&self, id: Uuid) -> AudienceResult<Option<Segment>>;

    async fn list_segments(&self) -> AudienceResult<Vec<Segment>>;

    async fn set_audience_size(&self, id: Uuid, size: i64) -> AudienceResult<()>;

    /// Atomically add `delta` to the audience size and return the new value.
    /// Fails with `NotFound` for an unknown segment.
    async fn increment_audience_size(&self, id: Uuid, delta: i64) -> AudienceResult<i64>;

    /// Connectivity check for readiness probes.
    async fn ping(&self) -> AudienceResult<()> {
        Ok(())
    }
}
