//! Management API router. Mounts segment and customer endpoints under /api/v1.

use std::sync::Arc;

use crate::handlers::{self, ManagementState};
use crate::service::{CustomerService, SegmentService};
use audience_segmentation::{CustomerStore, SegmentStore};
use axum::routing::{get, post};
use axum::Router;

impl ManagementState {
    pub fn new(customers: Arc<dyn CustomerStore>, segments: Arc<dyn SegmentStore>) -> Self {
        Self {
            segments: SegmentService::new(customers.clone(), segments.clone()),
            customers: CustomerService::new(customers, segments),
        }
    }
}

/// Build the management router over the given stores.
/// Returns a Router that should be merged into the main app.
pub fn management_router(state: ManagementState) -> Router {
    Router::new()
        // Segments
        .route("/api/v1/segments/preview", post(handlers::preview_segment))
        .route("/api/v1/segments", get(handlers::list_segments).post(handlers::create_segment))
        .route("/api/v1/segments/:id", get(handlers::get_segment).put(handlers::update_segment).delete(handlers::delete_segment))
        .route("/api/v1/segments/:id/summary", get(handlers::segment_summary))
        // Customers
        .route("/api/v1/customers", get(handlers::list_customers).post(handlers::create_customer))
        .route("/api/v1/customers/bulk", post(handlers::bulk_import_customers))
        .route("/api/v1/customers/:id", get(handlers::get_customer).put(handlers::update_customer).delete(handlers::delete_customer))
        .with_state(state)
}
