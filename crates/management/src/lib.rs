//! Segment and customer management backend.
//!
//! REST endpoints for defining segments, previewing audiences and
//! maintaining the customer records those audiences are counted over.
//! Storage is pluggable through the segmentation store ports.

pub mod handlers;
pub mod models;
pub mod router;
pub mod service;

pub use handlers::ManagementState;
pub use router::management_router;
pub use service::{CustomerService, SegmentService};
