//! Request and response bodies for the segment and customer API.

use std::collections::{BTreeSet, HashMap};

use audience_core::types::{Customer, CustomerStatus, RuleDescriptor};
use audience_segmentation::DeltaOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Segments ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSegmentRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rules: Vec<RuleDescriptor>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSegmentRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Present rules trigger a full audience recompute.
    #[serde(default)]
    pub rules: Option<Vec<RuleDescriptor>>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreviewRequest {
    #[serde(default)]
    pub rules: Vec<RuleDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResponse {
    pub audience_size: u64,
}

// ─── Customers ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCustomerRequest {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub total_spend: f64,
    #[serde(default)]
    pub visit_count: u64,
    #[serde(default)]
    pub last_visit: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_order_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub preferred_category: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub status: CustomerStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub segments: BTreeSet<Uuid>,
    /// Ingested records may carry their original creation time.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCustomerRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub total_spend: Option<f64>,
    #[serde(default)]
    pub visit_count: Option<u64>,
    #[serde(default)]
    pub last_visit: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_order_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub preferred_category: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub status: Option<CustomerStatus>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub attributes: Option<HashMap<String, serde_json::Value>>,
    /// When present, replaces the membership set and drives the delta path.
    #[serde(default)]
    pub segments: Option<BTreeSet<Uuid>>,
}

/// A customer write plus the membership deltas it caused.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerMutationResponse {
    pub customer: Customer,
    pub membership: DeltaOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRejection {
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkImportResponse {
    pub imported: usize,
    pub rejected: Vec<BulkRejection>,
    pub membership: DeltaOutcome,
}

// ─── Errors ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
