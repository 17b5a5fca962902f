//! Axum REST handlers for segments and customers.

use crate::models::*;
use crate::service::{CustomerService, SegmentService};
use audience_core::error::AudienceError;
use audience_core::types::{Customer, Segment, SegmentSummary};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use tracing::error;
use uuid::Uuid;

/// Header carrying the acting user; segments record it as their creator.
pub const USER_HEADER: &str = "x-user-id";
const DEFAULT_USER: &str = "admin";

/// Shared management state.
#[derive(Clone)]
pub struct ManagementState {
    pub segments: SegmentService,
    pub customers: CustomerService,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ErrorResponse>)>;

fn error_response(err: AudienceError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, code) = match &err {
        AudienceError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_failed"),
        AudienceError::DuplicateName(_) => (StatusCode::CONFLICT, "duplicate_name"),
        AudienceError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        _ => {
            error!(error = %err, "Management request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
            message: err.to_string(),
        }),
    )
}

fn acting_user(headers: &HeaderMap) -> String {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_USER)
        .to_string()
}

// ─── Segments ──────────────────────────────────────────────────────────────

pub async fn preview_segment(
    State(state): State<ManagementState>,
    Json(req): Json<PreviewRequest>,
) -> Json<PreviewResponse> {
    let audience_size = state.segments.preview(&req.rules).await;
    metrics::counter!("management.segments.previewed").increment(1);
    Json(PreviewResponse { audience_size })
}

pub async fn list_segments(State(state): State<ManagementState>) -> ApiResult<Json<Vec<Segment>>> {
    state.segments.list().await.map(Json).map_err(error_response)
}

pub async fn get_segment(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Segment>> {
    state.segments.get(id).await.map(Json).map_err(error_response)
}

pub async fn segment_summary(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SegmentSummary>> {
    state.segments.summary(id).await.map(Json).map_err(error_response)
}

pub async fn create_segment(
    State(state): State<ManagementState>,
    headers: HeaderMap,
    Json(req): Json<CreateSegmentRequest>,
) -> ApiResult<(StatusCode, Json<Segment>)> {
    let segment = state
        .segments
        .create(req, &acting_user(&headers))
        .await
        .map_err(error_response)?;
    metrics::counter!("management.segments.created").increment(1);
    Ok((StatusCode::CREATED, Json(segment)))
}

pub async fn update_segment(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateSegmentRequest>,
) -> ApiResult<Json<Segment>> {
    let segment = state.segments.update(id, req).await.map_err(error_response)?;
    metrics::counter!("management.segments.updated").increment(1);
    Ok(Json(segment))
}

pub async fn delete_segment(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.segments.delete(id).await.map_err(error_response)?;
    metrics::counter!("management.segments.deleted").increment(1);
    Ok(StatusCode::NO_CONTENT)
}

// ─── Customers ─────────────────────────────────────────────────────────────

pub async fn list_customers(
    State(state): State<ManagementState>,
) -> ApiResult<Json<Vec<Customer>>> {
    state.customers.list().await.map(Json).map_err(error_response)
}

pub async fn get_customer(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Customer>> {
    state.customers.get(id).await.map(Json).map_err(error_response)
}

pub async fn create_customer(
    State(state): State<ManagementState>,
    Json(req): Json<CreateCustomerRequest>,
) -> ApiResult<(StatusCode, Json<CustomerMutationResponse>)> {
    let created = state.customers.create(req).await.map_err(error_response)?;
    metrics::counter!("management.customers.created").increment(1);
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn bulk_import_customers(
    State(state): State<ManagementState>,
    Json(reqs): Json<Vec<CreateCustomerRequest>>,
) -> ApiResult<Json<BulkImportResponse>> {
    let response = state
        .customers
        .bulk_import(reqs)
        .await
        .map_err(error_response)?;
    metrics::counter!("management.customers.created").increment(response.imported as u64);
    Ok(Json(response))
}

pub async fn update_customer(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateCustomerRequest>,
) -> ApiResult<Json<CustomerMutationResponse>> {
    let updated = state
        .customers
        .update(id, req)
        .await
        .map_err(error_response)?;
    metrics::counter!("management.customers.updated").increment(1);
    Ok(Json(updated))
}

pub async fn delete_customer(
    State(state): State<ManagementState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.customers.delete(id).await.map_err(error_response)?;
    metrics::counter!("management.customers.deleted").increment(1);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (AudienceError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (AudienceError::DuplicateName("x".into()), StatusCode::CONFLICT),
            (AudienceError::not_found("segment", "1"), StatusCode::NOT_FOUND),
            (AudienceError::Store("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(error_response(err).0, expected);
        }
    }

    #[test]
    fn test_acting_user_defaults_to_admin() {
        let mut headers = HeaderMap::new();
        assert_eq!(acting_user(&headers), "admin");
        headers.insert(USER_HEADER, HeaderValue::from_static("  "));
        assert_eq!(acting_user(&headers), "admin");
        headers.insert(USER_HEADER, HeaderValue::from_static("marketer-7"));
        assert_eq!(acting_user(&headers), "marketer-7");
    }
}
