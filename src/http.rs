//! Inbound HTTP surface.
//!
//! Three endpoints over the lifecycle engine. Accepted submissions get
//! 202; validation, idempotency, and domain conflicts map to 4xx with
//! the error spelled out in the body.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use coruscant_core::{LendingError, LifecycleEngine};
use coruscant_store::Loan;

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<LifecycleEngine>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/loan-applications", post(submit_application))
        .route("/collateral-top-ups", post(submit_top_up))
        .route("/loans", get(list_loans))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmissionBody {
    request_id: String,
    loan_id: String,
    borrower_id: String,
    amount: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptBody {
    request_id: String,
    timestamp: DateTime<Utc>,
    accepted: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duplicate: Option<bool>,
    /// Outcome of the first submission under this request id
    #[serde(skip_serializing_if = "Option::is_none")]
    original_accepted: Option<bool>,
}

async fn submit_application(
    State(state): State<AppState>,
    Json(body): Json<SubmissionBody>,
) -> Response {
    let result = state
        .lifecycle
        .submit_application(
            &body.request_id,
            &body.loan_id,
            &body.borrower_id,
            &body.amount,
        )
        .await;
    into_response(result)
}

async fn submit_top_up(
    State(state): State<AppState>,
    Json(body): Json<SubmissionBody>,
) -> Response {
    let result = state
        .lifecycle
        .submit_top_up(
            &body.request_id,
            &body.loan_id,
            &body.borrower_id,
            &body.amount,
        )
        .await;
    into_response(result)
}

async fn list_loans(State(state): State<AppState>) -> Json<Vec<Loan>> {
    Json(state.lifecycle.list_loans())
}

fn into_response(result: Result<coruscant_core::SubmissionReceipt, LendingError>) -> Response {
    match result {
        Ok(receipt) => (
            StatusCode::ACCEPTED,
            Json(ReceiptBody {
                request_id: receipt.request_id,
                timestamp: receipt.timestamp,
                accepted: receipt.accepted,
            }),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

fn error_response(error: LendingError) -> Response {
    let status = match &error {
        LendingError::Validation(_)
        | LendingError::BorrowerMismatch(_)
        | LendingError::Terminal { .. } => StatusCode::BAD_REQUEST,
        LendingError::DuplicateRequest { .. }
        | LendingError::Conflict(_)
        | LendingError::StateConflict(_) => StatusCode::CONFLICT,
        LendingError::NotFound(_) => StatusCode::NOT_FOUND,
        LendingError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let body = match &error {
        LendingError::DuplicateRequest { original } => ErrorBody {
            error: error.to_string(),
            request_id: Some(original.request_id.clone()),
            duplicate: Some(true),
            original_accepted: Some(original.outcome.is_accepted()),
        },
        _ => ErrorBody {
            error: error.to_string(),
            request_id: None,
            duplicate: None,
            original_accepted: None,
        },
    };

    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use coruscant_store::{ProcessedRequest, RequestOutcome};

    #[test]
    fn test_submission_body_wire_shape() {
        let body: SubmissionBody = serde_json::from_str(
            r#"{"requestId":"r-1","loanId":"L1","borrowerId":"B1","amount":"1000"}"#,
        )
        .unwrap();
        assert_eq!(body.request_id, "r-1");
        assert_eq!(body.loan_id, "L1");
        assert_eq!(body.borrower_id, "B1");
        assert_eq!(body.amount, "1000");
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (
                LendingError::Validation("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                LendingError::NotFound("L1".into()),
                StatusCode::NOT_FOUND,
            ),
            (
                LendingError::BorrowerMismatch("L1".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                LendingError::Conflict("L1".into()),
                StatusCode::CONFLICT,
            ),
            (
                LendingError::DuplicateRequest {
                    original: ProcessedRequest {
                        request_id: "r-1".into(),
                        outcome: RequestOutcome::Accepted,
                        at: Utc::now(),
                    },
                },
                StatusCode::CONFLICT,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error_response(error).status(), expected);
        }
    }

    #[test]
    fn test_duplicate_body_carries_original_outcome() {
        let body = ErrorBody {
            error: "request r-1 already processed".into(),
            request_id: Some("r-1".into()),
            duplicate: Some(true),
            original_accepted: Some(true),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["requestId"], "r-1");
        assert_eq!(json["duplicate"], true);
        assert_eq!(json["originalAccepted"], true);
    }
}
