//! Gateway handlers

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use std::sync::Arc;
use tracing::warn;

use super::state::AppState;
use super::types::{ApiResponse, CallbackResponseData, HealthResponse, error_codes};
use crate::custody::{CallbackError, CallbackOutcome};
use crate::order::now_millis;

pub const HEADER_TIMESTAMP: &str = "Biz-Timestamp";
pub const HEADER_SIGNATURE: &str = "Biz-Resp-Signature";

type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), (StatusCode, Json<ApiResponse<()>>)>;

fn api_code(error: &CallbackError) -> i32 {
    match error {
        CallbackError::MissingHeader(_) => error_codes::MISSING_AUTH,
        CallbackError::InvalidSignature | CallbackError::StaleTimestamp(_) => {
            error_codes::AUTH_FAILED
        }
        CallbackError::InvalidPayload(_) => error_codes::INVALID_PARAMETER,
        CallbackError::Mismatch(_) => error_codes::CUSTODY_MISMATCH,
        CallbackError::UnknownDepositAddress { .. } => error_codes::UNKNOWN_DEPOSIT_ADDRESS,
        CallbackError::Custody(_) => error_codes::SERVICE_UNAVAILABLE,
        CallbackError::Store(_) => error_codes::INTERNAL_ERROR,
    }
}

fn error_response(error: CallbackError) -> (StatusCode, Json<ApiResponse<()>>) {
    let status =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ApiResponse::<()>::error(api_code(&error), error.to_string())),
    )
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, CallbackError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or(CallbackError::MissingHeader(name))
}

/// Custody webhook
///
/// POST /v1/custody/callback
pub async fn custody_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<CallbackResponseData> {
    let timestamp = header(&headers, HEADER_TIMESTAMP).map_err(error_response)?;
    let signature = header(&headers, HEADER_SIGNATURE).map_err(error_response)?;

    let outcome = state
        .callback
        .handle(&body, timestamp, signature)
        .await
        .map_err(|e| {
            warn!(code = e.code(), error = %e, "Custody callback rejected");
            error_response(e)
        })?;

    let data = match outcome {
        CallbackOutcome::Created(id) => CallbackResponseData {
            outcome: "created",
            order_id: Some(id.to_string()),
            detail: None,
        },
        CallbackOutcome::Duplicate(id) => CallbackResponseData {
            outcome: "duplicate",
            order_id: Some(id.to_string()),
            detail: None,
        },
        CallbackOutcome::Pending { updates } => CallbackResponseData {
            outcome: "pending",
            order_id: None,
            detail: Some(format!("update {}", updates)),
        },
        CallbackOutcome::Ignored(reason) => CallbackResponseData {
            outcome: "ignored",
            order_id: None,
            detail: Some(reason),
        },
    };
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

/// GET /v1/health
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    (
        StatusCode::OK,
        Json(ApiResponse::success(HealthResponse {
            timestamp_ms: now_millis(),
            active_actors: state.actors.len(),
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_missing_signature_header() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_TIMESTAMP, HeaderValue::from_static("1700000000000"));

        assert_eq!(header(&headers, HEADER_TIMESTAMP).unwrap(), "1700000000000");
        let err = header(&headers, HEADER_SIGNATURE).unwrap_err();
        let (status, Json(body)) = error_response(err);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code, error_codes::MISSING_AUTH);
        assert!(body.msg.contains(HEADER_SIGNATURE));
    }

    #[test]
    fn test_error_status_mapping() {
        let (status, Json(body)) = error_response(CallbackError::InvalidSignature);
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body.code, error_codes::AUTH_FAILED);

        let (status, Json(body)) = error_response(CallbackError::Mismatch("amount".into()));
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.code, error_codes::CUSTODY_MISMATCH);
    }

    #[test]
    fn test_envelope_shape() {
        let ok = serde_json::to_value(ApiResponse::success(CallbackResponseData {
            outcome: "pending",
            order_id: None,
            detail: Some("update 1".to_string()),
        }))
        .unwrap();
        assert_eq!(ok["code"], 0);
        assert_eq!(ok["data"]["outcome"], "pending");
        assert!(ok["data"].get("order_id").is_none());

        let err = serde_json::to_value(ApiResponse::<()>::error(5000, "boom")).unwrap();
        assert!(err.get("data").is_none());
    }
}
