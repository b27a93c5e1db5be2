use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::models::{DropReason, InboundEvent, InboundOutcome, OutboundReply};
use crate::services::Pipeline;
use crate::utils::error::ApiError;

#[derive(Debug, Serialize)]
pub struct InboundResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<OutboundReply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<DropReason>,
    /// `false` asks the transport to redeliver the event.
    acknowledge: bool,
}

impl From<InboundOutcome> for InboundResponse {
    fn from(outcome: InboundOutcome) -> Self {
        let acknowledge = outcome.should_acknowledge();
        match outcome {
            InboundOutcome::Replied(reply) => Self {
                status: "replied",
                reply: Some(reply),
                reason: None,
                acknowledge,
            },
            InboundOutcome::Degraded(reply) => Self {
                status: "degraded",
                reply: Some(reply),
                reason: None,
                acknowledge,
            },
            InboundOutcome::Dropped(reason) => Self {
                status: "dropped",
                reply: None,
                reason: Some(reason),
                acknowledge,
            },
        }
    }
}

/// Normalized inbound event from a channel adapter.
///
/// Degraded outcomes answer 503 so transports that redeliver on non-2xx do so.
pub async fn inbound_handler(
    State(pipeline): State<Arc<Pipeline>>,
    payload: Result<Json<InboundEvent>, JsonRejection>,
) -> Result<(StatusCode, Json<InboundResponse>), ApiError> {
    let Json(event) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let outcome = pipeline.handle_inbound(event).await;
    let status = if outcome.should_acknowledge() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    Ok((status, Json(InboundResponse::from(outcome))))
}
