use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::HeaderMap;
use meetly_contracts::FeedbackRecord;
use meetly_store::NewFeedback;
use serde::Deserialize;

use super::{
    ApiError, AppState, StatusMessage, authenticate, extract_request_id, invalid_params,
    storage_unavailable, traced,
};

#[derive(Debug, Deserialize)]
pub(super) struct FeedbackBody {
    #[serde(default)]
    user_email: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub(super) async fn submit_feedback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<FeedbackBody>, JsonRejection>,
) -> Result<Json<StatusMessage>, ApiError> {
    let span = tracing::info_span!(
        "feedback.submit",
        request_id = %extract_request_id(&headers),
        subject_id = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    traced(span, "/api/v1/feedback", "POST", async move {
        let identity = authenticate(&state, &headers).await?;
        let Json(body) = body.map_err(|_| invalid_params("invalid JSON body"))?;

        let message = body.message.as_deref().map(str::trim).unwrap_or_default();
        if message.is_empty() {
            return Err(invalid_params("Feedback message is empty."));
        }

        let contact = body
            .user_email
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .or(identity.contact.as_deref())
            .unwrap_or_default();

        state
            .store
            .insert_feedback(NewFeedback {
                owner_id: &identity.subject_id,
                contact,
                message,
            })
            .await
            .map_err(|err| storage_unavailable(&err))?;

        Ok::<_, ApiError>(StatusMessage::success("Feedback received successfully."))
    })
    .await
}

pub(super) async fn list_feedback(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<FeedbackRecord>>, ApiError> {
    let span = tracing::info_span!(
        "feedback.list",
        request_id = %extract_request_id(&headers),
        subject_id = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    traced(span, "/api/v1/feedbacks", "GET", async move {
        let identity = authenticate(&state, &headers).await?;
        let feedback = state
            .store
            .list_feedback(&identity.subject_id)
            .await
            .map_err(|err| storage_unavailable(&err))?;

        Ok::<_, ApiError>(Json(feedback))
    })
    .await
}
