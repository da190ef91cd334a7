use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use meetly_contracts::{AnalysisFields, MeetingPreview, MeetingRecord, SharedMeeting};
use meetly_store::StoreError;
use serde::{Deserialize, Serialize};

use super::{
    ApiError, AppState, authenticate, extract_request_id, invalid_params, json_error,
    storage_unavailable, traced,
};
use crate::analyze::{AnalyzeError, AnalyzeRequest};

#[derive(Debug, Deserialize)]
pub(super) struct AnalyzeBody {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct AnalyzeResponse {
    #[serde(flatten)]
    fields: AnalysisFields,
    meeting_id: i64,
}

#[derive(Debug, Deserialize)]
pub(super) struct ListQuery {
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(super) struct ListResponse {
    meetings: Vec<MeetingPreview>,
}

#[derive(Debug, Serialize)]
pub(super) struct ShareResponse {
    share_url: String,
    share_token: String,
}

pub(super) async fn analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<AnalyzeBody>, JsonRejection>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let span = tracing::info_span!(
        "meeting.analyze",
        request_id = %extract_request_id(&headers),
        subject_id = tracing::field::Empty,
        meeting_id = tracing::field::Empty,
        extraction = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    traced(span, "/api/v1/analyze", "POST", async move {
        let identity = authenticate(&state, &headers).await?;
        let Json(body) = body.map_err(|_| invalid_params("invalid JSON body"))?;

        let result = state
            .analyzer
            .analyze(
                AnalyzeRequest {
                    transcript: &body.transcript,
                    title: body.title.as_deref(),
                    date: body.date.as_deref(),
                },
                &identity,
            )
            .await
            .map_err(|err| match err {
                AnalyzeError::InvalidInput(message) => invalid_params(message),
                AnalyzeError::UpstreamUnavailable(err) => {
                    tracing::error!(error = %err, "model provider call failed");
                    json_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "ERR_UPSTREAM_UNAVAILABLE",
                        "model provider unavailable",
                        true,
                    )
                }
                AnalyzeError::StorageUnavailable(err) => storage_unavailable(&err),
            })?;

        let span = tracing::Span::current();
        span.record("meeting_id", result.meeting_id);
        span.record("extraction", if result.parsed { "parsed" } else { "fallback" });

        Ok::<_, ApiError>(Json(AnalyzeResponse {
            fields: result.fields,
            meeting_id: result.meeting_id,
        }))
    })
    .await
}

pub(super) async fn list_meetings(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<ListResponse>, ApiError> {
    let span = tracing::info_span!(
        "meeting.list",
        request_id = %extract_request_id(&headers),
        subject_id = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    traced(span, "/api/v1/meetings", "GET", async move {
        let identity = authenticate(&state, &headers).await?;
        let Query(query) = query.map_err(|_| invalid_params("limit must be an integer"))?;
        let limit = state.config.clamp_meetings_limit(query.limit);

        let meetings = state
            .store
            .list_meetings(&identity.subject_id, limit)
            .await
            .map_err(|err| storage_unavailable(&err))?;

        Ok::<_, ApiError>(Json(ListResponse { meetings }))
    })
    .await
}

pub(super) async fn get_meeting(
    State(state): State<AppState>,
    headers: HeaderMap,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<MeetingRecord>, ApiError> {
    let span = tracing::info_span!(
        "meeting.get",
        request_id = %extract_request_id(&headers),
        subject_id = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    traced(span, "/api/v1/meetings/{id}", "GET", async move {
        let identity = authenticate(&state, &headers).await?;
        let Path(id) = id.map_err(|_| invalid_params("meeting id must be an integer"))?;

        state
            .store
            .get_meeting(id, &identity.subject_id)
            .await
            .map_err(|err| storage_unavailable(&err))?
            .map(Json)
            .ok_or_else(meeting_not_found)
    })
    .await
}

pub(super) async fn share_meeting(
    State(state): State<AppState>,
    headers: HeaderMap,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<ShareResponse>, ApiError> {
    let span = tracing::info_span!(
        "meeting.share",
        request_id = %extract_request_id(&headers),
        subject_id = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    traced(span, "/api/v1/share/{id}", "POST", async move {
        let identity = authenticate(&state, &headers).await?;
        let Path(id) = id.map_err(|_| invalid_params("meeting id must be an integer"))?;

        let share_token = state
            .store
            .issue_share_token(id, &identity.subject_id)
            .await
            .map_err(|err| match err {
                StoreError::NotFound => meeting_not_found(),
                StoreError::Forbidden => json_error(
                    StatusCode::FORBIDDEN,
                    "ERR_FORBIDDEN",
                    "Not allowed to share this meeting.",
                    false,
                ),
                other => storage_unavailable(&other),
            })?;

        Ok::<_, ApiError>(Json(ShareResponse {
            share_url: state.config.share_url(&share_token),
            share_token,
        }))
    })
    .await
}

pub(super) async fn get_shared_meeting(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(token): Path<String>,
) -> Result<Json<SharedMeeting>, ApiError> {
    let span = tracing::info_span!(
        "meeting.shared",
        request_id = %extract_request_id(&headers),
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    traced(span, "/api/v1/shared/{token}", "GET", async move {
        state
            .store
            .get_shared_meeting(&token)
            .await
            .map_err(|err| storage_unavailable(&err))?
            .map(Json)
            .ok_or_else(|| {
                json_error(
                    StatusCode::NOT_FOUND,
                    "ERR_NOT_FOUND",
                    "Shared meeting not found.",
                    false,
                )
            })
    })
    .await
}

fn meeting_not_found() -> ApiError {
    json_error(
        StatusCode::NOT_FOUND,
        "ERR_NOT_FOUND",
        "Meeting not found.",
        false,
    )
}
