use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode};
use serde::Deserialize;

use super::{
    ApiError, AppState, StatusMessage, extract_request_id, invalid_params, json_error, traced,
};
use crate::mailer::{OTP_EMAIL_SUBJECT, otp_email_body};

#[derive(Debug, Deserialize)]
pub(super) struct SendOtpBody {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct VerifyOtpBody {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    otp: Option<serde_json::Value>,
}

pub(super) async fn send_otp(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SendOtpBody>, JsonRejection>,
) -> Result<Json<StatusMessage>, ApiError> {
    let span = tracing::info_span!(
        "otp.send",
        request_id = %extract_request_id(&headers),
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    traced(span, "/api/v1/send_otp", "POST", async move {
        let Json(body) = body.map_err(|_| invalid_params("Email is required."))?;
        let email = non_blank(body.email.as_deref())
            .ok_or_else(|| invalid_params("Email is required."))?;

        if let Err(retry_after) = state.otp_sends.try_acquire(email) {
            tracing::warn!(
                retry_after_secs = retry_after.as_secs(),
                "otp send throttled"
            );
            return Err(json_error(
                StatusCode::TOO_MANY_REQUESTS,
                "ERR_RATE_LIMITED",
                "Too many OTP requests. Please try again later.",
                true,
            ));
        }

        let code = state.otp.issue(email);
        let html = otp_email_body(&code, state.otp.ttl());

        if let Err(err) = state.mailer.send(email, OTP_EMAIL_SUBJECT, &html).await {
            state.otp.revoke(email, &code);
            state.otp_sends.release(email);
            tracing::error!(error = %err, "otp delivery failed; code withdrawn");
            return Err(json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "ERR_MAIL_UNAVAILABLE",
                "Failed to send OTP email.",
                true,
            ));
        }

        Ok::<_, ApiError>(StatusMessage::success(format!("OTP sent to {}", email)))
    })
    .await
}

pub(super) async fn verify_otp(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<VerifyOtpBody>, JsonRejection>,
) -> Result<Json<StatusMessage>, ApiError> {
    let span = tracing::info_span!(
        "otp.verify",
        request_id = %extract_request_id(&headers),
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    traced(span, "/api/v1/verify_otp", "POST", async move {
        let Json(body) = body.map_err(|_| invalid_params("Email and OTP required."))?;
        let email = non_blank(body.email.as_deref());
        let candidate = body.otp.as_ref().and_then(otp_candidate);
        let (Some(email), Some(candidate)) = (email, candidate) else {
            return Err(invalid_params("Email and OTP required."));
        };

        match state.otp.verify(email, &candidate) {
            Ok(()) => {
                crate::metrics::observe_otp_verification("verified");
                Ok(StatusMessage::success("OTP verified successfully."))
            }
            Err(err) => {
                crate::metrics::observe_otp_verification(err.outcome());
                Err(json_error(
                    StatusCode::BAD_REQUEST,
                    err.code(),
                    err.to_string(),
                    false,
                ))
            }
        }
    })
    .await
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Clients send the code either as a string or as a bare JSON number.
fn otp_candidate(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => non_blank(Some(s)).map(str::to_string),
        serde_json::Value::Number(n) => n.as_u64().map(|n| n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otp_candidate_accepts_strings_and_integers_only() {
        assert_eq!(
            otp_candidate(&serde_json::json!(" 482913 ")).as_deref(),
            Some("482913")
        );
        assert_eq!(
            otp_candidate(&serde_json::json!(482913)).as_deref(),
            Some("482913")
        );
        assert_eq!(otp_candidate(&serde_json::json!("")), None);
        assert_eq!(otp_candidate(&serde_json::json!(4.5)), None);
        assert_eq!(otp_candidate(&serde_json::json!(null)), None);
        assert_eq!(otp_candidate(&serde_json::json!(["482913"])), None);
    }
}
