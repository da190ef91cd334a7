use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use meetly_auth::{Authenticator, Identity, IdentityProvider, IdentityToolkitClient};
use meetly_store::MeetingStore;
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::Instrument;
use ulid::Ulid;

use crate::analyze::Analyzer;
use crate::config::{CorsOrigins, MailerKind, ModelProviderKind, ServerConfig, StartupError};
use crate::mailer::{LogMailer, Mailer, SendGridConfig, SendGridMailer};
use crate::model::{GeminiClient, GeminiConfig, MockModel, ModelProvider};
use crate::otp::OtpRegistry;
use crate::throttle::SendThrottle;

mod feedback;
mod meetings;
mod otp;

pub const REQUEST_ID_HEADER: &str = "x-meetly-request-id";

#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    authenticator: Authenticator,
    analyzer: Analyzer,
    store: MeetingStore,
    otp: OtpRegistry,
    otp_sends: SendThrottle,
    mailer: Arc<dyn Mailer>,
}

/// External collaborators the router is wired against.
pub struct Services {
    pub identity: Arc<dyn IdentityProvider>,
    pub model: Arc<dyn ModelProvider>,
    pub mailer: Arc<dyn Mailer>,
    pub store: MeetingStore,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn router(config: ServerConfig) -> Result<Router, StartupError> {
    let store = MeetingStore::connect_and_migrate(
        &config.db_path,
        Duration::from_millis(config.store_timeout_ms),
    )
    .await
    .map_err(|err| StartupError {
        code: "ERR_STORE_UNAVAILABLE",
        message: format!("failed to initialize meeting store: {}", err),
    })?;

    let identity = IdentityToolkitClient::new(config.identity.clone()).map_err(|err| {
        StartupError {
            code: err.code,
            message: err.message,
        }
    })?;

    let model: Arc<dyn ModelProvider> = match config.model_provider {
        ModelProviderKind::Mock => Arc::new(MockModel),
        ModelProviderKind::Gemini => {
            let api_key = config.gemini_api_key.clone().ok_or_else(|| StartupError {
                code: "ERR_MISSING_CONFIG",
                message: "missing required config key MEETLY_GEMINI_API_KEY".to_string(),
            })?;
            Arc::new(
                GeminiClient::new(GeminiConfig {
                    base_url: config.gemini_base_url.clone(),
                    model: config.gemini_model.clone(),
                    api_key,
                    timeout: Duration::from_millis(config.model_timeout_ms),
                })
                .map_err(|_| StartupError {
                    code: "ERR_MODEL_UNAVAILABLE",
                    message: "failed to initialize model client".to_string(),
                })?,
            )
        }
    };

    let mailer: Arc<dyn Mailer> = match config.mailer {
        MailerKind::Log => Arc::new(LogMailer),
        MailerKind::SendGrid => {
            let api_key = config.sendgrid_api_key.clone().ok_or_else(|| StartupError {
                code: "ERR_MISSING_CONFIG",
                message: "missing required config key MEETLY_SENDGRID_API_KEY".to_string(),
            })?;
            Arc::new(
                SendGridMailer::new(SendGridConfig {
                    base_url: config.sendgrid_base_url.clone(),
                    api_key,
                    from_email: config.mail_from.clone(),
                    from_name: config.mail_from_name.clone(),
                    timeout: Duration::from_millis(config.mailer_timeout_ms),
                })
                .map_err(|_| StartupError {
                    code: "ERR_MAIL_UNAVAILABLE",
                    message: "failed to initialize mail client".to_string(),
                })?,
            )
        }
    };

    Ok(router_with_services(
        config,
        Services {
            identity: Arc::new(identity),
            model,
            mailer,
            store,
        },
    ))
}

pub fn router_with_services(config: ServerConfig, services: Services) -> Router {
    let cors = cors_layer(&config.cors_allow_origins);
    let otp = OtpRegistry::new(Duration::from_secs(config.otp_ttl_secs));
    let otp_sends = SendThrottle::new(
        Duration::from_secs(config.otp_send_window_secs),
        config.otp_send_limit_per_window,
    );

    let state = AppState {
        authenticator: Authenticator::new(services.identity),
        analyzer: Analyzer::new(services.model, services.store.clone()),
        store: services.store,
        otp,
        otp_sends,
        mailer: services.mailer,
        config,
    };

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/v1/analyze", post(meetings::analyze))
        .route("/api/v1/meetings", get(meetings::list_meetings))
        .route("/api/v1/meetings/{id}", get(meetings::get_meeting))
        .route("/api/v1/share/{id}", post(meetings::share_meeting))
        .route("/api/v1/shared/{token}", get(meetings::get_shared_meeting))
        .route("/api/v1/feedback", post(feedback::submit_feedback))
        .route("/api/v1/feedbacks", get(feedback::list_feedback))
        .route("/api/v1/send_otp", post(otp::send_otp))
        .route("/api/v1/verify_otp", post(otp::verify_otp))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &CorsOrigins) -> CorsLayer {
    match origins {
        CorsOrigins::Any => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
        CorsOrigins::List(origins) => {
            let origins = origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok())
                .collect::<Vec<_>>();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods([Method::GET, Method::HEAD, Method::POST, Method::OPTIONS])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    HeaderName::from_static(REQUEST_ID_HEADER),
                ])
                .allow_credentials(true)
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusMessage {
    status: &'static str,
    message: String,
}

impl StatusMessage {
    fn success(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            status: "success",
            message: message.into(),
        })
    }
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "Meetly.AI Backend is running" }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics() -> impl IntoResponse {
    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Runs a handler body inside `span`, then records latency, outcome and request metrics.
async fn traced<T, F>(
    span: tracing::Span,
    route: &'static str,
    method: &'static str,
    body: F,
) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    let started = Instant::now();
    let result = body.instrument(span.clone()).await;
    let elapsed = started.elapsed();

    span.record("latency_ms", elapsed.as_millis() as u64);
    let status = match &result {
        Ok(_) => {
            span.record("outcome", "ok");
            tracing::info!(parent: &span, "request completed");
            StatusCode::OK
        }
        Err((status, Json(err))) => {
            span.record("outcome", err.code.as_str());
            tracing::info!(parent: &span, status = status.as_u16(), code = %err.code, "request failed");
            *status
        }
    };

    crate::metrics::observe_http_request(route, method, status.as_u16(), elapsed);
    result
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Identity, ApiError> {
    let identity = state
        .authenticator
        .authenticate(headers)
        .await
        .map_err(|err| {
            let retryable = matches!(err.code, "ERR_AUTH_TIMEOUT" | "ERR_AUTH_UNAVAILABLE");
            if retryable {
                tracing::warn!(code = err.code, "identity lookup failed");
            }
            json_error(StatusCode::UNAUTHORIZED, err.code, err.message, retryable)
        })?;

    tracing::Span::current().record("subject_id", identity.subject_id.as_str());
    Ok(identity)
}

fn extract_request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .and_then(sanitize_request_id)
        .unwrap_or_else(|| Ulid::new().to_string())
}

fn sanitize_request_id(raw: &str) -> Option<String> {
    const MAX_LEN: usize = 64;
    let mut out = String::with_capacity(raw.len().min(MAX_LEN));

    for ch in raw.chars() {
        if out.len() >= MAX_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        }
    }

    (!out.is_empty()).then_some(out)
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
    retryable: bool,
}

fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
    retryable: bool,
) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            code: code.into(),
            message: message.into(),
            retryable,
        }),
    )
}

fn invalid_params(message: impl Into<String>) -> ApiError {
    json_error(StatusCode::BAD_REQUEST, "ERR_INVALID_PARAMS", message, false)
}

fn storage_unavailable(err: &meetly_store::StoreError) -> ApiError {
    tracing::error!(error = %err, "meeting store failure");
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "ERR_STORAGE_UNAVAILABLE",
        "storage unavailable",
        true,
    )
}
