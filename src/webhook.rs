use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header::CONTENT_TYPE, request::Parts, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{coerce_id, Config};
use crate::dispatch::{self, AttemptRecord, DeliveryMethod, DispatchConfig, DispatchOutcome, Mode};
use crate::platform::zvonok::{self, Consent};
use crate::platform::{parse_urlencoded, InboundRequest, Payload};
use crate::salebot::{ChatApi, SalebotClient};
use crate::selftest;

/// Largest webhook body we are willing to buffer
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub api: Arc<dyn ChatApi>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let api = SalebotClient::new(
            &config.salebot.base_url,
            config.api_key().unwrap_or_default(),
        );
        Self::with_api(config, Arc::new(api))
    }

    pub fn with_api(config: Config, api: Arc<dyn ChatApi>) -> Self {
        Self { config, api }
    }
}

/// Benign reasons to acknowledge a webhook without sending anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ButtonNot1,
    PhoneNotFound,
}

impl SkipReason {
    pub fn tag(self) -> &'static str {
        match self {
            SkipReason::ButtonNot1 => "button_not_1",
            SkipReason::PhoneNotFound => "phone_not_found",
        }
    }
}

/// Result of handling one webhook request
#[derive(Debug)]
pub enum Outcome {
    MethodNotAllowed,
    ConfigMissing(Value),
    Unauthorized,
    Skipped(SkipReason),
    Delivered {
        phone: String,
        via: DeliveryMethod,
        response: Value,
        attempts: Vec<AttemptRecord>,
        history: Option<Value>,
    },
    DeliveryFailed {
        phone: String,
        attempts: Vec<AttemptRecord>,
    },
    /// Diagnostic report (self-test)
    Report(Value),
    Internal(String),
}

impl IntoResponse for Outcome {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Outcome::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                json!({ "error": "method_not_allowed" }),
            ),
            Outcome::ConfigMissing(have) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "env_missing", "have": have }),
            ),
            Outcome::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "invalid_token" }),
            ),
            Outcome::Skipped(reason) => (
                StatusCode::OK,
                json!({ "ok": true, "skipped": reason.tag() }),
            ),
            Outcome::Delivered {
                phone,
                via,
                response,
                attempts,
                history,
            } => {
                let mut body = json!({
                    "ok": true,
                    "sent_to_salebot": phone,
                    "salebot_via": via.label(),
                    "salebot_response": response,
                    "attempts": attempts,
                });
                if let (Some(history), Some(map)) = (history, body.as_object_mut()) {
                    map.insert("history".into(), history);
                }
                (StatusCode::OK, body)
            }
            Outcome::DeliveryFailed { phone, attempts } => (
                StatusCode::BAD_GATEWAY,
                json!({
                    "ok": false,
                    "error": "salebot_send_failed",
                    "phone": phone,
                    "attempts": attempts,
                }),
            ),
            Outcome::Report(report) => (StatusCode::OK, report),
            Outcome::Internal(details) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "internal", "details": details }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/zvonok-consent", any(consent_webhook))
        .route("/api/sb-selftest", any(selftest_webhook))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Serve the webhook endpoints until Ctrl-C
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let addr = state.config.server.listen.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    Ok(())
}

async fn consent_webhook(State(state): State<Arc<AppState>>, request: Request) -> Outcome {
    let span = info_span!("webhook", request_id = %Uuid::new_v4(), endpoint = "zvonok-consent");
    guarded(process_consent(&state, request)).instrument(span).await
}

async fn selftest_webhook(State(state): State<Arc<AppState>>, request: Request) -> Outcome {
    let span = info_span!("webhook", request_id = %Uuid::new_v4(), endpoint = "sb-selftest");
    guarded(process_selftest(&state, request)).instrument(span).await
}

/// Last line of defense: errors and panics become a generic 500.
async fn guarded<F>(pipeline: F) -> Outcome
where
    F: Future<Output = Result<Outcome>>,
{
    match AssertUnwindSafe(pipeline).catch_unwind().await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            error!("Webhook processing failed: {:#}", e);
            Outcome::Internal(format!("{e:#}"))
        }
        Err(panic) => {
            let details = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            error!("Webhook processing panicked: {}", details);
            Outcome::Internal(details)
        }
    }
}

/// Method, configuration and token checks, in that order.
fn check_access(parts: &Parts, config: &Config, have: Value, configured: bool) -> Option<Outcome> {
    if parts.method != Method::GET && parts.method != Method::POST {
        warn!(method = %parts.method, "Rejected method");
        return Some(Outcome::MethodNotAllowed);
    }

    if !configured {
        error!(have = %have, "Required configuration missing");
        return Some(Outcome::ConfigMissing(have));
    }

    let query = query_payload(parts);
    let presented = query_str(&query, "token").unwrap_or_default();
    if Some(presented) != config.token() {
        warn!("Rejected request with invalid token");
        return Some(Outcome::Unauthorized);
    }

    None
}

fn query_payload(parts: &Parts) -> Payload {
    parts.uri.query().map(parse_urlencoded).unwrap_or_default()
}

fn query_str<'a>(query: &'a Payload, key: &str) -> Option<&'a str> {
    query
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Never fails: an unreadable or oversized body is treated as empty so the
/// query string can still be used.
async fn read_inbound(parts: &Parts, body: Body) -> InboundRequest {
    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = if parts.method == Method::GET {
        String::new()
    } else {
        match to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!("Ignoring unreadable request body: {}", e);
                String::new()
            }
        }
    };

    InboundRequest {
        method: parts.method.as_str().to_string(),
        content_type,
        query: query_payload(parts),
        body,
    }
}

/// Configuration merged with the request's query overrides.
fn dispatch_config(config: &Config, query: &Payload) -> DispatchConfig {
    let default_mode = if config.salebot.force_template {
        Mode::Template
    } else {
        Mode::Auto
    };

    let text = ["msg", "message", "text"]
        .iter()
        .find_map(|key| query_str(query, key))
        .map(str::to_string)
        .unwrap_or_else(|| config.salebot.default_message.clone());

    DispatchConfig {
        channel_id: query_str(query, "wa_id")
            .and_then(coerce_id)
            .or_else(|| config.channel_id()),
        bot_id: config.bot_id(),
        template_id: query_str(query, "template_id")
            .and_then(coerce_id)
            .or_else(|| config.template_id()),
        text,
        mode: Mode::parse(query_str(query, "mode"), default_mode),
        after_template_callback: config.salebot.after_template_callback,
        source: config.webhook.source.clone(),
    }
}

async fn process_consent(state: &AppState, request: Request) -> Result<Outcome> {
    let config = &state.config;
    let (parts, body) = request.into_parts();

    let have = config.required_settings();
    let have_json = serde_json::to_value(have).context("Failed to encode settings report")?;
    if let Some(rejected) = check_access(&parts, config, have_json, have.all_present()) {
        return Ok(rejected);
    }

    let inbound = read_inbound(&parts, body).await;
    let call = zvonok::normalize(&inbound, &config.country_code());

    if let Consent::Declined(pressed) = call.consent() {
        info!(button = %pressed, "Consent not given, skipping");
        return Ok(Outcome::Skipped(SkipReason::ButtonNot1));
    }

    if call.phone.is_empty() {
        let raw: String = inbound.body.chars().take(300).collect();
        let query = Value::Object(inbound.query.clone());
        warn!(
            candidate = %call.raw_phone,
            query = %query,
            content_type = inbound.content_type.as_deref().unwrap_or_default(),
            raw = %raw,
            "phone_not_found"
        );
        return Ok(Outcome::Skipped(SkipReason::PhoneNotFound));
    }

    let settings = dispatch_config(config, &inbound.query);
    let outcome = dispatch::dispatch(
        state.api.as_ref(),
        &call.phone,
        &settings,
        &call.tracking_fields(),
    )
    .await;

    debug!(attempts = outcome.attempts().len(), "Dispatch finished");

    match outcome {
        DispatchOutcome::Delivered {
            via,
            response,
            attempts,
        } => {
            let want_history =
                config.salebot.history_lookup || query_str(&inbound.query, "history") == Some("1");
            let history = if want_history {
                Some(dispatch::lookup_history(state.api.as_ref(), &call.phone).await)
            } else {
                None
            };
            Ok(Outcome::Delivered {
                phone: call.phone,
                via,
                response,
                attempts,
                history,
            })
        }
        DispatchOutcome::Failed { attempts } => {
            error!(
                phone = %call.phone,
                attempts = attempts.len(),
                "All delivery attempts failed"
            );
            Ok(Outcome::DeliveryFailed {
                phone: call.phone,
                attempts,
            })
        }
    }
}

async fn process_selftest(state: &AppState, request: Request) -> Result<Outcome> {
    let config = &state.config;
    let (parts, _body) = request.into_parts();

    let token = config.token().is_some();
    let api_key = config.api_key().is_some();
    let have = json!({ "WEBHOOK_TOKEN": token, "SALEBOT_API_KEY": api_key });
    if let Some(rejected) = check_access(&parts, config, have, token && api_key) {
        return Ok(rejected);
    }

    let query = query_payload(&parts);
    let report = selftest::run(state.api.as_ref(), config, &query).await;
    Ok(Outcome::Report(report))
}
