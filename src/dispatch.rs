//! Outbound delivery to Salebot with an ordered fallback chain:
//! template message, then text message, then bot-resume callback.
//! The first 2xx reply wins.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::platform::Payload;
use crate::salebot::{ApiReply, ChatApi};

/// Preferred delivery path for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Template when one is configured, otherwise text
    #[default]
    Auto,
    Text,
    Template,
}

impl Mode {
    /// `text` / `template` from a request override; anything else keeps `fallback`.
    pub fn parse(raw: Option<&str>, fallback: Mode) -> Mode {
        match raw.map(str::trim) {
            Some("text") => Mode::Text,
            Some("template") => Mode::Template,
            _ => fallback,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMethod {
    Template,
    Text,
    Callback,
}

impl DeliveryMethod {
    /// Salebot API method name
    pub fn api_method(self) -> &'static str {
        match self {
            DeliveryMethod::Template | DeliveryMethod::Text => "whatsapp_message",
            DeliveryMethod::Callback => "whatsapp_callback",
        }
    }

    /// Name used in attempt logs and responses
    pub fn label(self) -> &'static str {
        match self {
            DeliveryMethod::Template => "whatsapp_message(template)",
            DeliveryMethod::Text => "whatsapp_message(text)",
            DeliveryMethod::Callback => "whatsapp_callback",
        }
    }
}

/// Per-request delivery settings: configuration merged with query overrides.
#[derive(Debug, Clone, Default)]
pub struct DispatchConfig {
    pub channel_id: Option<u64>,
    pub bot_id: Option<u64>,
    pub template_id: Option<u64>,
    pub text: String,
    pub mode: Mode,
    /// Also resume the bot after a successful template send
    pub after_template_callback: bool,
    /// Source tag for callbacks
    pub source: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AttemptRecord {
    pub method: &'static str,
    pub status: u16,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Delivered {
        via: DeliveryMethod,
        response: Value,
        /// Every call made, the successful one included
        attempts: Vec<AttemptRecord>,
    },
    Failed {
        attempts: Vec<AttemptRecord>,
    },
}

impl DispatchOutcome {
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            DispatchOutcome::Delivered { attempts, .. } | DispatchOutcome::Failed { attempts } => {
                attempts
            }
        }
    }
}

impl DispatchConfig {
    fn template_payload(&self, phone: &str) -> Option<Value> {
        let channel = self.channel_id?;
        let template = self.template_id?;
        if self.mode == Mode::Text {
            return None;
        }
        Some(json!({
            "phone": phone,
            "whatsapp_bot_id": channel,
            "message_id": template,
        }))
    }

    fn text_payload(&self, phone: &str) -> Option<Value> {
        let channel = self.channel_id?;
        if self.text.trim().is_empty() {
            return None;
        }
        Some(json!({
            "phone": phone,
            "whatsapp_bot_id": channel,
            "text": self.text,
        }))
    }

    fn callback_payload(&self, phone: &str, extra: &Payload) -> Option<Value> {
        let bot_id = self.bot_id?;
        let mut payload = Payload::new();
        // tracking fields first so the core fields cannot be overwritten
        for (k, v) in extra {
            payload.insert(k.clone(), v.clone());
        }
        payload.insert("phone".into(), json!(phone));
        payload.insert("bot_id".into(), json!(bot_id));
        payload.insert("message".into(), json!(self.text));
        payload.insert("resume_bot".into(), json!(true));
        payload.insert("source".into(), json!(self.source));
        payload.insert(
            "ts".into(),
            json!(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        Some(Value::Object(payload))
    }
}

async fn attempt(api: &dyn ChatApi, method: DeliveryMethod, payload: &Value) -> AttemptRecord {
    debug!(method = method.label(), "Attempting delivery");

    let reply = match api.post(method.api_method(), payload).await {
        Ok(reply) => reply,
        Err(e) => ApiReply {
            status: 0,
            body: json!({ "error": format!("{e:#}") }),
        },
    };

    if !reply.is_success() {
        warn!(
            method = method.label(),
            status = reply.status,
            body = %reply.body,
            "Delivery attempt failed"
        );
    }

    AttemptRecord {
        method: method.label(),
        status: reply.status,
        body: reply.body,
    }
}

fn succeeded(record: &AttemptRecord) -> bool {
    (200..300).contains(&record.status)
}

/// Deliver to `phone` (already normalized, non-empty).
///
/// `extra` carries call-tracking fields for the bot-resume callback.
pub async fn dispatch(
    api: &dyn ChatApi,
    phone: &str,
    config: &DispatchConfig,
    extra: &Payload,
) -> DispatchOutcome {
    let mut attempts = Vec::new();

    if let Some(payload) = config.template_payload(phone) {
        let record = attempt(api, DeliveryMethod::Template, &payload).await;
        let ok = succeeded(&record);
        let response = record.body.clone();
        attempts.push(record);

        if ok {
            if config.after_template_callback {
                if let Some(payload) = config.callback_payload(phone, extra) {
                    attempts.push(attempt(api, DeliveryMethod::Callback, &payload).await);
                }
            }
            info!(phone, via = DeliveryMethod::Template.label(), "Delivered");
            return DispatchOutcome::Delivered {
                via: DeliveryMethod::Template,
                response,
                attempts,
            };
        }
    }

    let remaining = [
        (DeliveryMethod::Text, config.text_payload(phone)),
        (DeliveryMethod::Callback, config.callback_payload(phone, extra)),
    ];

    for (method, payload) in remaining {
        let Some(payload) = payload else {
            continue;
        };
        let record = attempt(api, method, &payload).await;
        let ok = succeeded(&record);
        let response = record.body.clone();
        attempts.push(record);

        if ok {
            info!(phone, via = method.label(), "Delivered");
            return DispatchOutcome::Delivered {
                via: method,
                response,
                attempts,
            };
        }
    }

    DispatchOutcome::Failed { attempts }
}

/// Best-effort conversation history for a contact we just messaged.
/// Never fails; problems are reported inside the returned object.
pub async fn lookup_history(api: &dyn ChatApi, phone: &str) -> Value {
    let reply = match api
        .get("whatsapp_client_id", &[("phone", phone.to_string())])
        .await
    {
        Ok(reply) if reply.is_success() => reply,
        Ok(reply) => {
            return json!({
                "error": "whatsapp_client_id_failed",
                "status": reply.status,
                "body": reply.body,
            })
        }
        Err(e) => return json!({ "error": format!("{e:#}") }),
    };

    let client_id = match reply.body.get("client_id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return json!({ "error": "client_id_not_found", "body": reply.body }),
    };

    match api
        .get("get_history", &[("client_id", client_id.clone())])
        .await
    {
        Ok(history) if history.is_success() => json!({
            "client_id": client_id,
            "history": history.body,
        }),
        Ok(history) => json!({
            "client_id": client_id,
            "error": "get_history_failed",
            "status": history.status,
            "body": history.body,
        }),
        Err(e) => json!({ "client_id": client_id, "error": format!("{e:#}") }),
    }
}
