//! Operator self-test: checks Salebot connectivity and optionally sends
//! test messages to a given number.

use anyhow::Result;
use serde_json::{json, Value};
use tracing::info;

use crate::config::{coerce_id, Config};
use crate::platform::{field_text, Payload};
use crate::salebot::{ApiReply, ChatApi};

const SELFTEST_PHONE_KEYS: &[&str] = &["phone", "ct_phone", "ct_phone8", "ct_phone9"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendMode {
    Text,
    Template,
    Both,
}

impl SendMode {
    /// Known modes only; anything else sends nothing.
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "text" => Some(SendMode::Text),
            "template" => Some(SendMode::Template),
            "both" => Some(SendMode::Both),
            _ => None,
        }
    }
}

fn query_text(query: &Payload, key: &str) -> Option<String> {
    query.get(key).and_then(field_text)
}

/// An id given in the query wins even when it is invalid; the configured
/// value is used only when the query has none.
fn query_id(query: &Payload, key: &str, configured: Option<u64>) -> Option<u64> {
    match query_text(query, key) {
        Some(raw) => coerce_id(&raw),
        None => configured,
    }
}

fn pack(reply: Result<ApiReply>) -> Value {
    match reply {
        Ok(reply) => json!({
            "ok": reply.is_success(),
            "status": reply.status,
            "body": reply.body,
        }),
        Err(e) => json!({
            "ok": false,
            "status": 0,
            "body": { "error": format!("{e:#}") },
        }),
    }
}

async fn send(api: &dyn ChatApi, via: &str, payload: Value) -> Value {
    let mut entry = pack(api.post("whatsapp_message", &payload).await);
    if let Some(map) = entry.as_object_mut() {
        map.insert("via".into(), json!(via));
        map.insert("payload_sent".into(), payload);
    }
    entry
}

/// Run the self-test described by `query` and return the report.
pub async fn run(api: &dyn ChatApi, config: &Config, query: &Payload) -> Value {
    let phone = SELFTEST_PHONE_KEYS
        .iter()
        .find_map(|key| query_text(query, key))
        .unwrap_or_default();
    let wa_id = query_id(query, "wa_id", config.channel_id());
    let mode_raw = query_text(query, "mode").unwrap_or_else(|| "text".to_string());
    let mode = SendMode::parse(&mode_raw);
    let text = query_text(query, "text")
        .or_else(|| query_text(query, "msg"))
        .unwrap_or_else(|| config.salebot.default_message.clone());
    let template_id = query_id(query, "template_id", config.template_id());
    let dry = query_text(query, "dry").as_deref() == Some("1");

    info!(phone = %phone, ?wa_id, mode = %mode_raw, dry, "Running self-test");

    let inputs = json!({
        "phone": phone,
        "wa_id": wa_id.unwrap_or(0),
        "mode": mode_raw,
        "text": text,
        "template_id": template_id.unwrap_or(0),
        "dry": dry,
    });

    let mut checks = Payload::new();
    checks.insert(
        "connected_channels".into(),
        pack(api.get("connected_channels", &[]).await),
    );
    let check_whatsapp = if phone.is_empty() {
        json!({ "skipped": "no_phone" })
    } else {
        pack(api.post("check_whatsapp", &json!({ "phone": phone })).await)
    };
    checks.insert("check_whatsapp".into(), check_whatsapp);

    if dry {
        return json!({
            "ok": true,
            "inputs": inputs,
            "checks": checks,
            "sends": [],
            "note": "dry_run",
        });
    }

    let mut sends = Vec::new();
    if phone.is_empty() {
        sends.push(json!({ "skipped": "no_phone" }));
    }

    match wa_id {
        None => sends.push(json!({ "skipped": "no_wa_id" })),
        Some(wa_id) if !phone.is_empty() => {
            if let (Some(SendMode::Template | SendMode::Both), Some(template_id)) =
                (mode, template_id)
            {
                let payload = json!({
                    "phone": phone,
                    "whatsapp_bot_id": wa_id,
                    "message_id": template_id,
                });
                sends.push(send(api, "whatsapp_message(template)", payload).await);
            }
            if matches!(mode, Some(SendMode::Text | SendMode::Both)) {
                let payload = json!({
                    "phone": phone,
                    "whatsapp_bot_id": wa_id,
                    "text": text,
                });
                sends.push(send(api, "whatsapp_message(text)", payload).await);
            }
        }
        Some(_) => {}
    }

    json!({
        "ok": true,
        "inputs": inputs,
        "checks": checks,
        "sends": sends,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdValue;
    use crate::platform::parse_urlencoded;
    use crate::salebot::testing::RecordingApi;

    fn config() -> Config {
        let mut config = Config::default();
        config.salebot.channel_id = Some(IdValue::Number(5));
        config.salebot.template_id = Some(IdValue::Number(9));
        config.salebot.default_message = "VIA_SELFTEST".to_string();
        config
    }

    #[tokio::test]
    async fn test_dry_run_only_checks() {
        let api = RecordingApi::new().reply("connected_channels", 200, json!([{"id": 5}]));
        let report = run(&api, &config(), &parse_urlencoded("phone=%2B79991234567&dry=1")).await;

        assert_eq!(report["note"], json!("dry_run"));
        assert_eq!(report["checks"]["connected_channels"]["body"], json!([{"id": 5}]));
        assert_eq!(report["checks"]["check_whatsapp"]["ok"], json!(true));
        assert_eq!(
            api.methods(),
            vec!["connected_channels".to_string(), "check_whatsapp".to_string()]
        );
    }

    #[tokio::test]
    async fn test_both_sends_template_then_text() {
        let api = RecordingApi::new();
        let report = run(
            &api,
            &config(),
            &parse_urlencoded("ct_phone=79991234567&mode=both&msg=ping"),
        )
        .await;

        let sends = report["sends"].as_array().unwrap();
        assert_eq!(sends.len(), 2);
        assert_eq!(sends[0]["via"], json!("whatsapp_message(template)"));
        assert_eq!(sends[0]["payload_sent"]["message_id"], json!(9));
        assert_eq!(sends[1]["payload_sent"]["text"], json!("ping"));
        // phone is used verbatim here
        assert_eq!(sends[1]["payload_sent"]["phone"], json!("79991234567"));
    }

    #[tokio::test]
    async fn test_missing_inputs_are_reported() {
        let api = RecordingApi::new();
        let report = run(&api, &Config::default(), &Payload::new()).await;

        assert_eq!(report["inputs"]["wa_id"], json!(0));
        assert_eq!(report["checks"]["check_whatsapp"]["skipped"], json!("no_phone"));
        assert_eq!(
            report["sends"],
            json!([{"skipped": "no_phone"}, {"skipped": "no_wa_id"}])
        );
        assert_eq!(api.methods(), vec!["connected_channels".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_mode_sends_nothing() {
        let api = RecordingApi::new();
        let report = run(&api, &config(), &parse_urlencoded("phone=79991234567&mode=foo")).await;

        assert_eq!(report["inputs"]["mode"], json!("foo"));
        assert_eq!(report["sends"], json!([]));
        assert_eq!(
            api.methods(),
            vec!["connected_channels".to_string(), "check_whatsapp".to_string()]
        );
    }

    #[tokio::test]
    async fn test_default_mode_is_text() {
        let api = RecordingApi::new();
        let report = run(&api, &config(), &parse_urlencoded("phone=79991234567&mode=")).await;

        assert_eq!(report["inputs"]["mode"], json!("text"));
        let sends = report["sends"].as_array().unwrap();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0]["via"], json!("whatsapp_message(text)"));
        assert_eq!(sends[0]["payload_sent"]["text"], json!("VIA_SELFTEST"));
    }

    #[tokio::test]
    async fn test_invalid_query_ids_do_not_use_config() {
        let api = RecordingApi::new();
        let report = run(
            &api,
            &config(),
            &parse_urlencoded("phone=79991234567&wa_id=abc&template_id=0&mode=both"),
        )
        .await;

        assert_eq!(report["inputs"]["wa_id"], json!(0));
        assert_eq!(report["inputs"]["template_id"], json!(0));
        assert_eq!(report["sends"], json!([{"skipped": "no_wa_id"}]));

        // a valid wa_id with an invalid template_id only sends text
        let api = RecordingApi::new();
        let report = run(
            &api,
            &config(),
            &parse_urlencoded("phone=79991234567&wa_id=12&template_id=x&mode=both"),
        )
        .await;
        let sends = report["sends"].as_array().unwrap();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0]["via"], json!("whatsapp_message(text)"));
        assert_eq!(sends[0]["payload_sent"]["whatsapp_bot_id"], json!(12));
    }

    #[tokio::test]
    async fn test_transport_failure_in_checks() {
        let api = RecordingApi::new().fail("connected_channels", "dns error");
        let report = run(&api, &config(), &parse_urlencoded("dry=1")).await;

        let check = &report["checks"]["connected_channels"];
        assert_eq!(check["ok"], json!(false));
        assert_eq!(check["status"], json!(0));
    }
}
