use serde_json::Value;
use tracing::debug;

use super::{
    lookup, number_text, parse_json_object, parse_urlencoded, InboundRequest, Payload,
};
use crate::phone::{extract_phone, normalize_phone};

/// Field carrying the digit the callee pressed during the IVR call
pub const BUTTON_FIELD: &str = "ct_button_num";

/// Call-tracking fields forwarded to the contact card
pub const TRACKING_FIELDS: &[&str] = &["ct_call_id", "ct_status", "ct_dial_status"];

/// A normalized call-outcome notification
#[derive(Debug, Clone)]
pub struct IncomingCall {
    /// `+<digits>` or empty when no usable number was found
    pub phone: String,
    /// Candidate before normalization, kept for diagnostics
    pub raw_phone: String,
    pub body: Payload,
    pub query: Payload,
}

/// Whether the callee opted in by pressing the consent button
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consent {
    /// No button field in the request
    NotApplicable,
    Given,
    Declined(String),
}

/// Parse the request body according to its content type.
pub fn parse_body(content_type: Option<&str>, raw: &str, query: &Payload) -> Payload {
    let ct = content_type.unwrap_or_default().to_ascii_lowercase();
    if ct.contains("application/json") {
        parse_json_object(raw)
    } else if ct.contains("application/x-www-form-urlencoded") {
        parse_urlencoded(raw)
    } else {
        let body = parse_json_object(raw);
        if body.is_empty() {
            query.clone()
        } else {
            body
        }
    }
}

/// Build an [`IncomingCall`] from a raw request.
pub fn normalize(request: &InboundRequest, default_country_code: &str) -> IncomingCall {
    let body = parse_body(request.content_type.as_deref(), &request.body, &request.query);
    let raw_phone = extract_phone(&body, &request.query, &request.body);
    let phone = normalize_phone(&raw_phone, default_country_code);

    debug!(
        candidate = %raw_phone,
        phone = %phone,
        body_fields = body.len(),
        query_fields = request.query.len(),
        "Normalized inbound call"
    );

    IncomingCall {
        phone,
        raw_phone,
        body,
        query: request.query.clone(),
    }
}

impl IncomingCall {
    pub fn consent(&self) -> Consent {
        let value = match self.body.get(BUTTON_FIELD) {
            Some(v) if !v.is_null() => Some(v),
            _ => self.query.get(BUTTON_FIELD).filter(|v| !v.is_null()),
        };

        let pressed = match value {
            None => return Consent::NotApplicable,
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => number_text(n),
            Some(other) => other.to_string(),
        };

        match pressed.as_str() {
            "" => Consent::NotApplicable,
            "1" => Consent::Given,
            _ => Consent::Declined(pressed),
        }
    }

    /// Call-tracking fields present in the request, body before query.
    pub fn tracking_fields(&self) -> Payload {
        TRACKING_FIELDS
            .iter()
            .filter_map(|key| {
                lookup(&self.body, &self.query, key).map(|v| (key.to_string(), Value::String(v)))
            })
            .collect()
    }
}
