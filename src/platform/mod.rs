pub mod zvonok;

use serde_json::{Map, Number, Value};

/// Flat mapping of request fields. Values may be strings or any JSON primitive.
pub type Payload = Map<String, Value>;

/// A webhook request as received from any call provider
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct InboundRequest {
    /// Upper-case HTTP method
    pub method: String,
    pub content_type: Option<String>,
    pub query: Payload,
    /// Raw body text (empty for GET)
    pub body: String,
}

/// Decode `a=1&b=2` pairs into a payload. Later keys overwrite earlier ones.
pub fn parse_urlencoded(input: &str) -> Payload {
    url::form_urlencoded::parse(input.as_bytes())
        .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
        .collect()
}

/// JSON object or empty payload; never fails.
pub fn parse_json_object(input: &str) -> Payload {
    match serde_json::from_str::<Value>(input) {
        Ok(Value::Object(map)) => map,
        _ => Payload::new(),
    }
}

/// Textual form of a field, if the field counts as "present".
///
/// Non-empty strings and non-zero numbers are present; everything else
/// (null, booleans, arrays, objects, `""`, `0`) is treated as absent.
pub fn field_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64().is_some_and(|f| f != 0.0) => Some(number_text(n)),
        _ => None,
    }
}

/// Number as a string, with integral floats written without a fraction
/// (`1.0` becomes `"1"`).
pub fn number_text(n: &Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.is_finite() && f.fract() == 0.0 && f.abs() < 1e21 => {
            if f == 0.0 {
                "0".to_string()
            } else {
                format!("{f:.0}")
            }
        }
        _ => n.to_string(),
    }
}

/// First present value of `key`, body before query.
pub fn lookup(body: &Payload, query: &Payload, key: &str) -> Option<String> {
    body.get(key)
        .and_then(field_text)
        .or_else(|| query.get(key).and_then(field_text))
}
