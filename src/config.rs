use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub salebot: SalebotConfig,
    #[serde(default)]
    pub phone: PhoneConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    /// Pre-shared secret expected in the `token` query parameter
    #[serde(default)]
    pub token: Option<String>,
    /// Source tag attached to bot-resume callbacks
    #[serde(default = "default_source")]
    pub source: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SalebotConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// WhatsApp channel (`whatsapp_bot_id` on the wire)
    #[serde(default)]
    pub channel_id: Option<IdValue>,
    /// Constructor bot resumed by `whatsapp_callback`
    #[serde(default)]
    pub bot_id: Option<IdValue>,
    /// Pre-approved template (`message_id` on the wire)
    #[serde(default)]
    pub template_id: Option<IdValue>,
    #[serde(default = "default_message")]
    pub default_message: String,
    #[serde(default)]
    pub force_template: bool,
    #[serde(default)]
    pub after_template_callback: bool,
    #[serde(default)]
    pub history_lookup: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PhoneConfig {
    #[serde(default = "default_country_code")]
    pub default_country_code: String,
}

/// An id as written in the config file: either `12` or `"12"`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum IdValue {
    Number(i64),
    Text(String),
}

impl IdValue {
    pub fn resolve(&self) -> Option<u64> {
        match self {
            IdValue::Number(n) => u64::try_from(*n).ok().filter(|n| *n > 0),
            IdValue::Text(s) => coerce_id(s),
        }
    }
}

/// Coerce a configuration or query value into a positive id.
/// Zero, negatives and anything non-numeric mean "not configured".
pub fn coerce_id(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<u64>() {
        return (n > 0).then_some(n);
    }
    // "12.0" style values coming from loosely typed callers
    raw.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite() && *f >= 1.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
        .map(|f| f as u64)
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn default_listen() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_source() -> String {
    "zvonok-consent".to_string()
}

fn default_base_url() -> String {
    "https://chatter.salebot.pro/api".to_string()
}

fn default_message() -> String {
    "Thank you for your answer! We will continue the conversation here.".to_string()
}

fn default_country_code() -> String {
    "7".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            token: None,
            source: default_source(),
        }
    }
}

impl Default for SalebotConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            channel_id: None,
            bot_id: None,
            template_id: None,
            default_message: default_message(),
            force_template: false,
            after_template_callback: false,
            history_lookup: false,
        }
    }
}

impl Default for PhoneConfig {
    fn default() -> Self {
        Self {
            default_country_code: default_country_code(),
        }
    }
}

/// Which required settings are present, reported back on `env_missing`.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct RequiredSettings {
    #[serde(rename = "WEBHOOK_TOKEN")]
    pub token: bool,
    #[serde(rename = "SALEBOT_API_KEY")]
    pub api_key: bool,
    #[serde(rename = "SALEBOT_WA_BOT_ID|SALEBOT_BOT_ID")]
    pub delivery_route: bool,
}

impl RequiredSettings {
    pub fn all_present(&self) -> bool {
        self.token && self.api_key && self.delivery_route
    }
}

impl Config {
    pub fn token(&self) -> Option<&str> {
        non_empty(self.webhook.token.as_deref())
    }

    pub fn api_key(&self) -> Option<&str> {
        non_empty(self.salebot.api_key.as_deref())
    }

    pub fn channel_id(&self) -> Option<u64> {
        self.salebot.channel_id.as_ref().and_then(IdValue::resolve)
    }

    pub fn bot_id(&self) -> Option<u64> {
        self.salebot.bot_id.as_ref().and_then(IdValue::resolve)
    }

    pub fn template_id(&self) -> Option<u64> {
        self.salebot.template_id.as_ref().and_then(IdValue::resolve)
    }

    /// Digits of the configured default country code.
    pub fn country_code(&self) -> String {
        self.phone
            .default_country_code
            .chars()
            .filter(char::is_ascii_digit)
            .collect()
    }

    /// Settings the consent webhook cannot work without.
    pub fn required_settings(&self) -> RequiredSettings {
        RequiredSettings {
            token: self.token().is_some(),
            api_key: self.api_key().is_some(),
            delivery_route: self.channel_id().is_some() || self.bot_id().is_some(),
        }
    }

    /// Load `path` if it exists, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay environment variables (names match the original deployment).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("LISTEN_ADDR") {
            self.server.listen = v;
        }
        if let Some(v) = get("WEBHOOK_TOKEN") {
            self.webhook.token = Some(v);
        }
        if let Some(v) = get("WEBHOOK_SOURCE") {
            self.webhook.source = v;
        }
        if let Some(v) = get("SALEBOT_API_KEY") {
            self.salebot.api_key = Some(v);
        }
        if let Some(v) = get("SALEBOT_BASE_URL") {
            self.salebot.base_url = v;
        }
        if let Some(v) = get("SALEBOT_WA_BOT_ID") {
            self.salebot.channel_id = Some(IdValue::Text(v));
        }
        if let Some(v) = get("SALEBOT_BOT_ID") {
            self.salebot.bot_id = Some(IdValue::Text(v));
        }
        if let Some(v) = get("SALEBOT_MESSAGE_ID") {
            self.salebot.template_id = Some(IdValue::Text(v));
        }
        if let Some(v) = get("DEFAULT_MESSAGE") {
            self.salebot.default_message = v;
        }
        if let Some(v) = get("FORCE_TEMPLATE") {
            self.salebot.force_template = parse_flag(&v);
        }
        if let Some(v) = get("AFTER_TEMPLATE_CALLBACK") {
            self.salebot.after_template_callback = parse_flag(&v);
        }
        if let Some(v) = get("HISTORY_LOOKUP") {
            self.salebot.history_lookup = parse_flag(&v);
        }
        if let Some(v) = get("FORCE_COUNTRY_CODE") {
            self.phone.default_country_code = v;
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.listen, "0.0.0.0:3000");
        assert_eq!(config.salebot.base_url, "https://chatter.salebot.pro/api");
        assert_eq!(config.webhook.source, "zvonok-consent");
        assert_eq!(config.country_code(), "7");
        assert!(!config.required_settings().all_present());
    }

    #[test]
    fn test_parse_toml_with_numeric_and_string_ids() {
        let config: Config = toml::from_str(
            r#"
            [webhook]
            token = "secret"

            [salebot]
            api_key = "key"
            channel_id = 42
            bot_id = "17"
            template_id = 0
            force_template = true
            "#,
        )
        .unwrap();

        assert_eq!(config.token(), Some("secret"));
        assert_eq!(config.channel_id(), Some(42));
        assert_eq!(config.bot_id(), Some(17));
        assert_eq!(config.template_id(), None);
        assert!(config.salebot.force_template);
        assert!(config.required_settings().all_present());
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("WEBHOOK_TOKEN", "t0k"),
            ("SALEBOT_API_KEY", "abc"),
            ("SALEBOT_WA_BOT_ID", "123"),
            ("SALEBOT_MESSAGE_ID", "nope"),
            ("FORCE_TEMPLATE", "1"),
            ("FORCE_COUNTRY_CODE", "+380"),
        ]));

        assert_eq!(config.token(), Some("t0k"));
        assert_eq!(config.api_key(), Some("abc"));
        assert_eq!(config.channel_id(), Some(123));
        assert_eq!(config.template_id(), None);
        assert!(config.salebot.force_template);
        assert_eq!(config.country_code(), "380");
    }

    #[test]
    fn test_blank_env_values_are_ignored() {
        let mut config = Config::default();
        config.webhook.token = Some("from-file".to_string());
        config.apply_env(env(&[("WEBHOOK_TOKEN", "  ")]));
        assert_eq!(config.token(), Some("from-file"));
    }

    #[test]
    fn test_required_settings_reports_each_flag() {
        let mut config = Config::default();
        config.salebot.api_key = Some("key".to_string());
        config.salebot.bot_id = Some(IdValue::Number(5));

        let have = config.required_settings();
        assert!(!have.token);
        assert!(have.api_key);
        assert!(have.delivery_route);
        assert!(!have.all_present());
    }

    #[test]
    fn test_coerce_id() {
        assert_eq!(coerce_id("15"), Some(15));
        assert_eq!(coerce_id(" 15 "), Some(15));
        assert_eq!(coerce_id("15.0"), Some(15));
        assert_eq!(coerce_id("0"), None);
        assert_eq!(coerce_id("-3"), None);
        assert_eq!(coerce_id("NaN"), None);
        assert_eq!(coerce_id("1.5"), None);
        assert_eq!(coerce_id(""), None);
        assert_eq!(IdValue::Number(-1).resolve(), None);
    }
}
