//! Consent relay setup helper.
//!
//! Asks for the webhook token, Salebot credentials and delivery ids on the
//! terminal and writes a `config.toml` the relay can start from. Every
//! value can still be overridden through the environment at runtime.

use anyhow::{Context, Result};
use std::io::{self, Write};
use std::path::PathBuf;

// ── Config formatting ──────────────────────────────────────────────────────────

struct ConfigParams<'a> {
    listen: &'a str,
    token: &'a str,
    api_key: &'a str,
    channel_id: &'a str,
    bot_id: &'a str,
    template_id: &'a str,
    default_message: &'a str,
    force_template: bool,
    country_code: &'a str,
}

/// Render an id line, or a commented placeholder when the id is not usable.
fn id_line(key: &str, raw: &str) -> String {
    match raw.trim().parse::<u64>() {
        Ok(id) if id > 0 => format!("{key} = {id}"),
        _ => format!("# {key} = 0"),
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Produces a valid config.toml string. Extracted so it can be unit-tested.
fn format_config(p: &ConfigParams<'_>) -> String {
    let listen = escape(p.listen);
    let token = escape(p.token);
    let api_key = escape(p.api_key);
    let default_message = escape(p.default_message);
    let country_code: String = p.country_code.chars().filter(char::is_ascii_digit).collect();
    let channel_line = id_line("channel_id", p.channel_id);
    let bot_line = id_line("bot_id", p.bot_id);
    let template_line = id_line("template_id", p.template_id);
    let force_template = p.force_template;

    format!(
        r#"[server]
listen = "{listen}"

[webhook]
token = "{token}"
source = "zvonok-consent"

[salebot]
api_key = "{api_key}"
base_url = "https://chatter.salebot.pro/api"
{channel_line}
{bot_line}
{template_line}
default_message = "{default_message}"
force_template = {force_template}
after_template_callback = false
history_lookup = false

[phone]
default_country_code = "{country_code}"
"#
    )
}

// ── CLI ────────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    println!("=== Consent relay setup ===\n");

    let read_line = |prompt: &str| -> Result<String> {
        print!("{prompt}");
        io::stdout().flush()?;
        let mut buf = String::new();
        io::stdin().read_line(&mut buf)?;
        Ok(buf.trim().to_owned())
    };

    let or_default = |s: String, default: &str| {
        if s.is_empty() {
            default.to_owned()
        } else {
            s
        }
    };

    let listen = or_default(read_line("Listen address [0.0.0.0:3000]: ")?, "0.0.0.0:3000");
    let token = read_line("Webhook token (shared with the call provider): ")?;
    let api_key = read_line("Salebot API key: ")?;
    let channel_id = read_line("WhatsApp channel id (empty to skip): ")?;
    let bot_id = read_line("Bot id for whatsapp_callback (empty to skip): ")?;
    let template_id = read_line("Template id (empty to skip): ")?;
    let default_message = or_default(
        read_line("Default message text [Thank you for your answer!]: ")?,
        "Thank you for your answer!",
    );
    let force_template = read_line("Always prefer the template? [y/N]: ")?
        .eq_ignore_ascii_case("y");
    let country_code = or_default(read_line("Default country code [7]: ")?, "7");

    let config = format_config(&ConfigParams {
        listen: &listen,
        token: &token,
        api_key: &api_key,
        channel_id: &channel_id,
        bot_id: &bot_id,
        template_id: &template_id,
        default_message: &default_message,
        force_template,
        country_code: &country_code,
    });

    std::fs::write(&config_path, &config)
        .with_context(|| format!("Could not write {}", config_path.display()))?;

    println!("\n✓  config saved to {}", config_path.display());
    println!("   Run the relay with:  cargo run --bin consent-relay");
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn params<'a>(channel_id: &'a str, bot_id: &'a str, template_id: &'a str) -> ConfigParams<'a> {
        ConfigParams {
            listen: "0.0.0.0:3000",
            token: "secret",
            api_key: "sb-key",
            channel_id,
            bot_id,
            template_id,
            default_message: "Hello",
            force_template: false,
            country_code: "7",
        }
    }

    #[test]
    fn test_sections_present() {
        let out = format_config(&params("1", "2", "3"));
        assert!(out.contains("[server]"));
        assert!(out.contains("[webhook]"));
        assert!(out.contains("[salebot]"));
        assert!(out.contains("[phone]"));
        assert!(out.contains(r#"token = "secret""#));
        assert!(out.contains(r#"api_key = "sb-key""#));
    }

    #[test]
    fn test_ids_written_as_integers() {
        let out = format_config(&params("12", " 34 ", "56"));
        assert!(out.contains("\nchannel_id = 12\n"));
        assert!(out.contains("\nbot_id = 34\n"));
        assert!(out.contains("\ntemplate_id = 56\n"));
    }

    #[test]
    fn test_empty_or_zero_ids_commented() {
        let out = format_config(&params("", "0", "abc"));
        assert!(out.contains("# channel_id = 0"));
        assert!(out.contains("# bot_id = 0"));
        assert!(out.contains("# template_id = 0"));
    }

    #[test]
    fn test_quotes_escaped() {
        let mut p = params("1", "", "");
        p.default_message = r#"Say "hi""#;
        let out = format_config(&p);
        assert!(out.contains(r#"default_message = "Say \"hi\"""#));
        assert!(toml::from_str::<toml::Value>(&out).is_ok());
    }

    #[test]
    fn test_country_code_digits_only() {
        let mut p = params("1", "", "");
        p.country_code = "+380";
        let out = format_config(&p);
        assert!(out.contains(r#"default_country_code = "380""#));
    }

    #[test]
    fn test_output_is_valid_toml() {
        let parsed: toml::Value = toml::from_str(&format_config(&params("1", "2", "3"))).unwrap();
        assert_eq!(parsed["salebot"]["channel_id"].as_integer(), Some(1));
        assert_eq!(parsed["salebot"]["force_template"].as_bool(), Some(false));
    }
}
