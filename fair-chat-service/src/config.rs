use std::time::Duration;

use anyhow::{Context, Result, bail};
use fair_chat::ChatConfig;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8501;

/// Service settings, read from the environment.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub chat: ChatConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            chat: ChatConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(host) = lookup("BIND_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("PORT") {
            config.port = port
                .parse()
                .with_context(|| format!("PORT must be a port number, got {:?}", port))?;
        }

        let chat = &mut config.chat;
        if let Some(url) = lookup("INSURER_API_URL") {
            chat.insurer_api_url = url;
        }
        if let Some(flag) = lookup("INSURER_ACCEPT_INVALID_CERTS") {
            chat.accept_invalid_certs = parse_flag("INSURER_ACCEPT_INVALID_CERTS", &flag)?;
        }
        if let Some(url) = lookup("OLLAMA_API_URL") {
            chat.generation_api_url = url;
        }
        if let Some(model) = lookup("OLLAMA_MODEL") {
            chat.model = model;
        }
        if let Some(secs) = lookup("GENERATION_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().with_context(|| {
                format!("GENERATION_TIMEOUT_SECS must be whole seconds, got {:?}", secs)
            })?;
            chat.generation_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(insurer_id) = lookup("DEFAULT_INSURER_ID") {
            chat.default_insurer_id = insurer_id;
        }
        if let Some(max) = lookup("MAX_SESSIONS") {
            chat.max_sessions = max
                .parse()
                .with_context(|| format!("MAX_SESSIONS must be a count, got {:?}", max))?;
        }
        if let Some(secs) = lookup("SESSION_IDLE_SECS") {
            let secs: u64 = secs.parse().with_context(|| {
                format!("SESSION_IDLE_SECS must be whole seconds, got {:?}", secs)
            })?;
            chat.session_idle_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{} must be true or false, got {:?}", key, other),
    }
}
