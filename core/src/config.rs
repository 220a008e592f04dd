/// Configuration management
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000";
const DEFAULT_PAGE_SIZE: usize = 30;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the REST collaborator (rooms, messages, fallbacks, uploads)
    pub api_base: String,

    /// Number of messages requested per page
    pub page_size: usize,

    /// Event consumer tick
    pub tick_interval: Duration,

    /// How long an optimistic send may stay pending before it is marked failed
    pub send_timeout: Duration,

    /// Per-request timeout for the HTTP collaborator
    pub request_timeout: Duration,

    /// Local render API address (disabled when `None`)
    pub render_api_addr: Option<SocketAddr>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            tick_interval: Duration::from_millis(250),
            send_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            render_api_addr: None,
        }
    }
}

impl EngineConfig {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        if args.len() < 2 {
            return Err(ChatError::Config(format!(
                "Usage: {} <api-base> [--page-size <n>] [--tick-ms <ms>] [--send-timeout-secs <s>] [--render-port <port>]",
                args.first().map(String::as_str).unwrap_or("haggle")
            )));
        }

        let mut api_base = args[1].trim_end_matches('/').to_string();
        let mut page_size = DEFAULT_PAGE_SIZE;
        let mut tick_ms: Option<u64> = None;
        let mut send_timeout_secs: Option<u64> = None;
        let mut render_port: Option<u16> = None;

        let mut i = 2;
        while i < args.len() {
            match args[i].as_str() {
                "--page-size" => {
                    page_size = parse_flag(args, i, "--page-size")?;
                    i += 2;
                }
                "--tick-ms" => {
                    tick_ms = Some(parse_flag(args, i, "--tick-ms")?);
                    i += 2;
                }
                "--send-timeout-secs" => {
                    send_timeout_secs = Some(parse_flag(args, i, "--send-timeout-secs")?);
                    i += 2;
                }
                "--render-port" => {
                    render_port = Some(parse_flag(args, i, "--render-port")?);
                    i += 2;
                }
                other => {
                    return Err(ChatError::Config(format!("Unknown argument: {}", other)));
                }
            }
        }

        // Env overrides (nice for scripts)
        if let Ok(base) = std::env::var("HAGGLE_API_BASE") {
            api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(n) = std::env::var("HAGGLE_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            page_size = n;
        }
        if let Some(p) = std::env::var("HAGGLE_RENDER_PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
        {
            render_port = Some(p);
        }

        if page_size == 0 {
            return Err(ChatError::Config("--page-size must be at least 1".to_string()));
        }
        if !api_base.starts_with("http://") {
            return Err(ChatError::Config(format!(
                "api base must be an http:// URL, got {}",
                api_base
            )));
        }

        let render_api_addr: Option<SocketAddr> = render_port
            .map(|p| format!("127.0.0.1:{}", p).parse())
            .transpose()
            .map_err(|_| ChatError::Config("Invalid render api address".to_string()))?;

        let defaults = Self::default();
        Ok(Self {
            api_base,
            page_size,
            tick_interval: tick_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick_interval),
            send_timeout: send_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.send_timeout),
            render_api_addr,
            ..defaults
        })
    }
}

fn parse_flag<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> Result<T> {
    let raw = args
        .get(i + 1)
        .ok_or_else(|| ChatError::Config(format!("{} requires a value", flag)))?;
    raw.parse::<T>()
        .map_err(|_| ChatError::Config(format!("{} got an invalid value: {}", flag, raw)))
}
