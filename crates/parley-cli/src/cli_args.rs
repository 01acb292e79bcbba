use std::path::PathBuf;

use clap::{Parser, Subcommand};

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_reply_marker(value: &str) -> Result<char, String> {
    let mut chars = value.trim().chars();
    match (chars.next(), chars.next()) {
        (Some(marker), None) if !marker.is_alphanumeric() => Ok(marker),
        (Some(_), None) => {
            Err("reply marker must be a punctuation or symbol character".to_string())
        }
        _ => Err("reply marker must be exactly one character".to_string()),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "parley",
    about = "Human-in-the-loop escalation bridge: raise questions to a chat channel and collect correlated replies",
    version
)]
pub struct Cli {
    #[arg(
        long = "telegram-bot-token",
        env = "TELEGRAM_BOT_TOKEN",
        hide_env_values = true,
        help = "Telegram bot token used for sendMessage/getUpdates"
    )]
    pub telegram_bot_token: Option<String>,

    #[arg(
        long = "telegram-chat-id",
        env = "TELEGRAM_CHAT_ID",
        allow_hyphen_values = true,
        help = "Chat that receives escalation questions (group ids are negative)"
    )]
    pub telegram_chat_id: Option<String>,

    #[arg(
        long = "telegram-allow-chat-replies",
        env = "PARLEY_TELEGRAM_ALLOW_CHAT_REPLIES",
        default_value_t = false,
        help = "Authorize any sender writing in --telegram-chat-id; ignored when --telegram-allowed-user-ids is set"
    )]
    pub telegram_allow_chat_replies: bool,

    #[arg(
        long = "telegram-allowed-user-ids",
        env = "TELEGRAM_ALLOWED_USER_IDS",
        default_value = "",
        help = "Comma-separated Telegram user ids allowed to answer escalations from any chat"
    )]
    pub telegram_allowed_user_ids: String,

    #[arg(
        long = "telegram-api-base",
        env = "PARLEY_TELEGRAM_API_BASE",
        default_value = "https://api.telegram.org",
        help = "Base URL for the Telegram Bot API"
    )]
    pub telegram_api_base: String,

    #[arg(
        long = "default-timeout-seconds",
        env = "PARLEY_DEFAULT_TIMEOUT_SECONDS",
        default_value_t = 1_800,
        value_parser = parse_positive_u64,
        help = "Escalation timeout applied when the caller does not supply one"
    )]
    pub default_timeout_seconds: u64,

    #[arg(
        long = "max-timeout-seconds",
        env = "PARLEY_MAX_TIMEOUT_SECONDS",
        default_value_t = 86_400,
        value_parser = parse_positive_u64,
        help = "Upper bound for caller-supplied escalation timeouts"
    )]
    pub max_timeout_seconds: u64,

    #[arg(
        long = "poll-interval-ms",
        env = "PARLEY_POLL_INTERVAL_MS",
        default_value_t = 2_000,
        value_parser = parse_positive_u64,
        help = "Interval between reply poll cycles"
    )]
    pub poll_interval_ms: u64,

    #[arg(
        long = "retention-seconds",
        env = "PARLEY_RETENTION_SECONDS",
        default_value_t = 3_600,
        value_parser = parse_positive_u64,
        help = "How long answered/expired escalations stay queryable before eviction"
    )]
    pub retention_seconds: u64,

    #[arg(
        long = "reply-marker",
        env = "PARLEY_REPLY_MARKER",
        default_value = "#",
        value_parser = parse_reply_marker,
        help = "Character that prefixes the escalation id in replies"
    )]
    pub reply_marker: char,

    #[arg(
        long = "state-dir",
        env = "PARLEY_STATE_DIR",
        default_value = ".parley",
        help = "Directory for the poller state file and escalation audit log"
    )]
    pub state_dir: PathBuf,

    #[arg(
        long = "request-timeout-ms",
        env = "PARLEY_REQUEST_TIMEOUT_MS",
        default_value_t = 15_000,
        value_parser = parse_positive_u64,
        help = "HTTP timeout for Telegram API requests"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "retry-max-attempts",
        env = "PARLEY_RETRY_MAX_ATTEMPTS",
        default_value_t = 3,
        value_parser = parse_positive_usize,
        help = "Attempts per Telegram API call for retryable failures"
    )]
    pub retry_max_attempts: usize,

    #[arg(
        long = "retry-base-delay-ms",
        env = "PARLEY_RETRY_BASE_DELAY_MS",
        default_value_t = 500,
        value_parser = parse_positive_u64,
        help = "Base delay for linear retry backoff"
    )]
    pub retry_base_delay_ms: u64,

    #[arg(
        long = "long-poll-timeout-seconds",
        env = "PARLEY_LONG_POLL_TIMEOUT_SECONDS",
        default_value_t = 0,
        help = "getUpdates long-poll timeout; 0 uses short polling"
    )]
    pub long_poll_timeout_seconds: u64,

    #[command(subcommand)]
    pub command: Option<ParleyCommand>,
}

impl Cli {
    pub fn command(&self) -> ParleyCommand {
        self.command.clone().unwrap_or(ParleyCommand::Serve)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum ParleyCommand {
    /// Run the reply poller and serve MCP JSON-RPC on stdio (default).
    Serve,
    /// Send one plain message through the configured channel.
    Notify {
        /// Message text to deliver.
        message: String,
    },
    /// Print the poller state report as JSON.
    Status,
}
