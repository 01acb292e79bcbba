use std::{io::BufReader, sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use parley_access::SenderAuthorizationConfig;
use parley_channel::{DeliveryReceipt, MessageChannel, TelegramChannel, TelegramChannelConfig};
use parley_escalation::{
    inspect_poller_state, start_escalation_poller, EscalationAuditLog, EscalationPoller,
    EscalationRegistry, EscalationService, PollerStateReport, RegistryConfig, ReplyParser,
    POLLER_STATE_FILE_NAME,
};

use crate::{
    cli_args::Cli,
    mcp_server::{serve_mcp_jsonrpc_reader, McpServerState},
};

const MAX_WAIT_POLL_INTERVAL_MS: u64 = 1_000;

fn required_cli_value<'a>(value: Option<&'a str>, flag: &str, env: &str) -> Result<&'a str> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("{flag} (or {env}) is required"))
}

pub(crate) fn build_telegram_channel_config(cli: &Cli) -> Result<TelegramChannelConfig> {
    let bot_token = required_cli_value(
        cli.telegram_bot_token.as_deref(),
        "--telegram-bot-token",
        "TELEGRAM_BOT_TOKEN",
    )?;
    let chat_id = required_cli_value(
        cli.telegram_chat_id.as_deref(),
        "--telegram-chat-id",
        "TELEGRAM_CHAT_ID",
    )?;
    Ok(TelegramChannelConfig {
        api_base: cli.telegram_api_base.clone(),
        bot_token: bot_token.to_string(),
        chat_id: chat_id.to_string(),
        request_timeout_ms: cli.request_timeout_ms,
        long_poll_timeout_seconds: cli.long_poll_timeout_seconds,
        retry_max_attempts: cli.retry_max_attempts,
        retry_base_delay_ms: cli.retry_base_delay_ms,
    })
}

fn build_telegram_channel(cli: &Cli) -> Result<Arc<dyn MessageChannel>> {
    let channel = TelegramChannel::new(build_telegram_channel_config(cli)?)
        .context("failed to configure telegram channel")?;
    Ok(Arc::new(channel))
}

pub(crate) fn build_sender_authorization(cli: &Cli) -> SenderAuthorizationConfig {
    let allowed_destination_id = if cli.telegram_allow_chat_replies {
        cli.telegram_chat_id.as_deref()
    } else {
        None
    };
    SenderAuthorizationConfig::from_csv(&cli.telegram_allowed_user_ids, allowed_destination_id)
}

pub(crate) fn build_registry_config(cli: &Cli) -> RegistryConfig {
    RegistryConfig {
        default_timeout: Duration::from_secs(cli.default_timeout_seconds),
        max_timeout: Duration::from_secs(cli.max_timeout_seconds),
        retention: Duration::from_secs(cli.retention_seconds),
    }
}

/// Starts the reply poller, serves MCP on stdio until EOF, then stops the
/// poller. Registry state lives only for the duration of this call.
pub(crate) async fn execute_serve_command(cli: &Cli) -> Result<()> {
    let channel = build_telegram_channel(cli)?;
    let authorization = build_sender_authorization(cli);
    if !authorization.is_configured() {
        bail!(
            "no reply authorization configured: set TELEGRAM_ALLOWED_USER_IDS or enable --telegram-allow-chat-replies"
        );
    }
    std::fs::create_dir_all(&cli.state_dir)
        .with_context(|| format!("failed to create {}", cli.state_dir.display()))?;

    let registry = Arc::new(EscalationRegistry::new(build_registry_config(cli)));
    let audit = EscalationAuditLog::in_state_dir(&cli.state_dir);
    let service = EscalationService::new(Arc::clone(&registry), Arc::clone(&channel))
        .with_reply_marker(cli.reply_marker)
        .with_audit_log(audit.clone());
    let poller = EscalationPoller::new(
        registry,
        channel,
        ReplyParser::new(cli.reply_marker),
        authorization,
    )
    .with_audit_log(audit)
    .with_state_file(cli.state_dir.join(POLLER_STATE_FILE_NAME))?;

    let poll_interval = Duration::from_millis(cli.poll_interval_ms);
    let mut poller_handle = start_escalation_poller(poller, poll_interval)?;
    let state = McpServerState {
        service: Arc::new(service),
        wait_poll_interval: Duration::from_millis(
            cli.poll_interval_ms.min(MAX_WAIT_POLL_INTERVAL_MS),
        ),
    };

    tracing::info!(
        state_dir = %cli.state_dir.display(),
        poll_interval_ms = cli.poll_interval_ms,
        "parley mcp server listening on stdio"
    );
    let served = tokio::task::spawn_blocking(move || {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        let mut reader = BufReader::new(stdin.lock());
        let mut writer = stdout.lock();
        serve_mcp_jsonrpc_reader(&mut reader, &mut writer, &state)
    })
    .await;
    poller_handle.shutdown().await;

    let report = served.context("mcp server task failed")??;
    tracing::info!(
        processed_frames = report.processed_frames,
        error_frames = report.error_count,
        "parley mcp server stopped"
    );
    Ok(())
}

pub(crate) async fn execute_notify_command(cli: &Cli, message: &str) -> Result<DeliveryReceipt> {
    if message.trim().is_empty() {
        bail!("notify message cannot be empty");
    }
    let channel = build_telegram_channel(cli)?;
    channel
        .send_text(message)
        .await
        .with_context(|| format!("failed to deliver message via {}", channel.name()))
}

pub(crate) fn execute_status_command(cli: &Cli) -> PollerStateReport {
    inspect_poller_state(&cli.state_dir.join(POLLER_STATE_FILE_NAME))
}
