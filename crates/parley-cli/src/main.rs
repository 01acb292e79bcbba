mod bootstrap_helpers;
mod cli_args;
mod escalation_runtime;
mod mcp_server;

use anyhow::{Context, Result};
use clap::Parser;

use crate::{
    bootstrap_helpers::init_tracing,
    cli_args::{Cli, ParleyCommand},
    escalation_runtime::{execute_notify_command, execute_serve_command, execute_status_command},
};

async fn run_cli(cli: Cli) -> Result<()> {
    match cli.command() {
        ParleyCommand::Serve => execute_serve_command(&cli).await,
        ParleyCommand::Notify { message } => {
            let receipt = execute_notify_command(&cli, &message).await?;
            let payload =
                serde_json::to_string_pretty(&receipt).context("failed to render receipt")?;
            println!("{payload}");
            Ok(())
        }
        ParleyCommand::Status => {
            let report = execute_status_command(&cli);
            let payload =
                serde_json::to_string_pretty(&report).context("failed to render status report")?;
            println!("{payload}");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run_cli(cli).await
}
