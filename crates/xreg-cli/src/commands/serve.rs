//! Serve command: run the HTTP registry

use clap::Args;
use xreg_server::{run_server, ServerConfig};

use crate::{AppContext, Settings};

#[derive(Args)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(short, long)]
    pub listen: Option<String>,
    /// Require this bearer token on every request but /health
    #[arg(long, env = "XREG_AUTH_TOKEN")]
    pub auth_token: Option<String>,
}

pub async fn run(args: &ServeArgs, settings: &Settings, ctx: AppContext) -> anyhow::Result<()> {
    let config = ServerConfig {
        listen: args.listen.clone().unwrap_or_else(|| settings.listen.clone()),
        auth_token: args.auth_token.clone().or_else(|| settings.auth_token.clone()),
    };
    tracing::info!("Starting registry server with {} storage", settings.backend);
    run_server(ctx.service, config).await
}
