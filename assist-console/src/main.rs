mod commands;
mod render;

use anyhow::{bail, Context, Result};
use assist_common::config::{default_config_path, is_valid_token, DEFAULT_NICKNAME};
use assist_common::{
    event_channel, ClientConfig, ConnectionManager, Credentials, NicknameCache, Session,
    WsTransport,
};
use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::commands::Flow;

#[derive(Parser)]
#[command(name = "assist-console")]
#[command(about = "Terminal console for answering agent questions and task reports")]
struct Args {
    /// Config file (defaults to ~/.agent-assist/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// WebSocket endpoint, e.g. ws://127.0.0.1:8080/ws
    #[arg(long)]
    server_url: Option<String>,

    /// Bearer token presented at login
    #[arg(long)]
    token: Option<String>,

    /// Display name shown to agents and other operators
    #[arg(long)]
    nickname: Option<String>,

    /// Reconnect attempts before giving up
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Delay before the first reconnect, doubled on every retry
    #[arg(long)]
    base_delay_ms: Option<u64>,
}

impl Args {
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(server_url) = &self.server_url {
            config.server_url = server_url.clone();
        }
        if let Some(token) = &self.token {
            config.token = Some(token.clone());
        }
        if let Some(nickname) = &self.nickname {
            config.nickname = Some(nickname.clone());
        }
        if let Some(max_attempts) = self.max_attempts {
            config.reconnect.max_attempts = max_attempts;
        }
        if let Some(base_delay_ms) = self.base_delay_ms {
            config.reconnect.base_delay_ms = base_delay_ms;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut config = ClientConfig::load_or_default(&config_path)
        .await
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    args.apply(&mut config);

    let Some(token) = config.token.clone() else {
        bail!("no token configured; pass --token or set token in {}", config_path.display());
    };
    if !is_valid_token(&token) {
        bail!("token must be non-empty without surrounding whitespace");
    }

    let cache = NicknameCache::new_default();
    let nickname = match config.nickname.clone() {
        Some(nickname) => nickname,
        None => cache
            .load()
            .await
            .unwrap_or_else(|| DEFAULT_NICKNAME.to_string()),
    };
    if let Err(e) = cache.save(&nickname).await {
        warn!("Failed to cache nickname: {}", e);
    }

    let (events, mut event_rx) = event_channel();
    let link = ConnectionManager::new(
        WsTransport::new(events.clone()),
        events,
        config.reconnect.policy(),
    );
    let (mut session, mut notices) = Session::new(link);
    let credentials = Credentials::new(token, nickname);

    info!("Connecting to {} as {}", config.server_url, credentials.display_name);
    drop(session.connect(&config.server_url, credentials.clone()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => session.handle_event(event),
            Some(notice) = notices.recv() => render::print_notice(&notice),
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match commands::parse(&line) {
                    Ok(Some(command)) => {
                        let flow = commands::execute(
                            &mut session,
                            command,
                            &config.server_url,
                            &credentials,
                        );
                        if flow == Flow::Quit {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => eprintln!("{}", e),
                }
            }
        }
    }

    session.disconnect();
    info!("Console closed");
    Ok(())
}
