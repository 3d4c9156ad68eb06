use std::{collections::HashSet, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use client_core::{ChatService, FixedLocation, SessionIdentity, StoreBackend};
use futures::StreamExt;
use shared::{
    domain::{GeoPoint, Identity, MessageId},
    protocol::{LiveUpdate, MessageView},
};
use storage::Storage;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, normalize_database_url, DEFAULT_CONFIG_PATH};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[arg(long)]
    database_url: Option<String>,
    #[arg(long)]
    channel: Option<String>,
    #[arg(long)]
    user_id: Option<String>,
    #[arg(long)]
    email: Option<String>,
    /// Print one JSON document per emission instead of chat lines.
    #[arg(long)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add the configured identity to the user collection.
    Register,
    Send {
        body: String,
    },
    SendLocation {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
    },
    /// Follow the channel until interrupted.
    Tail,
    Whoami,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings(&cli.config);
    if let Some(v) = cli.database_url {
        settings.database_url = normalize_database_url(&v);
    }
    if let Some(v) = cli.channel {
        settings.channel = v;
    }
    if let Some(v) = cli.user_id {
        settings.user_id = Some(v);
    }
    if let Some(v) = cli.email {
        settings.email = Some(v);
    }

    if let Command::Register = cli.command {
        if settings.user_id.is_none() {
            settings.user_id = Some(uuid::Uuid::new_v4().to_string());
        }
    }

    let storage = Storage::new(&settings.database_url).await?;
    let identity = Arc::new(match settings.identity() {
        Some(identity) => SessionIdentity::signed_in(identity),
        None => SessionIdentity::signed_out(),
    });
    let chat = ChatService::new(StoreBackend::new(storage), identity)
        .with_channel(settings.channel_name());
    info!(
        database_url = %settings.database_url,
        channel = %chat.channel(),
        "chat: ready"
    );

    match cli.command {
        Command::Register => {
            let identity = chat
                .current_identity()
                .ok_or_else(|| anyhow!("register needs --email (or CHAT_EMAIL)"))?;
            chat.register(&identity).await?;
            println!("registered user_id={} email={}", identity.id, identity.email);
        }
        Command::Send { body } => {
            let message_id = chat.send_message(&body).await?;
            println!("sent message_id={}", message_id.0);
        }
        Command::SendLocation { lat, lng } => {
            let chat = chat.with_location_provider(Arc::new(FixedLocation(GeoPoint { lat, lng })));
            let message_id = chat.send_location().await?;
            println!("sent message_id={}", message_id.0);
        }
        Command::Tail => tail(&chat, cli.json).await?,
        Command::Whoami => match chat.current_identity() {
            Some(Identity { id, email }) => println!("user_id={id} email={email}"),
            None => println!("signed out"),
        },
    }

    Ok(())
}

async fn tail(chat: &ChatService, json: bool) -> Result<()> {
    let mut live = chat.live_messages();
    let mut printed = HashSet::new();

    loop {
        tokio::select! {
            item = live.next() => match item {
                Some(Ok(messages)) => {
                    if json {
                        println!("{}", serde_json::to_string(&LiveUpdate::Messages { messages })?);
                    } else {
                        print_new_lines(&messages, &mut printed);
                    }
                }
                Some(Err(err)) => {
                    if json {
                        println!("{}", serde_json::to_string(&LiveUpdate::Failed { error: (&err).into() })?);
                    }
                    return Err(err.into());
                }
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                live.cancel();
                return Ok(());
            }
        }
    }
}

fn print_new_lines(messages: &[MessageView], printed: &mut HashSet<MessageId>) {
    for view in messages {
        if !printed.insert(view.id) {
            continue;
        }
        let time = view
            .created_at
            .and_then(|at| at.to_datetime())
            .map(|at| at.with_timezone(&Local).format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "--:--:--".to_string());
        let marker = if view.is_own_message { " (you)" } else { "" };
        println!("[{time}] {}{marker}: {}", view.sender_label, view.body);
    }
}
