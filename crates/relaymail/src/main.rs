//! `relaymail` - send mail through Microsoft 365 with client credentials.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use relaymail::Settings;
use relaymail_smtp::{Mailbox, OutgoingMessage};
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "relaymail")]
#[command(version, about = "Send mail through Microsoft 365 using OAuth2 client credentials")]
struct Cli {
    /// Settings file (defaults to <config dir>/relaymail/settings.json)
    #[arg(long, global = true, env = "RELAYMAIL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch an access token and report its lifetime
    Token {
        /// Print the token itself
        #[arg(long)]
        show: bool,
    },
    /// Send a plain-text message
    Send(SendArgs),
}

#[derive(Args)]
struct SendArgs {
    /// Sender, `addr` or `Name <addr>`
    #[arg(long)]
    from: Mailbox,
    /// Recipient (repeatable)
    #[arg(long, required = true)]
    to: Vec<Mailbox>,
    /// Carbon-copy recipient (repeatable)
    #[arg(long)]
    cc: Vec<Mailbox>,
    /// Subject line
    #[arg(long, default_value = "")]
    subject: String,
    /// Body text; read from stdin when omitted
    #[arg(long)]
    body: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relaymail=info,relaymail_oauth=info,relaymail_smtp=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let path = cli.config.unwrap_or_else(Settings::default_path);
    let settings = Settings::load(&path)
        .await
        .with_context(|| format!("loading settings from {}", path.display()))?;

    match cli.command {
        Commands::Token { show } => token(&settings, show).await,
        Commands::Send(args) => send(&settings, args).await,
    }
}

async fn token(settings: &Settings, show: bool) -> anyhow::Result<()> {
    let provider = settings.token_provider()?;
    let fetched = provider.fetch_token().await?;

    info!(tenant = provider.credentials().tenant(), "Access token acquired");
    println!("Access token valid for {} seconds", fetched.expires_in);
    if show {
        println!("{}", fetched.access_token);
    }
    Ok(())
}

async fn send(settings: &Settings, args: SendArgs) -> anyhow::Result<()> {
    let body = match args.body {
        Some(body) => body,
        None => {
            let mut body = String::new();
            tokio::io::stdin()
                .read_to_string(&mut body)
                .await
                .context("reading body from stdin")?;
            body
        }
    };

    let mut message = OutgoingMessage::new(args.from, args.subject, body);
    message.to = args.to;
    message.cc = args.cc;

    let mailer = settings.mailer_service()?.get_mailer(None)?;
    mailer.send(&message).await?;

    info!(transport = %mailer.transport().name(), "Message sent");
    Ok(())
}
