pub mod commands;
pub mod utils;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::client::ApiClient;
use crate::config::config;
use crate::error::ApiError;
use crate::events::EventBus;
use crate::session::{FileTokenStore, TokenStore};

#[derive(Parser)]
#[command(name = "console")]
#[command(about = "Console CLI - session and request client for the tenant admin API")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Authentication and token management")]
    Auth {
        #[command(subcommand)]
        cmd: commands::auth::AuthCommands,
    },

    #[command(about = "Select the tenant sent with every request")]
    Tenant {
        #[command(subcommand)]
        cmd: commands::tenant::TenantCommands,
    },

    #[command(about = "Send a raw request through the session client")]
    Request(commands::request::RequestArgs),

    #[command(about = "List, show, create, update and delete admin resources")]
    Resource {
        #[command(subcommand)]
        cmd: commands::resource::ResourceCommands,
    },

    #[command(about = "Inspect the effective client configuration")]
    Config {
        #[command(subcommand)]
        cmd: commands::config::ConfigCommands,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

/// Client over the on-disk session, logging every failure event it raises
pub fn connect() -> anyhow::Result<ApiClient> {
    let store: Arc<dyn TokenStore> = Arc::new(FileTokenStore::open_default()?);
    let client = ApiClient::builder(config().clone())
        .store(store)
        .events(EventBus::global().clone())
        .build()?;

    let _subscription = client.events().on_any(|event| {
        let failure = event.failure();
        warn!(
            event = event.kind().name(),
            method = failure.method.as_str(),
            url = %failure.url,
            "{}",
            failure.error
        );
    });

    // Long-running requests (tree pulls, bulk listings) keep a fresh token
    if client.config().session.auto_refresh {
        let _auto_refresh = client.refresher().spawn_auto_refresh();
    }

    Ok(client)
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    let result = match cli.command {
        Commands::Auth { cmd } => commands::auth::handle(cmd, output_format.clone()).await,
        Commands::Tenant { cmd } => commands::tenant::handle(cmd, output_format.clone()).await,
        Commands::Request(args) => commands::request::handle(args, output_format.clone()).await,
        Commands::Resource { cmd } => commands::resource::handle(cmd, output_format.clone()).await,
        Commands::Config { cmd } => commands::config::handle(cmd, output_format.clone()).await,
    };

    // JSON callers get the structured error on stdout as well
    if let (Err(e), OutputFormat::Json) = (&result, &output_format) {
        if let Some(api_error) = e.downcast_ref::<ApiError>() {
            utils::output_error(&output_format, api_error)?;
        }
    }

    result
}
