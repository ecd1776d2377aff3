use std::io::{BufRead, Write};

use clap::Subcommand;
use serde_json::json;

use crate::auth::{AuthApi, Credentials};
use crate::cli::utils::*;
use crate::cli::{connect, OutputFormat};

#[derive(Subcommand)]
pub enum AuthCommands {
    #[command(about = "Login to the admin API")]
    Login {
        #[arg(help = "Username")]
        username: String,
        #[arg(long, help = "Password (will prompt if not provided)")]
        password: Option<String>,
        #[arg(long, help = "Tenant to select after login")]
        tenant: Option<String>,
    },

    #[command(about = "Logout and clear the stored session")]
    Logout,

    #[command(about = "Show current authentication status")]
    Status,

    #[command(about = "Refresh authentication token")]
    Refresh,

    #[command(about = "Ask the server whether the current token is valid")]
    TokenStatus,
}

fn prompt_password() -> anyhow::Result<String> {
    eprint!("Password: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

pub async fn handle(cmd: AuthCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let auth = AuthApi::new(connect()?);

    match cmd {
        AuthCommands::Login { username, password, tenant } => {
            let password = match password {
                Some(password) => password,
                None => prompt_password()?,
            };
            let credentials = Credentials { username, password, tenant };
            let tokens = auth.login(&credentials).await?;

            output_success(
                &output_format,
                &format!("Logged in as '{}'", credentials.username),
                Some(json!({
                    "username": credentials.username,
                    "tenant": credentials.tenant,
                    "expires_at": tokens.expires_at,
                })),
            )
        }
        AuthCommands::Logout => {
            auth.logout().await?;
            output_success(&output_format, "Logged out", None)
        }
        AuthCommands::Status => {
            let status = auth.status()?;
            match output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
                OutputFormat::Text => {
                    if !status.authenticated {
                        println!("Not logged in");
                        return Ok(());
                    }
                    println!("User:    {}", status.user.as_deref().unwrap_or("(unknown)"));
                    println!("Tenant:  {}", status.tenant.as_deref().unwrap_or("(none)"));
                    if let Some(expires_at) = status.expires_at {
                        let marker = if status.expired { " (expired)" } else { "" };
                        println!("Expires: {}{}", expires_at.format("%Y-%m-%d %H:%M:%S UTC"), marker);
                    }
                }
            }
            Ok(())
        }
        AuthCommands::Refresh => {
            let tokens = auth.refresh().await?;
            output_success(
                &output_format,
                "Token refreshed",
                Some(json!({ "expires_at": tokens.expires_at })),
            )
        }
        AuthCommands::TokenStatus => {
            let status = auth.token_status().await?;
            output_value(&output_format, &status)
        }
    }
}
