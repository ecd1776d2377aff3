use clap::Subcommand;
use serde_json::json;

use crate::auth::AuthApi;
use crate::cli::utils::*;
use crate::cli::{connect, OutputFormat};

#[derive(Subcommand)]
pub enum TenantCommands {
    #[command(about = "Show current tenant")]
    Current,

    #[command(about = "Switch to tenant")]
    Use {
        #[arg(help = "Tenant ID")]
        tenant: String,
    },

    #[command(about = "Stop sending a tenant header")]
    Clear,
}

pub async fn handle(cmd: TenantCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let auth = AuthApi::new(connect()?);

    match cmd {
        TenantCommands::Current => match auth.status()?.tenant {
            Some(tenant) => match output_format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&json!({ "current_tenant": tenant }))?);
                    Ok(())
                }
                OutputFormat::Text => {
                    println!("Current tenant: {}", tenant);
                    Ok(())
                }
            },
            None => output_no_current_item(&output_format, "tenant"),
        },
        TenantCommands::Use { tenant } => {
            let tenant = tenant.trim().to_string();
            if tenant.is_empty() {
                return Err(anyhow::anyhow!("Tenant ID cannot be empty"));
            }
            auth.switch_tenant(Some(&tenant))?;
            output_success(
                &output_format,
                &format!("Switched to tenant '{}'", tenant),
                Some(json!({ "current_tenant": tenant })),
            )
        }
        TenantCommands::Clear => {
            auth.switch_tenant(None)?;
            output_success(&output_format, "Tenant cleared", Some(json!({ "current_tenant": null })))
        }
    }
}
