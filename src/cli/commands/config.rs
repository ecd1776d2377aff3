use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::config::config;
use crate::session::file_store::{get_config_dir, SESSION_FILE};

#[derive(Subcommand)]
pub enum ConfigCommands {
    #[command(about = "Show the effective configuration after environment overrides")]
    Show,

    #[command(about = "Show where the session is stored")]
    Path,
}

pub async fn handle(cmd: ConfigCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        ConfigCommands::Show => {
            let config = config();
            match output_format {
                OutputFormat::Json => {
                    let mut value = serde_json::to_value(config)?;
                    value["api_base_url"] = json!(config.api_base_url()?.as_str());
                    println!("{}", serde_json::to_string_pretty(&value)?);
                }
                OutputFormat::Text => {
                    print!("{}", serde_yaml::to_string(config)?);
                    println!("# resolved API base URL: {}", config.api_base_url()?);
                }
            }
            Ok(())
        }
        ConfigCommands::Path => {
            let path = get_config_dir()?.join(SESSION_FILE);
            output_value(&output_format, &json!(path.display().to_string()))
        }
    }
}
