//! Code related to CLI things

use clap::*;

use crate::config::ServerConfig;

#[derive(Parser, Clone)]
pub struct SharedOpts {
    #[clap(short, long, help = "Configuration file")]
    config: Option<String>,
    #[clap(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    Server {
        #[clap(flatten)]
        sopt: SharedOpts,
    },
    ConfigCheck {
        #[clap(flatten)]
        sopt: SharedOpts,
    },
    ShowConfig {
        #[clap(flatten)]
        sopt: SharedOpts,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Server {
            sopt: SharedOpts {
                config: None,
                debug: false,
            },
        }
    }
}

#[derive(Parser)]
#[command(arg_required_else_help(false))]
/// A RADIUS policy server: pool allocation, reply templating, dialog logging.
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn config(&self) -> Option<String> {
        match &self.command {
            Commands::Server { sopt } | Commands::ConfigCheck { sopt } | Commands::ShowConfig { sopt } => {
                sopt.config.clone()
            }
        }
    }

    pub fn debug(&self) -> bool {
        match &self.command {
            Commands::Server { sopt } | Commands::ConfigCheck { sopt } | Commands::ShowConfig { sopt } => {
                sopt.debug
            }
        }
    }
}

/// Prints a default configuration to stdout.
pub fn default_config() {
    let output = match serde_json::to_string_pretty(&ServerConfig::default()) {
        Ok(value) => value,
        Err(_) => {
            eprintln!("couldn't serialize our own default config, this is a bug");
            String::new()
        }
    };
    println!("{output}");
}

/// Loads and validates configuration from `config_path` (or the default
/// search locations), printing the outcome. Returns `Ok(())` only when the
/// config loaded and validated cleanly.
pub fn config_check(config_path: Option<&String>) -> Result<(), crate::error::RadGuardError> {
    let config = ServerConfig::try_from_path(config_path)?;
    println!("Configuration loaded and validated successfully.");
    println!("{config}");
    Ok(())
}

/// Loads configuration (or falls back to defaults) and prints it as JSON.
pub fn show_config(config_path: Option<&String>) {
    match ServerConfig::try_from_path(config_path) {
        Ok(config) => match config.as_json_pretty() {
            Ok(json) => println!("{json}"),
            Err(err) => eprintln!("failed to render config as JSON: {err}"),
        },
        Err(err) => {
            eprintln!("failed to load config, showing defaults instead: {err}");
            default_config();
        }
    }
}
