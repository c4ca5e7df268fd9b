// Oasis Gate - Main Entry Point
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// CLI and MCP stdio server. All tool calls route through this gateway.
// Usage:
//   oasis-gate serve                         # Run MCP server (stdio)
//   oasis-gate call <tool> <json>            # One-shot tool invocation
//   oasis-gate tools                         # Print tool descriptors
//   oasis-gate roots                         # Print realized sandbox roots
//   oasis-gate config-export <json_file>     # Write effective config (key redacted)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use oasis_gate::{
    agent::ActionLoop,
    config::GateConfig,
    desktop::{ScreenCapture, XdoInput},
    fs::Sandbox,
    gate::RateLimiter,
    launcher::Launcher,
    mcp::{self, Server},
    reasoning::HttpReasoner,
    tools::{CallContext, Registry},
};
use std::path::PathBuf;
use std::sync::Arc;

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("oasis-gate/config.json")
}

#[derive(Parser)]
#[command(name = "oasis-gate")]
#[command(author = "Joseph Stone")]
#[command(version)]
#[command(about = "Oasis Gate - capability gateway for filesystem, app launch and desktop automation")]
struct Cli {
    /// JSON config file (missing file = defaults)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run MCP server (stdio JSON-RPC)
    Serve,

    /// Invoke one tool and print its result
    Call {
        /// Tool name (fs_read, open_app, do_anything, ...)
        tool: String,

        /// Arguments as JSON string
        #[arg(default_value = "{}")]
        params: String,
    },

    /// Print registered tool descriptors
    Tools,

    /// Print realized sandbox roots
    Roots,

    /// Export effective config to JSON file
    ConfigExport {
        /// Path to write the config JSON to
        json_file: PathBuf,
    },
}

/// Wire components: sandbox, launcher, optional agent, registry, rate gate
fn build_server(config: &GateConfig) -> Result<Server> {
    let sandbox = Arc::new(
        Sandbox::new(&config.root_entries(), config.filesystem.clone())
            .context("Failed to initialize filesystem sandbox")?,
    );
    let launcher = Arc::new(Launcher::new(&config.launcher));

    let agent = match HttpReasoner::from_config(&config.reasoning)? {
        Some(reasoner) => {
            log::info!("Reasoning endpoint: {}", reasoner.url());
            Some(Arc::new(ActionLoop::new(
                Arc::new(ScreenCapture::detect()),
                Arc::new(reasoner),
                Arc::new(XdoInput::new(&config.agent)),
                launcher.clone(),
            )))
        }
        None => {
            log::info!("No reasoning endpoint configured, do_anything disabled");
            None
        }
    };

    let registry = Registry::new(sandbox, launcher, agent, config.agent.max_steps_cap)?;
    Ok(Server::new(registry, RateLimiter::new(&config.rate_limits)))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (stderr; stdout is JSON-RPC)
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();

    let cli = Cli::parse();

    let config = GateConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

    match &cli.command {
        Commands::Serve => {
            let server = build_server(&config)?;
            mcp::run(server).await?;
        }

        Commands::Call { tool, params } => {
            let args: serde_json::Value = serde_json::from_str(params)
                .with_context(|| format!("Invalid params JSON: {}", params))?;
            let server = build_server(&config)?;

            let outcome = server.call(tool, &args, &CallContext::default()).await;
            match outcome {
                Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Err(e) => {
                    println!("{}", serde_json::to_string_pretty(&e.payload())?);
                    std::process::exit(1);
                }
            }
        }

        Commands::Tools => {
            let server = build_server(&config)?;
            let defs = server.registry().definitions();
            println!("{}", serde_json::to_string_pretty(&defs)?);
        }

        Commands::Roots => {
            let sandbox = Sandbox::new(&config.root_entries(), config.filesystem.clone())?;
            for root in sandbox.roots() {
                println!("{}", root.path.display());
            }
        }

        Commands::ConfigExport { json_file } => {
            config.save(json_file)
                .with_context(|| format!("Failed to write config to {:?}", json_file))?;
            println!("Config written to {:?}", json_file);
        }
    }

    Ok(())
}
