use clap::{Parser, Subcommand};
use std::sync::Arc;
use toolhost_mcp::Result;
use toolhost_mcp::config::ServerSettings;
use toolhost_mcp::mcp::server::{McpServer, ServerOptions};
use toolhost_mcp::mcp::tools::ToolRegistry;
use toolhost_mcp::mcp::transport::{serve_http, serve_sse, serve_stdio};

#[derive(Parser)]
#[command(name = "toolhost-mcp")]
#[command(about = "A Model Context Protocol server framework")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server on stdio
    Serve,
    /// Start the MCP server over single-shot HTTP
    ServeHttp,
    /// Start the MCP server over SSE with resumability
    ServeSse,
    /// Show the resolved configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Diagnostics go to stderr; stdout belongs to the stdio transport.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let settings = ServerSettings::load().map_err(anyhow_to_config)?;

    match cli.command {
        Commands::Serve => {
            let server = build_server(&settings)?;
            serve_stdio(server).await?;
        }
        Commands::ServeHttp => {
            let server = build_server(&settings)?;
            serve_http(server, &settings).await?;
        }
        Commands::ServeSse => {
            let server = build_server(&settings)?;
            serve_sse(server, &settings).await?;
        }
        Commands::Config { show } => {
            if show {
                let rendered = toml::to_string_pretty(&settings)
                    .map_err(|e| toolhost_mcp::ServerError::Config(e.to_string()))?;
                println!("{}", rendered);
            } else {
                let path = ServerSettings::config_file_path()
                    .map_err(|e| toolhost_mcp::ServerError::Config(e.to_string()))?;
                println!("config file: {}", path.display());
            }
        }
    }

    Ok(())
}

fn build_server(settings: &ServerSettings) -> Result<Arc<McpServer>> {
    let options = ServerOptions::from_settings(
        settings,
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
    )
    .with_instructions(
        "Use 'tools/list' to see available tools and 'tools/call' to execute them.",
    );

    let registry = Arc::new(ToolRegistry::new());
    let server = McpServer::new(options, settings, registry)?;
    Ok(Arc::new(server))
}

fn anyhow_to_config(error: anyhow::Error) -> toolhost_mcp::ServerError {
    toolhost_mcp::ServerError::Config(error.to_string())
}
