mod cli;
mod config;
mod db;
mod middleware;
mod routes;
mod services;
mod state;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    //  Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,llama_dashboard=debug")),
        )
        .init();

    let args = cli::Cli::parse();

    match args.command {
        Some(cli::Commands::Models(m)) => cli::models::execute(m).await,
        Some(cli::Commands::Config(c)) => cli::config_cmd::execute(c).await,
        Some(cli::Commands::Generate(g)) => cli::generate::execute(g).await,
        // Default: start HTTP server
        Some(cli::Commands::Serve(serve_args)) => {
            cli::serve::execute(args.global, serve_args).await
        }
        None => cli::serve::execute(args.global, cli::ServeArgs { max_models: 0 }).await,
    }
}
