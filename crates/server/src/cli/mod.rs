pub mod config_cmd;
pub mod generate;
pub mod models;
pub mod serve;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "llama-dashboard",
    version,
    about = "Local LLM inference gateway powered by llama.cpp"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, clap::Args, Clone)]
pub struct GlobalArgs {
    /// Listen address.
    #[arg(long, default_value = "127.0.0.1", env = "LLAMA_HOST")]
    pub host: String,

    /// Listen port.
    #[arg(short, long, default_value_t = 8080, env = "LLAMA_PORT")]
    pub port: u16,

    /// Model search directories (can be repeated).
    #[arg(long = "models-dir", env = "LLAMA_MODELS_DIR")]
    pub models_dirs: Vec<std::path::PathBuf>,

    /// Optional API key for bearer-token auth.
    #[arg(long, env = "LLAMA_API_KEY")]
    pub api_key: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP gateway (default).
    Serve(ServeArgs),

    /// Manage discovered models.
    Models(ModelsArgs),

    /// View / edit configuration.
    Config(ConfigArgs),

    /// Regenerate the runtime launch document from configured directories.
    Generate(GenerateArgs),
}

//  Subcommand argument structs

#[derive(Debug, clap::Args, Clone)]
pub struct ServeArgs {
    /// Maximum number of concurrently Ready processes across all groups
    /// (0 = unlimited, enforced only by the memory gate).
    #[arg(long = "models-max", default_value_t = 0, env = "LLAMA_MODELS_MAX")]
    pub max_models: usize,
}

#[derive(Debug, clap::Args)]
pub struct ModelsArgs {
    #[command(subcommand)]
    pub action: ModelsAction,
}

#[derive(Debug, Subcommand)]
pub enum ModelsAction {
    /// List available models.
    List {
        /// Directory to scan (overrides config).
        #[arg(long)]
        dir: Option<std::path::PathBuf>,
    },
    /// Show detailed info about a GGUF file.
    Info {
        /// Path to the GGUF file.
        path: std::path::PathBuf,
    },
}

#[derive(Debug, clap::Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Display the current configuration.
    Show,
    /// Set a configuration value.
    Set { key: String, value: String },
}

#[derive(Debug, clap::Args, Clone)]
pub struct GenerateArgs {
    /// Directory to scan (can be repeated); defaults to the configured
    /// model directories.
    #[arg(long = "dir")]
    pub dirs: Vec<std::path::PathBuf>,

    /// Write the result to this path instead of the default runtime config.
    #[arg(long)]
    pub output: Option<std::path::PathBuf>,
}
