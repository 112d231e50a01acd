//! xreg CLI - Command line interface for the metadata registry

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use xreg_core::Model;
use xreg_server::RegistryService;
use xreg_storage::{MemoryStorage, StorageBackend};

mod commands;
mod config;
mod output;

use commands::{completions, config as config_cmd, path, registry, serve};
use config::{default_data_dir, Backend, Config};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "xreg")]
#[command(author, version, about = "Metadata registry with versioned resources")]
pub struct Cli {
    /// Data directory
    #[arg(short, long, global = true, env = "XREG_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Storage backend
    #[arg(short, long, value_enum, global = true)]
    pub backend: Option<Backend>,

    /// Registry model file (JSON)
    #[arg(short, long, global = true)]
    pub model: Option<PathBuf>,

    /// Output format: pretty, compact
    #[arg(short, long, default_value = "pretty", global = true)]
    pub format: String,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve(serve::ServeArgs),
    /// Show an entity or collection
    Get(registry::GetArgs),
    /// Create or update through PUT, PATCH or POST semantics
    Write(registry::WriteArgs),
    /// Set one attribute by path
    Set(registry::SetArgs),
    /// Delete a group, resource or version
    Delete(registry::DeleteArgs),
    /// Show the renderings of an attribute path
    Path(path::PathArgs),
    /// Manage configuration
    Config(config_cmd::ConfigArgs),
    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}

/// Effective settings: command-line flags over the config file over defaults
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub backend: Backend,
    pub model_file: Option<PathBuf>,
    pub registry_id: String,
    pub listen: String,
    pub auth_token: Option<String>,
}

impl Settings {
    pub fn resolve(cli: &Cli, config: Config) -> Self {
        Self {
            data_dir: cli
                .data_dir
                .clone()
                .or(config.data_dir)
                .unwrap_or_else(default_data_dir),
            backend: cli.backend.or(config.backend).unwrap_or_default(),
            model_file: cli.model.clone().or(config.model_file),
            registry_id: config
                .registry_id
                .unwrap_or_else(|| xreg_server::service::DEFAULT_REGISTRY_ID.to_string()),
            listen: config
                .listen
                .unwrap_or_else(|| xreg_server::DEFAULT_LISTEN.to_string()),
            auth_token: config.auth_token,
        }
    }

    fn load_model(&self) -> anyhow::Result<Model> {
        let Some(path) = &self.model_file else {
            tracing::warn!("No model file configured; the registry has no groups");
            return Ok(Model::new());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Reading model file {}", path.display()))?;
        Model::from_json(&text).with_context(|| format!("Loading model {}", path.display()))
    }

    fn open_storage(&self) -> anyhow::Result<Arc<dyn StorageBackend>> {
        let Some(file_name) = self.backend.file_name() else {
            return Ok(Arc::new(MemoryStorage::new()));
        };
        std::fs::create_dir_all(&self.data_dir)?;
        let db_path = self.data_dir.join(file_name);
        tracing::debug!("Using {} database at: {:?}", self.backend, db_path);

        let storage: Arc<dyn StorageBackend> = match self.backend {
            #[cfg(feature = "redb")]
            Backend::Redb => Arc::new(xreg_storage::RedbStorage::open(&db_path)?),
            #[cfg(feature = "sqlite")]
            Backend::Sqlite => Arc::new(xreg_storage::SqliteStorage::open(&db_path)?),
            #[allow(unreachable_patterns)]
            other => anyhow::bail!("This build doesn't include the {} backend", other),
        };
        Ok(storage)
    }
}

/// Application context with the registry service
pub struct AppContext {
    pub service: Arc<RegistryService<dyn StorageBackend>>,
    pub format: OutputFormat,
}

impl AppContext {
    pub async fn new(cli: &Cli, settings: &Settings) -> anyhow::Result<Self> {
        let model = settings.load_model()?;
        let storage = settings.open_storage()?;

        let service = RegistryService::new(storage, model)
            .with_registry_id(settings.registry_id.as_str())
            .with_base_url(format!("http://{}", settings.listen));
        service.initialize().await?;

        Ok(Self {
            service: Arc::new(service),
            format: OutputFormat::from(cli.format.as_str()),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    tracing::debug!("Starting xreg CLI");

    // Commands that don't touch the registry
    match &cli.command {
        Commands::Path(args) => return path::run(args),
        Commands::Config(args) => return config_cmd::run(args),
        Commands::Completions(args) => return completions::run(args),
        _ => {}
    }

    let mut settings = Settings::resolve(&cli, Config::load());
    if let Commands::Serve(args) = &cli.command {
        if let Some(listen) = &args.listen {
            settings.listen = listen.clone();
        }
    }
    let ctx = AppContext::new(&cli, &settings).await?;

    match &cli.command {
        Commands::Serve(args) => serve::run(args, &settings, ctx).await?,
        Commands::Get(args) => registry::run_get(args, &ctx).await?,
        Commands::Write(args) => registry::run_write(args, &ctx).await?,
        Commands::Set(args) => registry::run_set(args, &ctx).await?,
        Commands::Delete(args) => registry::run_delete(args, &ctx).await?,
        Commands::Path(_) | Commands::Config(_) | Commands::Completions(_) => {}
    }

    Ok(())
}
