use clap::{Parser, Subcommand};
use std::sync::Arc;

use strix_bot::application::messaging::ActivityTracker;
use strix_bot::infrastructure::adapters::console::{console_pair, run_console, spawn_outbound_printer};
use strix_bot::infrastructure::config::Config;
use strix_bot::infrastructure::database::Storage;
use strix_bot::plugins::{ModuleLoader, PluginManager, RuntimeContext};

#[derive(Parser)]
#[command(name = "strix-bot")]
#[command(about = "A stream chat bot with a hot-reloadable plugin runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot
    Run,
    /// Show version
    Version,
    /// Generate default config
    InitConfig,
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => run_bot(cli.config),
        Commands::Version => {
            println!("strix-bot v{}", env!("CARGO_PKG_VERSION"));
        }
        Commands::InitConfig => init_config(cli.config),
    }
}

fn run_bot(config_path: String) {
    let config = if std::path::Path::new(&config_path).exists() {
        Config::load(&config_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config: {}, using defaults", e);
            Config::load_env()
        })
    } else {
        Config::load_env()
    };

    tracing::info!("Starting strix-bot: {}", config.bot.name);

    let storage = match Storage::open(&config.storage.path) {
        Ok(storage) => {
            tracing::info!("Database initialized");
            storage
        }
        Err(e) => {
            tracing::error!("Failed to initialize database: {}", e);
            return;
        }
    };

    let plugin_db = match Storage::open_in_memory() {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("Failed to initialize plugin storage engine: {}", e);
            return;
        }
    };

    // All host and plugin logic runs on this one cooperative scheduler; the
    // liveness monitor's thread is the only other parallelism.
    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to build runtime: {}", e);
            return;
        }
    };

    rt.block_on(async {
        let (host, outbound, outbound_rx) =
            console_pair(config.bot.prefixes.clone(), storage.clone());
        spawn_outbound_printer(outbound_rx);

        let ctx = Arc::new(RuntimeContext {
            storage,
            plugin_db,
            host,
            outbound,
            handle: tokio::runtime::Handle::current(),
            activity: ActivityTracker::default(),
        });

        let loader = Arc::new(ModuleLoader::new());
        let mut manager = PluginManager::new(ctx, loader, &config);

        if config.plugins.auto_load {
            if let Err(e) = manager.discover().await {
                tracing::warn!("Plugin discovery failed: {}", e);
            }
            for (path, error) in manager.load_errors() {
                tracing::warn!("Failed to load plugin from {}: {}", path.display(), error);
            }
        }
        tracing::info!("Plugin runtime initialized with {} plugins", manager.len());

        run_console(&mut manager).await;

        manager.unload_all().await;
    });
}

fn init_config(config_path: String) {
    let config = Config::default();
    match config.save(&config_path) {
        Ok(()) => println!("Wrote default config to {}", config_path),
        Err(e) => eprintln!("Failed to write config: {}", e),
    }
}
