use std::env;

use medgate_server::config::loader::{DEFAULT_CONFIG_FILE, load_config};
use medgate_server::{ServerBuilder, finish_tracing, init_tracing};

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From MEDGATE_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (medgate.toml)
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (MEDGATE_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() {
    // A missing .env is fine; it only matters for local development
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    let (config_path, source) = resolve_config_path();

    let cfg = match load_config(Some(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    let tracing_guard = match init_tracing(&cfg.logging, &cfg.otel) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize tracing: {e}");
            std::process::exit(2);
        }
    };

    tracing::info!(
        path = %config_path,
        source = %source,
        storage = ?cfg.storage.backend,
        upstream = %cfg.upstream.base_url,
        "Configuration loaded"
    );

    spawn_log_level_reloader(config_path.clone());

    let server = match ServerBuilder::new().with_config(cfg).build().await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start server");
            finish_tracing(tracing_guard);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        tracing::error!(error = %e, "Server error");
        finish_tracing(tracing_guard);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
    finish_tracing(tracing_guard);
}

/// Re-reads the configuration on SIGHUP and applies `logging.level`.
/// Other settings only take effect on restart.
#[cfg(unix)]
fn spawn_log_level_reloader(config_path: String) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(sig) => sig,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install SIGHUP handler");
            return;
        }
    };
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            match load_config(Some(&config_path)) {
                Ok(cfg) => {
                    medgate_server::observability::apply_logging_level(&cfg.logging.level);
                    tracing::info!(level = %cfg.logging.level, "Logging level reloaded");
                }
                Err(e) => tracing::warn!(error = %e, "Ignoring SIGHUP, configuration is invalid"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_log_level_reloader(_config_path: String) {}

fn resolve_config_path() -> (String, ConfigSource) {
    // 1. Check CLI: --config <path>
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config"
            && let Some(path) = args.next()
        {
            return (path, ConfigSource::CliArgument);
        }
    }

    // 2. Check environment variable
    if let Ok(path) = env::var("MEDGATE_CONFIG")
        && !path.is_empty()
    {
        return (path, ConfigSource::EnvironmentVariable);
    }

    // 3. Default to medgate.toml
    (DEFAULT_CONFIG_FILE.to_string(), ConfigSource::Default)
}
