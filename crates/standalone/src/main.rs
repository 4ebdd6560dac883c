//! The executable. CLI parsing, layered config, logging bootstrap, and wiring
//! every external collaborator (storage, auth, mutators) into one `AuthFront`
//! + axum router behind a clap-subcommand-then-`async_main` shape, scaled down
//! to this fabric's single-process "serve" command.

mod config;
mod rooms;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use roomsync_auth::{AuthHandler, JwtAuthHandler};
use roomsync_client_api::AppState;
use roomsync_core::metrics::Metrics;
use roomsync_core::mutator::MutatorRegistry;
use roomsync_core::storage::SledStorage;
use roomsync_core::{AuthFront, AuthFrontConfig};
use roomsync_lib::SystemClock;

use config::Config;
use rooms::StandaloneRoomLookup;

#[derive(Parser, Debug)]
#[command(author, version, about = "Real-time room-sharded synchronization fabric")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run a single fabric instance: AuthFront + every room it hosts.
    Serve {
        /// Path to a TOML config file. CLI flags and `REFLECT_*` env vars still
        /// override whatever it sets (see `config::Config::load`).
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        listen_addr: Option<String>,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Print the running version string.
    Version,
}

fn main() {
    let orig_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(1);
    }));

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build the tokio runtime")
        .block_on(async_main())
}

async fn async_main() {
    let args = Args::parse();
    let result = match args.command {
        Command::Serve { config, listen_addr, data_dir } => serve(config, listen_addr, data_dir).await,
        Command::Version => {
            println!(env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "fatal error");
        eprintln!("error: {err:#}");
        process::exit(1);
    }
}

fn configure_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();
}

async fn serve(config_path: Option<PathBuf>, listen_addr_override: Option<String>, data_dir_override: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = Config::load(config_path.as_deref())?;
    if let Some(addr) = listen_addr_override {
        config.listen_addr = addr.parse()?;
    }
    if let Some(data_dir) = data_dir_override {
        config.data_dir = data_dir;
    }

    configure_tracing();
    tracing::info!(listen_addr = %config.listen_addr, data_dir = %config.data_dir.display(), "starting roomsync-standalone");

    std::fs::create_dir_all(&config.data_dir)?;
    let auth_front_dir = SledStorage::open(config.data_dir.join("auth-front"), "directory")?;
    let rooms_db = sled::Config::default()
        .path(config.data_dir.join("rooms"))
        .flush_every_ms(Some(50))
        .mode(sled::Mode::HighThroughput)
        .open()?;

    let clock = Arc::new(SystemClock);
    let mutators = MutatorRegistry::with_builtins();
    let metrics = Arc::new(Metrics::new());
    let room_lookup = Arc::new(StandaloneRoomLookup::new(rooms_db, config.room_config(), mutators, clock.clone(), metrics.clone()));
    let auth_handler = build_auth_handler(&config)?;

    let auth_front = Arc::new(AuthFront::new(
        Arc::new(auth_front_dir),
        room_lookup.clone(),
        auth_handler,
        clock,
        AuthFrontConfig {
            revalidation_interval: config.revalidation_interval(),
        },
        metrics.clone(),
    ));

    let revalidation = tokio::spawn(rooms::run_revalidation_loop(auth_front.clone(), auth_front.config().revalidation_interval));

    let state = AppState {
        auth_front,
        rooms: room_lookup,
        metrics,
        admin_api_key: Arc::from(config.admin_api_key.as_str()),
    };
    let app = roomsync_client_api::router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    revalidation.abort();
    Ok(())
}

/// Loads the ES256 public key configured for JWT verification. `AuthHandler`
/// is treated as an opaque collaborator everywhere else; this is just the
/// default implementation the binary boots with when no embedder substitutes
/// their own.
fn build_auth_handler(config: &Config) -> anyhow::Result<Arc<dyn AuthHandler>> {
    let key_path = config
        .jwt_public_key_path
        .as_ref()
        .expect("Config::validate requires jwt_public_key_path to be set");
    let pem = std::fs::read(key_path)?;
    let mut handler = JwtAuthHandler::from_ec_pem(&pem)?;
    if let Some(issuer) = &config.jwt_issuer {
        handler = handler.with_issuer(issuer.clone());
    }
    Ok(Arc::new(handler))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
