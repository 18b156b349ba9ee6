use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use rand::Rng;

use uploadhub_server::config::{self, UploadConfig};
use uploadhub_server::db;
use uploadhub_server::state::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Database path
    #[arg(short, long, env = "DATABASE_PATH", default_value = "uploadhub.db")]
    db_path: PathBuf,

    /// Root directory for temporary and permanent upload files
    #[arg(short, long, env = "STORAGE_ROOT", default_value = "./storage")]
    storage_root: PathBuf,

    /// Largest accepted upload, in bytes
    #[arg(long, env = "MAX_UPLOAD_SIZE", default_value_t = config::DEFAULT_MAX_UPLOAD_SIZE)]
    max_upload_size: u64,

    /// Concurrent project uploads; extra sessions wait in line
    #[arg(long, env = "MAX_CONCURRENT_PROJECTS", default_value_t = config::DEFAULT_MAX_CONCURRENT_PROJECTS)]
    max_concurrent_projects: usize,

    /// Concurrent module uploads; extra sessions are rejected
    #[arg(long, env = "MAX_CONCURRENT_MODULES", default_value_t = config::DEFAULT_MAX_CONCURRENT_MODULES)]
    max_concurrent_modules: usize,

    /// Unfinished module uploads a single user may hold
    #[arg(long, env = "MAX_MODULE_QUEUE_PER_OWNER", default_value_t = config::DEFAULT_MAX_MODULE_QUEUE_PER_OWNER)]
    max_module_queue_per_owner: u64,

    /// Seconds without a chunk before a session expires
    #[arg(long, env = "SESSION_IDLE_SECS", default_value_t = config::DEFAULT_SESSION_IDLE_SECS)]
    session_idle_secs: i64,

    /// Seconds between sweeps for expired sessions
    #[arg(long, env = "REAPER_INTERVAL_SECS", default_value_t = 300)]
    reaper_interval_secs: u64,

    /// JWT verification secret; falls back to jwt_secret.key
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,
}

impl Args {
    fn upload_config(&self) -> UploadConfig {
        let mut config = UploadConfig::new(&self.storage_root);
        config.max_upload_size = self.max_upload_size;
        config.max_concurrent_projects = self.max_concurrent_projects;
        config.max_concurrent_modules = self.max_concurrent_modules;
        config.max_module_queue_per_owner = self.max_module_queue_per_owner;
        config.session_idle_timeout = chrono::Duration::seconds(self.session_idle_secs);
        config
    }
}

/// JWT secret: from args/env, from file, or generate and save to file
fn load_jwt_secret(configured: Option<String>) -> String {
    if let Some(secret) = configured.filter(|s| !s.trim().is_empty()) {
        return secret;
    }
    let secret_path = Path::new("jwt_secret.key");
    if let Ok(saved) = std::fs::read_to_string(secret_path) {
        let saved = saved.trim().to_string();
        if !saved.is_empty() {
            tracing::info!("Loaded JWT secret from jwt_secret.key");
            return saved;
        }
    }
    let secret: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    if let Err(e) = std::fs::write(secret_path, &secret) {
        tracing::warn!("Could not save JWT secret to file: {e}");
    } else {
        tracing::info!("Generated and saved JWT secret to jwt_secret.key");
    }
    secret
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = args.upload_config();
    let jwt_secret = load_jwt_secret(args.jwt_secret.clone());

    tracing::info!("Initializing database at {}", args.db_path.display());
    let db = db::init_database(&args.db_path).await?;

    let state = AppState::new(db, config, jwt_secret).await?;
    state.readmit().await?;

    // Background reaper for expired and abandoned sessions
    let reaper = state.clone();
    let interval = Duration::from_secs(args.reaper_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match reaper.reap().await {
                Ok(0) => {}
                Ok(n) => tracing::info!("Reclaimed {n} stale upload session(s)"),
                Err(e) => tracing::warn!("Upload reaper failed: {e:?}"),
            }
        }
    });

    let app = state.router();
    let addr = format!("0.0.0.0:{}", args.port);
    tracing::info!(
        "Upload server listening on {addr} (storage at {})",
        state.config.storage_root.display()
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
