use anyhow::Result;
use std::env;
use tablescraper::{server, Config};
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(log_level.parse().unwrap_or(Level::INFO.into())),
        )
        .init();

    std::panic::set_hook(Box::new(|info| {
        eprintln!("panic: {:?}", info);
    }));

    // ─── 2) load config ──────────────────────────────────────────────
    let cfg = Config::load()?;
    info!(
        listen = %cfg.listen,
        storage_root = %cfg.storage_root.display(),
        mode = ?cfg.fetch.mode,
        "startup"
    );

    // ─── 3) serve ────────────────────────────────────────────────────
    server::serve(&cfg).await
}
