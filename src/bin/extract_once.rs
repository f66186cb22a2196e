use anyhow::Result;
use std::{env, process::ExitCode, time::Instant};
use tablescraper::{Config, Pipeline, PipelineError};
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

fn print_usage_and_exit(program: &str) -> ! {
    eprintln!("Usage: {} <page-url> [name-prefix]", program);
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(log_level.parse().unwrap_or(Level::INFO.into())),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args();
    let prog = args.next().unwrap_or_else(|| "extract_once".into());
    let input = match args.next() {
        Some(u) => u,
        None => print_usage_and_exit(&prog),
    };
    let hint = args.next();

    let cfg = Config::load()?;
    let pipeline = Pipeline::from_config(&cfg)?;

    let start = Instant::now();
    let res = match Pipeline::parse_url(&input) {
        Ok(url) => pipeline.run(&url, hint.as_deref()).await,
        Err(e) => Err(e),
    };
    let elapsed = start.elapsed().as_secs_f64();

    match res {
        Ok(artifact) => {
            println!("{}", artifact.path.display());
            eprintln!(
                "✅ {} table(s) → {} in {:.3}s",
                artifact.tables, artifact.name, elapsed
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(PipelineError::NoTables(url)) => {
            eprintln!("no tables found at {url}");
            Ok(ExitCode::from(2))
        }
        Err(e) => {
            eprintln!("❌ Error: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}
