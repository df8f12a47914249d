mod batch;
mod config;
mod extract;
mod files;
mod http;
mod image;
mod llm;
mod models;
mod prompt;

use batch::BatchOrchestrator;
use config::GenerationOptions;
use eyre::{Result, WrapErr};
use files::FileManager;
use llm::BackendConfig;
use models::ProductRecord;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "listforge.cli", "run failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let options = GenerationOptions::from_env();
    let backend = BackendConfig::from_env();

    let products = match std::env::args().nth(1) {
        Some(path) => load_products(&path)?,
        None => {
            info!(
                target = "listforge.cli",
                "no input file given, using built-in sample products"
            );
            models::sample_products()
        }
    };

    let orchestrator = BatchOrchestrator::new(backend, options)
        .with_raw_capture(save_raw_responses_from_env());

    // Ctrl-C flips the cooperative flag; the in-flight item still settles
    // before the batch stops.
    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(
                target = "listforge.cli",
                "interrupt received, finishing current item then stopping"
            );
            cancel.cancel();
        }
    });

    let report = orchestrator.run(&products).await?;

    let manager = FileManager::create(output_dir_from_env())?;
    for listing in &report.results {
        manager.save_listing(listing)?;
    }
    for (product_id, raw) in &report.raw_responses {
        manager.save_raw_response(product_id, raw)?;
    }
    let summary_path = manager.save_report(&report)?;

    info!(
        target = "listforge.cli",
        run_id = %report.run_id,
        succeeded = report.stats.succeeded,
        failed = report.stats.failed,
        success_rate = report.stats.success_rate,
        total_tokens = report.stats.tokens.as_ref().map(|t| t.total).unwrap_or(0),
        summary = %summary_path.display(),
        "batch complete"
    );
    if let Some(advice) = report.quota_advice() {
        warn!(target = "listforge.cli", "{advice}");
    }

    Ok(())
}

fn load_products(path: &str) -> Result<Vec<ProductRecord>> {
    let body = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("cannot read products file {path}"))?;
    let products: Vec<ProductRecord> =
        serde_json::from_str(&body).wrap_err_with(|| format!("invalid products file {path}"))?;
    Ok(products)
}

fn output_dir_from_env() -> String {
    std::env::var("OUTPUT_DIR")
        .ok()
        .filter(|dir| !dir.trim().is_empty())
        .unwrap_or_else(|| "generated_listings".to_string())
}

fn save_raw_responses_from_env() -> bool {
    match std::env::var("SAVE_RAW_RESPONSES") {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
