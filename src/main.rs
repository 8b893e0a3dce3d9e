use anyhow::Context as _;
use resilience::{config::ResilienceConfig, init_tracing, ExecuteError, ResilienceContext};
use serde_json::json;
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::info;

const DEFAULT_CONFIG: &str = "config/resilience.yaml";

/// Simulated downstream call that is unavailable for part of the run
async fn fetch_document(attempt: u32, outage: std::ops::Range<u32>) -> Result<String, String> {
    tokio::time::sleep(Duration::from_millis(5)).await;
    if outage.contains(&attempt) {
        Err(format!("document store unavailable (attempt {})", attempt))
    } else {
        Ok(format!("document-{}", attempt))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Get config file path from command line or use default
    let config = match env::args().nth(1) {
        Some(path) => ResilienceConfig::from_file(&path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None if Path::new(DEFAULT_CONFIG).exists() => ResilienceConfig::from_file(DEFAULT_CONFIG)
            .with_context(|| format!("Failed to load configuration from {}", DEFAULT_CONFIG))?,
        None => ResilienceConfig::default(),
    };

    init_tracing(&config.tracing);

    let ctx = ResilienceContext::from_config(config).await?;
    let breaker = ctx.breaker("documents");

    let (mut served, mut rejected, mut failed) = (0u32, 0u32, 0u32);
    for attempt in 0..40 {
        match breaker.execute(|| fetch_document(attempt, 8..20)).await {
            Ok(_) => served += 1,
            Err(ExecuteError::Operation(e)) => {
                failed += 1;
                ctx.logger()
                    .error("Document fetch failed", Some(&json!({ "error": e })));
            }
            Err(e) if e.is_rejected() => rejected += 1,
            Err(e) => {
                failed += 1;
                ctx.logger().error(
                    "Document fetch aborted",
                    Some(&json!({ "error": e.to_string() })),
                );
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    info!(served, failed, rejected, "Simulated workload finished");

    let snapshot = ctx.snapshot().await;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    Ok(())
}
