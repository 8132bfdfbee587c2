use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use splitcache_lib::PreloadScriptBuilder;
use tracing::{error, info};

use crate::server::config::SplitcacheConfig;

/// Runs a single sync and prints the preload script, or the bare JSON
/// projection with `json`. Exits non-zero when any stream failed.
pub async fn run_pull(
    config: SplitcacheConfig,
    splits: Vec<String>,
    json: bool,
    output: Option<String>,
) {
    let failures = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&failures);

    let poller = splitcache_lib::init()
        .config(config.split)
        .on_error(move |e| {
            error!("{}", e);
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap_or_else(|e| {
            error!(error = %e, "failed to create poller");
            process::exit(1);
        });

    poller.poll().await;

    let body = if json {
        poller.serialized_data(&splits).await
    } else {
        PreloadScriptBuilder::new(poller.clone())
            .script(&splits)
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, "failed to build preload script");
                process::exit(1);
            })
    };

    match output {
        Some(path) => {
            if let Err(e) = tokio::fs::write(&path, &body).await {
                error!(path = %path, error = %e, "failed to write output");
                process::exit(1);
            }
            let stats = poller.stats().await;
            info!(
                path = %path,
                splits = stats.splits,
                segments = stats.segments,
                "wrote preload"
            );
        }
        None => println!("{}", body),
    }

    if failures.load(Ordering::SeqCst) > 0 {
        process::exit(1);
    }
}
