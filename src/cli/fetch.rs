//! Fetch command: run URLs through the request queue.

use std::sync::Arc;

use console::style;
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};

use webacquire::browser::ChromiumBackend;
use webacquire::config::Settings;
use webacquire::job::FetchResult;
use webacquire::orchestrator::FetchOrchestrator;
use webacquire::pool::ContextPool;
use webacquire::queue::{DrainOutcome, RequestQueue};

pub async fn cmd_fetch(
    settings: &Settings,
    urls: &[String],
    timeout_ms: Option<u64>,
    wait_ms: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    let mut options = settings.fetch;
    if let Some(ms) = timeout_ms {
        options.timeout_ms = ms;
    }
    if let Some(ms) = wait_ms {
        options.post_load_wait_ms = ms;
    }

    let backend = Arc::new(ChromiumBackend::new(settings.browser.clone()));
    let pool = ContextPool::new(backend, settings.pool.clone());
    let queue = RequestQueue::new(FetchOrchestrator::new(pool), settings.queue.clone());

    let pb = if json {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(urls.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb
    };

    // Polled in order on first poll, so submissions reach the queue in order.
    let mut pending: FuturesUnordered<_> = urls
        .iter()
        .map(|url| queue.submit_url(url, options))
        .collect();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut results = Vec::with_capacity(urls.len());
    let mut interrupted = false;
    loop {
        tokio::select! {
            next = pending.next() => match next {
                Some(result) => {
                    if !json {
                        pb.println(describe(&result));
                    }
                    pb.inc(1);
                    results.push(result);
                }
                None => break,
            },
            _ = &mut ctrl_c => {
                interrupted = true;
                pb.println(format!(
                    "{} Interrupted, finishing in-flight fetches...",
                    style("!").yellow()
                ));
                break;
            }
        }
    }
    drop(pending);
    pb.finish_and_clear();

    let outcome = queue.shutdown().await;
    let stats = queue.stats();

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        println!(
            "{} {} processed, {} failed ({} blocked), {} rejected",
            style("→").cyan(),
            stats.processed,
            stats.failed,
            stats.blocked,
            stats.rejected
        );
        if let DrainOutcome::TimedOut { active, waiting } = outcome {
            println!(
                "{} Shutdown abandoned {} in-flight and {} waiting fetch(es)",
                style("!").yellow(),
                active,
                waiting
            );
        }
    }

    if interrupted {
        anyhow::bail!("Interrupted");
    }
    Ok(())
}

fn describe(result: &FetchResult) -> String {
    if result.success {
        let status = result
            .status_code
            .map(|s| s.to_string())
            .unwrap_or_else(|| "---".to_string());
        return format!(
            "{} {} {} {} ({}ms)",
            style("✓").green(),
            style(status).dim(),
            result.url,
            result.title.as_deref().unwrap_or(""),
            result.elapsed_ms
        );
    }

    let kind = result
        .error_kind
        .map(|k| k.as_str())
        .unwrap_or("UNKNOWN");
    let detail = match (&result.block_kind, &result.error) {
        (Some(block), _) => format!("{}, not retrying", block),
        (None, Some(error)) => error.clone(),
        (None, None) => String::new(),
    };
    format!(
        "{} {} {} {}",
        style("✗").red(),
        style(kind).yellow(),
        result.url,
        style(detail).dim()
    )
}
