//! `recdash` — tail live download progress from a recorder server.
//!
//! Usage: `recdash [STREAMER_ID ...]`
//! With no arguments, every enabled streamer is watched.
//! Set `RECDASH_TOKEN` for servers with auth enabled.

use std::sync::Arc;

use recdash_bridge::{ApiClient, Bridge, SessionSource, StaticToken, StoreEvent, WatchHandle};
use recdash_proto::config::Config;
use recdash_proto::protocol::{DownloadState, ProgressRecord};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = recdash_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("recdash.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Allow RUST_LOG override; default to debug for app code but suppress
    // noisy connection-level DEBUG from HTTP client internals.
    let log_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "debug,hyper_util=warn,reqwest=warn,hyper=warn".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    eprintln!("recdash log: {}", log_path.display());
    tracing::info!("recdash starting…");

    let config = Config::load().unwrap_or_default();

    let session: Arc<dyn SessionSource> = match std::env::var("RECDASH_TOKEN") {
        Ok(token) if !token.is_empty() => Arc::new(StaticToken::new(token)),
        _ => Arc::new(StaticToken::anonymous()),
    };

    let api = ApiClient::new(&config.server.base_url, Arc::clone(&session));

    match api.system_health().await {
        Ok(health) => {
            println!(
                "server v{} — {} active download(s), {} queued job(s)",
                health.version, health.active_downloads, health.queued_jobs
            );
        }
        Err(e) => {
            tracing::warn!("health check failed: {}", e);
            eprintln!("warning: server health check failed: {}", e);
        }
    }

    let ids: Vec<String> = {
        let args: Vec<String> = std::env::args().skip(1).collect();
        if args.is_empty() {
            api.streamers()
                .await?
                .into_iter()
                .filter(|s| s.enabled)
                .map(|s| s.id)
                .collect()
        } else {
            args
        }
    };

    if ids.is_empty() {
        println!("no streamers to watch");
        return Ok(());
    }

    let bridge = Bridge::connect(&config, session);
    let _watches: Vec<WatchHandle> = ids.iter().map(|id| bridge.watch(Some(id))).collect();
    println!("watching {} streamer(s): {}", ids.len(), ids.join(", "));

    let store = bridge.store();
    let mut events = store.events();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            event = events.recv() => {
                match event {
                    Ok(StoreEvent::Updated(id)) => {
                        if let Some(record) = store.get(&id) {
                            println!("{}", format_progress(&record));
                        }
                    }
                    Ok(StoreEvent::Removed(id)) => {
                        println!("{:<24} done", id);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("display lagged by {} updates", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    bridge.close().await;
    tracing::info!("recdash exiting");
    Ok(())
}

fn format_progress(record: &ProgressRecord) -> String {
    let state = match record.state {
        DownloadState::Pending => "pending",
        DownloadState::Recording => "recording",
        DownloadState::Paused => "paused",
        DownloadState::Failed => "failed",
    };
    format!(
        "{:<24} {:<9} {:>10} at {}/s ({}s elapsed)",
        record.streamer_id,
        state,
        human_bytes(record.bytes_transferred),
        human_bytes(record.rate_bytes_per_sec as u64),
        record.elapsed_secs.round() as u64,
    )
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
