//! Server commands: sync, watch, probe.

use super::{format_time, open_store};
use notesync_engine::{
    ConnectionInfo, DrainReport, HttpTransport, ManualConnection, NetworkConfig, NetworkMonitor,
    ReqwestClient, SyncConfig, SyncEngine, SyncPhase,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

type Engine = SyncEngine<HttpTransport<ReqwestClient>>;

fn build_engine(
    path: &Path,
    config: SyncConfig,
) -> Result<(Engine, ReqwestClient), Box<dyn std::error::Error>> {
    let client = ReqwestClient::new(config.request_timeout)?;
    let transport = HttpTransport::new(&config.server_url, client.clone())?;
    let store = open_store(path)?;
    Ok((SyncEngine::new(config, store, transport), client))
}

fn print_report(report: &DrainReport) {
    println!("Processed {} change(s)", report.processed);
    println!("  Pushed:   {}", report.pushed);
    println!("  Requeued: {}", report.requeued);
    println!("  Dropped:  {}", report.dropped);
    for (note_id, strategy) in &report.conflicts {
        println!("  Conflict on {} resolved with {}", note_id, strategy);
    }
}

/// Runs one drain pass.
pub async fn once(path: &Path, server: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, _) = build_engine(path, SyncConfig::new(server))?;

    match engine.sync_now().await {
        Some(report) => print_report(&report),
        None => println!("Nothing to sync."),
    }

    let status = engine.status();
    if let Some(err) = status.error {
        return Err(format!("Sync aborted: {}", err).into());
    }
    println!("Last sync: {}", format_time(status.last_sync));
    Ok(())
}

/// Monitors connectivity and syncs until interrupted.
pub async fn watch(
    path: &Path,
    server: &str,
    interval_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let interval = Duration::from_secs(interval_secs.max(1));
    let (engine, client) = build_engine(path, SyncConfig::new(server).with_sync_interval(interval))?;

    // No platform signal here; connectivity comes from the health probe.
    let probe_config = NetworkConfig::default().with_check_interval(interval);
    let reachable = NetworkMonitor::new(
        Arc::new(ManualConnection::new(ConnectionInfo::online())),
        probe_config.clone(),
    )
    .with_probe(Arc::new(client.clone()), server)?
    .check_connectivity()
    .await;

    let connection = Arc::new(ManualConnection::new(if reachable {
        ConnectionInfo::online()
    } else {
        ConnectionInfo::offline()
    }));
    let events = connection.events();
    let monitor = NetworkMonitor::new(connection, probe_config).with_probe(Arc::new(client), server)?;

    let (_manual_tx, manual_rx) = mpsc::unbounded_channel();
    let mut status = engine.subscribe_status();

    info!(server, reachable, "watching");
    println!("Watching {} (Ctrl-C to stop)", server);

    let report_status = async {
        while let Some(status) = status.recv().await {
            match status.phase {
                SyncPhase::Completed => println!(
                    "Synced {}/{} at {}",
                    status.progress,
                    status.total,
                    format_time(status.last_sync)
                ),
                SyncPhase::Error => println!(
                    "Sync failed: {}",
                    status.error.as_deref().unwrap_or("unknown error")
                ),
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = monitor.run(events) => {}
        _ = engine.run(monitor.online(), manual_rx) => {}
        _ = report_status => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            println!("Stopped.");
        }
    }

    Ok(())
}

/// Checks the server's health endpoint.
pub async fn probe(server: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = NetworkConfig::default();
    let client = ReqwestClient::new(config.probe_timeout)?;
    let monitor = NetworkMonitor::new(
        Arc::new(ManualConnection::new(ConnectionInfo::online())),
        config,
    )
    .with_probe(Arc::new(client), server)?;

    let latency = monitor.measure_latency().await;
    if latency.connected {
        println!("{} is reachable ({} ms)", server, latency.latency_ms);
        Ok(())
    } else {
        Err(format!("{} is unreachable after {} ms", server, latency.latency_ms).into())
    }
}
