use clap::Parser;
use edge_index::config::Cli;
use edge_index::query::IndexServer;
use edge_index::IndexService;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Cli::parse().into_config()?;
    info!(
        "Starting edge-index: data_dir={:?} partitioning=[{}] snapshots={}",
        config.data_dir, config.partitioning, config.persist_snapshots
    );

    // 启动加载（快照 + 日志回放）是同步 IO，放到阻塞线程
    let startup = config.clone();
    let service = Arc::new(tokio::task::spawn_blocking(move || IndexService::open(&startup)).await??);
    info!("\n{}", service.control().current().stats());

    // 周期性统计
    if config.stats_interval_secs > 0 {
        let svc = service.clone();
        let every = Duration::from_secs(config.stats_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let status = svc.status();
                info!(
                    "maintenance={:?} staged_batches={} staged_documents={}\n{}",
                    status.maintenance, status.staged_batches, status.staged_documents, status.index
                );
            }
        });
    }

    let server = IndexServer::new(service.clone());
    let port = config.port;
    let server_task = tokio::spawn(server.run(port));
    info!("edge-index ready. Query via: curl -XPOST http://localhost:{}/search -d '{{\"terms\":[\"rust\"]}}' -H 'content-type: application/json'", port);

    tokio::select! {
        res = server_task => {
            res??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            if service.control().request_abort() {
                info!("Aborting in-flight maintenance");
                let ctl = service.control().clone();
                tokio::task::spawn_blocking(move || ctl.wait_until_idle(Duration::from_secs(5))).await?;
            }
        }
    }

    Ok(())
}
