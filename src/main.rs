use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use acsched::board::RoomBoard;
use acsched::config::DaemonConfig;
use acsched::control;
use acsched::ledger::UsageLedger;
use acsched::scheduler::Scheduler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = DaemonConfig::from_env();
    acsched::observability::init(config.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let ledger = Arc::new(UsageLedger::open(&config.ledger_path())?);
    let board = Arc::new(RoomBoard::new());
    let scheduler = Scheduler::new(config.scheduler.clone(), ledger.clone(), board)?;
    scheduler.start().await?;

    let semaphore = Arc::new(Semaphore::new(config.max_connections));
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("acsched listening on {addr}");
    info!("  ledger: {} ({} records)", ledger.path().display(), ledger.len());
    info!("  capacity: {}", config.scheduler.capacity);
    info!("  max_connections: {}", config.max_connections);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("SIGTERM handler unavailable: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(acsched::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(acsched::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(acsched::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let scheduler = scheduler.clone();
                let ledger = ledger.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = control::process_connection(socket, scheduler, ledger).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(acsched::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == config.max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = config.max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    // Close intake before settling so nothing queued is admitted afterwards
    scheduler.stop_intake().await;
    if config.settle_on_shutdown {
        let settled = scheduler.settle_all().await;
        info!("stopped {settled} room(s) before exit");
    }
    scheduler.shutdown().await;

    info!("acsched stopped");
    Ok(())
}
