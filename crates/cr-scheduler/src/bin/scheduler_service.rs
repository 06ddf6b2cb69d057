use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::info;

use cr_invoker::MockInvoker;
use cr_scheduler::{Scheduler, SchedulerConfig};
use cr_store::FileStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let addr = std::env::var("CRUCIBLE_SCHEDULER_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8085".to_string());
    let data_dir =
        std::env::var("CRUCIBLE_DATA_DIR").unwrap_or_else(|_| "./crucible-data".to_string());

    let store = Arc::new(FileStore::new(&data_dir)?);
    // The sandbox invoker stands in until a provider adapter is wired up.
    let invoker = Arc::new(MockInvoker::with_defaults());
    let scheduler = Scheduler::new(SchedulerConfig::default(), store, invoker);

    let interrupted = scheduler.recover().await?;
    info!(data_dir = %data_dir, interrupted, "scheduler recovered from durable store");

    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Crucible scheduler service listening");

    loop {
        let (mut socket, _) = listener.accept().await?;

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];
            let _ = socket.read(&mut buffer).await;

            let body = r#"{"status":"ok","service":"scheduler"}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );

            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
    }
}
