use mirror_cluster::admin;
use mirror_cluster::config::NodeConfig;
use mirror_cluster::dispatcher::MirrorDispatcher;
use mirror_cluster::mailbox::MailboxCluster;
use mirror_cluster::metadata::{MetadataController, SharedView};
use mirror_cluster::mirror::{DispatcherMetadata, Mirror};
use mirror_cluster::protocol::kv::{KeyRegion, KeyValueProtocol, MemoryStore};
use mirror_cluster::timestamps::StateTimestamp;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        eprintln!(
            "Usage: {} [--http <addr:port>] [--mirrors <n>] [--required-acks <n>]",
            args[0]
        );
        eprintln!("Example: {} --http 127.0.0.1:8098 --mirrors 3", args[0]);
        return Ok(());
    }

    let config = NodeConfig::from_args(&args)?;
    tracing::info!(
        "Starting node with {} mirror(s), waiting for {} ack(s) per write",
        config.mirrors,
        config.dispatcher.required_acks
    );

    // 1. Transport and shared metadata:
    let cluster = MailboxCluster::new();
    let metadata: MetadataController<DispatcherMetadata<KeyValueProtocol>> =
        MetadataController::new(BTreeMap::new());

    // 2. Dispatcher:
    let dispatcher = MirrorDispatcher::new(
        cluster.clone(),
        metadata.view(),
        StateTimestamp::zero(),
        config.dispatcher.clone(),
    );

    // 3. Mirrors: the first one founds the region, the rest backfill from it
    let interruptor = CancellationToken::new();
    let founder = Mirror::new(
        MemoryStore::new(KeyRegion::Universe),
        cluster.clone(),
        metadata.view(),
        config.mirror.clone(),
    )?;
    let source = founder.id().clone();
    tracing::info!("Founding mirror {}", source);

    let mut mirrors = vec![founder];
    for _ in 1..config.mirrors {
        let mirror = Mirror::with_backfill(
            MemoryStore::new(KeyRegion::Universe),
            cluster.clone(),
            metadata.view(),
            &source,
            &interruptor,
            config.mirror.clone(),
        )
        .await?;
        mirrors.push(mirror);
    }

    // 4. Spawn stats reporter:
    let stats_view = metadata.view();
    let stats_stop = interruptor.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATS_INTERVAL);
        loop {
            tokio::select! {
                _ = stats_stop.cancelled() => break,
                _ = interval.tick() => report(&stats_view),
            }
        }
    });

    // 5. Start HTTP server:
    let app = admin::router(dispatcher);
    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;

    tracing::info!("HTTP server listening on {}", config.http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
        })
        .await?;

    // 6. Shutdown:
    tracing::info!("Shutting down {} mirror(s)", mirrors.len());
    interruptor.cancel();
    for mirror in mirrors {
        mirror.shutdown().await;
    }

    Ok(())
}

fn report(view: &SharedView<DispatcherMetadata<KeyValueProtocol>>) {
    let registrations = view.get();
    let live = registrations.values().filter(|r| !r.retired).count();
    tracing::info!("Cluster stats: {} live mirror(s)", live);
    for (id, registration) in registrations {
        tracing::info!(
            "  - {} watermark={} outdated={} retired={}",
            id,
            registration.watermark,
            registration.outdated,
            registration.retired
        );
    }
}
