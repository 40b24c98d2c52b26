use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use fleetmap::collector::NetworkDependencyCollector;
use fleetmap::config::Config;
use fleetmap::inventory::{InventoryRefresher, InventoryStore};
use fleetmap::net::{DefaultRouteResolver, FixedAddrResolver, LocalAddrResolver};
use fleetmap::scheduler::spawn_source_loop;
use fleetmap::scrape::ScrapeClient;
use fleetmap::server;
use fleetmap::task::socket::{ProcNetReader, SocketStateTask};
use fleetmap::task::traffic::TrafficTask;
use fleetmap::task::SourceTask;

#[derive(Parser)]
#[command(name = "fleetmap")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Fleet network-dependency exporter", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "fleetmap.yaml", help = "Configuration file")]
    config: PathBuf,

    #[arg(short, long, help = "Override the listen address")]
    listen_address: Option<String>,

    #[arg(short, long, help = "Enable verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting fleetmap v{}", fleetmap::VERSION);

    let mut config = Config::load(&cli.config)?;
    if let Some(listen_address) = cli.listen_address {
        config.listen_address = listen_address;
    }

    let resolver: Arc<dyn LocalAddrResolver> = match config.local_address {
        Some(addr) => Arc::new(FixedAddrResolver::new(addr)),
        None => Arc::new(DefaultRouteResolver::new()),
    };

    let client = ScrapeClient::new()?;
    let inventory = Arc::new(InventoryStore::new(Arc::clone(&resolver)));

    let traffic = Arc::new(TrafficTask::new(
        "traffic",
        "host_bytes_total",
        &config.traffic,
        client.clone(),
        Arc::clone(&inventory),
        Arc::clone(&resolver),
    ));
    let ebpf_traffic = Arc::new(TrafficTask::new(
        "ebpf_traffic",
        "ebpf_exporter_ipv4_bytes_total",
        &config.ebpf_traffic,
        client.clone(),
        Arc::clone(&inventory),
        Arc::clone(&resolver),
    ));
    let socket = Arc::new(SocketStateTask::new(
        &config.socket,
        Box::new(ProcNetReader::new()),
        Arc::clone(&inventory),
    ));
    let refresher = Arc::new(InventoryRefresher::new(
        config.inventory.enabled,
        config.inventory.address.clone(),
        client,
        Arc::clone(&inventory),
    ));

    let collector = NetworkDependencyCollector::new(
        Arc::clone(&traffic),
        Arc::clone(&ebpf_traffic),
        Arc::clone(&socket),
        Arc::clone(&inventory),
    )?;
    let registry = server::build_registry(collector)?;

    let cancel = CancellationToken::new();
    let mut loops = Vec::new();

    let refresher: Arc<dyn SourceTask> = refresher;
    let traffic: Arc<dyn SourceTask> = traffic;
    let ebpf_traffic: Arc<dyn SourceTask> = ebpf_traffic;
    let socket: Arc<dyn SourceTask> = socket;

    let sources = [
        (refresher, config.inventory.interval_secs),
        (traffic, config.traffic.interval_secs),
        (ebpf_traffic, config.ebpf_traffic.interval_secs),
        (socket, config.socket.interval_secs),
    ];
    for (task, interval_secs) in sources {
        loops.push(spawn_source_loop(
            task,
            Duration::from_secs(interval_secs.max(1)),
            cancel.clone(),
        ));
    }

    let server_cancel = cancel.clone();
    let listen_address = config.listen_address.clone();
    let server_handle =
        tokio::spawn(async move { server::serve(&listen_address, registry, server_cancel).await });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    cancel.cancel();

    for handle in loops {
        let _ = handle.await;
    }
    server_handle.await??;

    info!("fleetmap stopped");
    Ok(())
}
