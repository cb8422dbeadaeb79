use clap::Parser;
use quiver_broker::{Broker, BrokerConfig, GrpcBroker, IdAllocator};
use quiver_config::Configurable;
use quiver_metakv::{EtcdMetaKv, MetaKv};
use quiver_msgstream::{MemoryMessageBus, MessageBus};
use quiver_querycoord::{QueryCoord, QueryCoordConfig};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "query-coordinator", about = "Quiver query coordinator")]
struct Args {
    /// Path to the YAML config file; QUIVER_-prefixed environment
    /// variables override individual fields.
    #[arg(long, default_value = "./query_coordinator.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config: QueryCoordConfig = quiver_config::load_config_from_path(&args.config)?;
    tracing::info!(config = ?config, "loaded configuration");

    let kv: Arc<dyn MetaKv> = Arc::new(
        EtcdMetaKv::connect(&config.etcd.endpoints, config.etcd.root_path.clone()).await?,
    );
    // The in-process bus serves single-binary installs; clustered
    // deployments swap in their stream broker here.
    let bus: Arc<dyn MessageBus> = Arc::new(MemoryMessageBus::new());

    let BrokerConfig::Grpc(broker_config) = &config.broker;
    let broker = Broker::Grpc(GrpcBroker::try_from_config(broker_config).await?);
    let allocator: Arc<dyn IdAllocator> = Arc::new(broker.clone());

    let coord = QueryCoord::new(config, kv, bus, broker, allocator).await?;
    coord.start().await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
        }
        _ = coord.stopped() => {
            tracing::error!("coordinator stopped on its own, exiting");
        }
    }
    coord.stop().await;
    Ok(())
}
